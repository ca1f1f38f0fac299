pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::UploaderConfig;
pub use error::{FormError, SessionError, TransportError, UploadError};
pub use models::{SelectedFile, UploadReceipt};
pub use services::form::UploadForm;
pub use services::sequencer::UploadSequencer;
pub use services::session::SessionContext;
pub use services::transport::{HttpTransport, ReqwestTransport};
pub use services::ui::{ConsoleUi, UploadUi};
