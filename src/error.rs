use thiserror::Error;

/// Failure of a single HTTP exchange, independent of which upload phase issued it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Expected status {expected}, got {actual}")]
    UnexpectedStatus { expected: u16, actual: u16 },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File is too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("No file selected")]
    NoFileSelected,

    #[error("Upload authorization failed: {0}")]
    AuthorizationFailed(#[source] TransportError),

    #[error("File transfer failed: {0}")]
    TransferFailed(#[source] TransportError),

    #[error("Upload confirmation failed: {0}")]
    FinishFailed(#[source] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Short machine-readable code, used in log fields.
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            UploadError::NoFileSelected => "NO_FILE_SELECTED",
            UploadError::AuthorizationFailed(_) => "AUTHORIZATION_FAILED",
            UploadError::TransferFailed(_) => "TRANSFER_FAILED",
            UploadError::FinishFailed(_) => "FINISH_FAILED",
            UploadError::Io(_) => "IO_ERROR",
        }
    }
}

#[derive(Error, Debug)]
pub enum FormError {
    #[error("Upload form has no csrfmiddlewaretoken field")]
    MissingCsrfToken,

    #[error("Could not load upload form: {0}")]
    Fetch(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Username or password is incorrect")]
    InvalidCredentials,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Token endpoint responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}
