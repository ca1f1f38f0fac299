use std::env;
use std::path::PathBuf;

/// Upload size limit used when the form does not provide one (100 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Client configuration for talking to a BrosFiles server
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Origin server base URL (default: "http://127.0.0.1:8000")
    pub base_url: String,

    /// Account page hosting the upload form; START/FINISH post back to it (default: "/accounts/")
    pub upload_path: String,

    /// Prefix of the token API (default: "/api/v1")
    pub api_prefix: String,

    /// Maximum file size in bytes when the form does not say (default: 100 MiB)
    pub max_file_size: u64,

    /// Where the session tokens are persisted (default: ".brosfiles/session.json")
    pub session_file: PathBuf,

    /// Connect timeout in seconds. Transfers themselves never time out. (default: 10)
    pub connect_timeout_secs: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            upload_path: "/accounts/".to_string(),
            api_prefix: "/api/v1".to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            session_file: PathBuf::from(".brosfiles/session.json"),
            connect_timeout_secs: 10,
        }
    }
}

impl UploaderConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            base_url: env::var("BROSFILES_URL").unwrap_or(default.base_url),

            upload_path: env::var("BROSFILES_UPLOAD_PATH").unwrap_or(default.upload_path),

            api_prefix: env::var("BROSFILES_API_PREFIX").unwrap_or(default.api_prefix),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            session_file: env::var("BROSFILES_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.session_file),

            connect_timeout_secs: env::var("CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.connect_timeout_secs),
        }
    }

    /// Config pointing at a server under test
    pub fn for_server(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    pub fn upload_url(&self) -> String {
        join_url(&self.base_url, &self.upload_path)
    }

    pub fn api_url(&self, path: &str) -> String {
        join_url(&join_url(&self.base_url, &self.api_prefix), path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
