use super::RequestsLoggingLevel;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    pub bind_address: String,
    pub frontend_dir_path: Option<String>,
    /// Origins allowed to call the API from a browser. Empty disables CORS.
    pub cors_origins: Vec<String>,
    /// Per-file upload cap, used to size the request body limit.
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 8000,
            bind_address: "127.0.0.1".to_string(),
            frontend_dir_path: None,
            cors_origins: Vec::new(),
            max_upload_size: crate::config::DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}
