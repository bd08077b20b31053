use thiserror::Error;

/// Main error type for Remote Scan
#[derive(Error, Debug)]
pub enum RemoteScanError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level HTTP errors (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Media server answered, but not with success
    #[error("API error: {0}")]
    Api(String),

    /// Reply body could not be understood
    #[error("Parse error: {0}")]
    Parse(String),

    /// Filesystem watch subscription errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Convenient Result type using RemoteScanError
pub type Result<T> = std::result::Result<T, RemoteScanError>;
