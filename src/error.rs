pub type BackendResult<T> = Result<T, BackendError>;
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Reqwest client error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Invalid trap url: {0}")]
    UrlError(#[from] url::ParseError),
    #[error("Percentile threshold must be in (0, 100], got {0}")]
    InvalidPercentile(f64),
    #[error("Trap responded with status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Failed to read CA certificate {0}: {1}")]
    CaCertificateError(String, String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Other error: {0}")]
    OtherError(String),
}
