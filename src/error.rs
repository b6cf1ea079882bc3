use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Certificate load error: {0}")]
    CertificateLoad(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Stopped after {0} redirects")]
    TooManyRedirects(usize),

    #[error("Body read error: {0}")]
    BodyRead(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Whether the error happened after the request reached the upstream
    /// and must be counted as a failed request.
    pub fn is_counted_failure(&self) -> bool {
        matches!(self, ProxyError::Transport(_) | ProxyError::TooManyRedirects(_))
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(e: url::ParseError) -> Self {
        ProxyError::InvalidUrl(e.to_string())
    }
}
