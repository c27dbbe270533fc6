use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("port {0} is already in use")]
    BindConflict(u16),

    #[error("no free port between {first} and {last}")]
    BindExhausted { first: u16, last: u16 },

    #[error("IO error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("install failed: {0}")]
    Install(String),

    #[error("malformed release feed: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

/// Convenience Result type using our Error
pub type Result<T> = std::result::Result<T, Error>;
