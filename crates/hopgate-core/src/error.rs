use thiserror::Error;

#[derive(Debug, Error)]
pub enum HopgateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid rule '{0}': {1}")]
    InvalidRule(String, String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HopgateError>;
