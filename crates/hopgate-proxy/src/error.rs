use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("dial rejected")]
    DialRejected,

    #[error("protocol '{0}' not supported")]
    ProtocolNotSupported(String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("unrecognized proxy type '{0}'")]
    UnrecognizedDialerType(String),

    #[error("no route for '{0}'")]
    NoRoute(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
