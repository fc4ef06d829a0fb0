use thiserror::Error;

/// Every failure mode this crate surfaces to a caller.
#[derive(Debug, Error)]
pub enum IiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no memory available: {0}")]
    NoMemoryAvailable(String),

    #[error("file corrupt: {0}")]
    FileCorrupt(String),

    #[error("input/output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("end of data")]
    EndOfData,

    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type IiResult<T> = Result<T, IiError>;
