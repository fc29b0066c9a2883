use splitvault_core::protocol::{
    MSG_ALREADY_PAIRED, MSG_INVALID_BODY, MSG_NO_SUCH_BLOB, MSG_NOT_PAIRED,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("{}", MSG_NOT_PAIRED)]
    NotPaired,

    /// Wrong token, or a caller address the panel never paired from.
    #[error("{}", MSG_ALREADY_PAIRED)]
    Forbidden,

    #[error("{}", MSG_INVALID_BODY)]
    InvalidBody,

    #[error("{}", MSG_NO_SUCH_BLOB)]
    NoSuchBlob,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Certificate error: {0}")]
    Certificate(String),
}

impl From<rcgen::Error> for NodeError {
    fn from(error: rcgen::Error) -> Self {
        NodeError::Certificate(error.to_string())
    }
}
