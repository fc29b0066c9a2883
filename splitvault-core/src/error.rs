use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("That file or directory doesn't exist: {0}")]
    NoSuchFile(String),

    #[error("That file or directory already exists: {0}")]
    FileExists(String),

    #[error("No reachable nodes available")]
    NoReachableNodes,

    #[error("Node unreachable: {0}")]
    Connectivity(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Node rejected request: status={status} message={message}")]
    Remote { status: u16, message: String },

    #[error("Upload of file {file_id} failed after {confirmed_parts} confirmed parts: {reason}")]
    UploadFailed {
        file_id: String,
        confirmed_parts: usize,
        reason: String,
    },

    #[error(
        "Delete of file {file_id} stopped at part {failed_seq}: removed={removed} remaining={remaining}: {reason}"
    )]
    PartialDelete {
        file_id: String,
        failed_seq: u32,
        removed: usize,
        remaining: usize,
        reason: String,
    },

    #[error("File is not complete: {0}")]
    IncompleteFile(String),

    #[error("A download is already in progress for this session")]
    DownloadInProgress,

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether the failure came from talking to a node rather than from local state.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            VaultError::Connectivity(_) | VaultError::Unauthorized(_) | VaultError::Remote { .. }
        )
    }
}
