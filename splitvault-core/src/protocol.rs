//! Panel-to-node wire protocol.

use serde::{Deserialize, Serialize};

pub const INIT_PATH: &str = "/init";
pub const DEINIT_PATH: &str = "/deinit";
pub const WRITE_BLOB_PATH: &str = "/blobs";
pub const READ_BLOB_PATH: &str = "/blobs/read";
pub const DELETE_BLOB_PATH: &str = "/blobs/delete";

pub const BLOB_ID_HEADER: &str = "x-splitvault-blob-id";

pub const MAX_BLOB_ID_LEN: usize = 128;

pub const MSG_SUCCESS: &str = "Success!";
pub const MSG_ALREADY_PAIRED: &str = "The node is already connected to a different panel!";
pub const MSG_NOT_PAIRED: &str = "The node is not (yet) connected to a panel!";
pub const MSG_NO_SUCH_BLOB: &str = "That file or directory doesn't exist!";
pub const MSG_INVALID_BODY: &str = "You sent an incomplete or wrong request body!";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRequest {
    pub id: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReply {
    pub message: String,
    pub success: bool,
}

impl NodeReply {
    pub fn ok() -> Self {
        Self {
            message: MSG_SUCCESS.to_string(),
            success: true,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
        }
    }
}

/// Blob ids are opaque to the node but must be safe to use as file names.
pub fn is_valid_blob_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_BLOB_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
