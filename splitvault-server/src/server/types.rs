use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use splitvault_core::{FileRecord, FileState, Node, NodeView, UploadProgress};

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: String,
    pub(crate) nodes: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct NodeItem {
    pub(crate) id: String,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) ca: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) connected: Option<bool>,
}

impl NodeItem {
    pub(crate) fn from_node(node: &Node, connected: Option<bool>) -> Self {
        Self {
            id: node.id.clone(),
            host: node.address.host.clone(),
            port: node.address.port,
            ca: node.ca_cert.clone(),
            connected,
        }
    }

    pub(crate) fn from_view(view: NodeView) -> Option<Self> {
        let connection = view.connection?;
        Some(Self {
            id: view.id,
            host: connection.address.host,
            port: connection.address.port,
            ca: connection.ca_cert,
            connected: Some(view.connected),
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct NodesResponse {
    pub(crate) nodes: Vec<NodeItem>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NodeResponse {
    pub(crate) node: NodeItem,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateNodeRequest {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) ca: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateNodeRequest {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) ca: String,
    #[serde(default)]
    pub(crate) force: bool,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct ForceQuery {
    #[serde(default)]
    pub(crate) force: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DirectoryQuery {
    #[serde(default)]
    pub(crate) path: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileQuery {
    #[serde(default)]
    pub(crate) path: String,
    pub(crate) name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadQuery {
    #[serde(default)]
    pub(crate) path: String,
    pub(crate) name: String,
    pub(crate) size: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct FileItem {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) size_bytes: u64,
    pub(crate) state: FileState,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl From<FileRecord> for FileItem {
    fn from(file: FileRecord) -> Self {
        Self {
            id: file.id,
            name: file.name,
            path: file.path,
            size_bytes: file.size_bytes,
            state: file.state,
            created_at: file.created_at,
            updated_at: file.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ListFilesResponse {
    pub(crate) path: String,
    pub(crate) directories: Vec<String>,
    pub(crate) files: Vec<FileItem>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadResponse {
    pub(crate) file: FileItem,
    pub(crate) part_count: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteFileResponse {
    pub(crate) file_id: String,
    pub(crate) removed_parts: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadItem {
    pub(crate) file_id: String,
    pub(crate) path: String,
    pub(crate) name: String,
    pub(crate) total_bytes: u64,
    pub(crate) consumed_bytes: u64,
    pub(crate) part_count: u32,
    pub(crate) confirmed_parts: u32,
    /// One decimal place, like the progress the UI renders.
    pub(crate) percentage: f64,
}

impl From<UploadProgress> for UploadItem {
    fn from(progress: UploadProgress) -> Self {
        let percentage = (progress.percentage() * 10.0).round() / 10.0;
        Self {
            file_id: progress.file_id,
            path: progress.path,
            name: progress.name,
            total_bytes: progress.total_bytes,
            consumed_bytes: progress.consumed_bytes,
            part_count: progress.part_count,
            confirmed_parts: progress.confirmed_parts,
            percentage,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadsResponse {
    pub(crate) uploads: Vec<UploadItem>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OkResponse {
    pub(crate) success: bool,
}
