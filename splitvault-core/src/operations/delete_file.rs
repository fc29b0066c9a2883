use crate::error::{Result, VaultError};
use crate::registry::NodeRegistry;
use crate::storage::{MetadataStore, clean_path};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteFileOperation {
    store: Arc<MetadataStore>,
    registry: Arc<NodeRegistry>,
}

#[derive(Debug, Clone)]
pub struct DeleteFileOperationRequest {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DeleteFileOperationResult {
    pub file_id: String,
    pub removed_parts: usize,
}

impl DeleteFileOperation {
    pub fn new(store: Arc<MetadataStore>, registry: Arc<NodeRegistry>) -> Self {
        Self { store, registry }
    }

    /// Removes every part, in sequence order, before removing the file row.
    ///
    /// Stops at the first part that cannot be removed. Parts removed before it
    /// stay removed; it and every later part stay recorded, as does the file.
    pub async fn run(&self, request: DeleteFileOperationRequest) -> Result<DeleteFileOperationResult> {
        let DeleteFileOperationRequest { path, name } = request;
        let path = clean_path(&path);

        let file = self
            .store
            .get_file(&path, &name)?
            .ok_or_else(|| VaultError::NoSuchFile(format!("{}{}", path, name)))?;

        let parts = self.store.list_parts(&file.id)?;
        let total = parts.len();
        let mut removed = 0usize;

        for part in parts {
            let outcome = match self.registry.get(&part.node_id) {
                Ok(node) => {
                    self.registry
                        .transport()
                        .delete_blob(&node.endpoint(), &node.auth_token, &part.id)
                        .await
                }
                Err(error) => Err(error),
            };

            if let Err(error) = outcome {
                tracing::warn!(
                    "Delete stopped: file={} seq={} node={} removed={} remaining={} error={}",
                    file.id,
                    part.seq,
                    part.node_id,
                    removed,
                    total - removed,
                    error
                );
                return Err(VaultError::PartialDelete {
                    file_id: file.id,
                    failed_seq: part.seq,
                    removed,
                    remaining: total - removed,
                    reason: error.to_string(),
                });
            }

            self.store.delete_part(&part.id)?;
            removed += 1;
        }

        if !self.store.delete_file(&file.id)? {
            return Err(VaultError::Internal(format!(
                "file {} still has parts after delete",
                file.id
            )));
        }

        tracing::info!(
            "Deleted file: id={} path={}{} parts={}",
            file.id,
            path,
            name,
            removed
        );

        Ok(DeleteFileOperationResult {
            file_id: file.id,
            removed_parts: removed,
        })
    }
}
