use crate::cipher::decrypt_reader;
use crate::error::{Result, VaultError};
use crate::registry::NodeRegistry;
use crate::session::SessionRegistry;
use crate::storage::{FileRecord, FileState, MetadataStore, PartRecord, clean_path};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Clone)]
pub struct DownloadFileOperation {
    store: Arc<MetadataStore>,
    registry: Arc<NodeRegistry>,
    sessions: Arc<SessionRegistry>,
    max_concurrent_transfers: usize,
}

#[derive(Debug, Clone)]
pub struct DownloadFileOperationRequest {
    pub session_id: String,
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DownloadFileOperationResult {
    pub file: FileRecord,
    pub data: Bytes,
}

impl DownloadFileOperation {
    pub fn new(
        store: Arc<MetadataStore>,
        registry: Arc<NodeRegistry>,
        sessions: Arc<SessionRegistry>,
        max_concurrent_transfers: usize,
    ) -> Self {
        Self {
            store,
            registry,
            sessions,
            max_concurrent_transfers: max_concurrent_transfers.max(1),
        }
    }

    pub async fn run(
        &self,
        request: DownloadFileOperationRequest,
    ) -> Result<DownloadFileOperationResult> {
        let DownloadFileOperationRequest {
            session_id,
            path,
            name,
        } = request;

        let _guard = self.sessions.begin_download(&session_id)?;

        let path = clean_path(&path);
        let file = self
            .store
            .get_file(&path, &name)?
            .ok_or_else(|| VaultError::NoSuchFile(format!("{}{}", path, name)))?;

        if file.state != FileState::Complete {
            return Err(VaultError::IncompleteFile(format!(
                "{}{} is {}",
                path,
                name,
                file.state.as_str()
            )));
        }

        let parts = self.store.list_parts(&file.id)?;
        if parts.is_empty() {
            return Err(VaultError::NoSuchFile(format!("{}{}", path, name)));
        }
        if let Some((index, part)) = parts
            .iter()
            .enumerate()
            .find(|(index, part)| part.seq as usize != *index)
        {
            return Err(VaultError::IncompleteFile(format!(
                "{}{} is missing part {} (found {})",
                path, name, index, part.seq
            )));
        }

        let fetched = self.fetch_parts(&parts).await?;

        let mut data = BytesMut::with_capacity(file.size_bytes as usize);
        for bytes in fetched.into_values() {
            data.extend_from_slice(&bytes);
        }
        if data.len() as u64 != file.size_bytes {
            return Err(VaultError::IncompleteFile(format!(
                "{}{} reassembled to {} bytes, expected {}",
                path,
                name,
                data.len(),
                file.size_bytes
            )));
        }

        tracing::info!(
            "Downloaded file: id={} parts={} size={}",
            file.id,
            parts.len(),
            data.len()
        );

        Ok(DownloadFileOperationResult {
            file,
            data: data.freeze(),
        })
    }

    /// Fetches and decrypts every part concurrently, keyed by sequence index.
    async fn fetch_parts(&self, parts: &[PartRecord]) -> Result<BTreeMap<u32, Bytes>> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_transfers));
        let mut workers: JoinSet<Result<(u32, Bytes)>> = JoinSet::new();

        for part in parts.iter().cloned() {
            let node = self.registry.get(&part.node_id)?;
            let transport = self.registry.transport();
            let permits = permits.clone();

            workers.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| VaultError::Internal("transfer pool closed".to_string()))?;

                let reader = transport
                    .read_blob(&node.endpoint(), &node.auth_token, &part.id)
                    .await?;
                let mut plain = decrypt_reader(reader, &node.content_key, &part.nonce)?;

                let mut bytes = BytesMut::with_capacity(part.size_bytes as usize);
                while let Some(chunk) = plain.next().await {
                    bytes.extend_from_slice(&chunk?);
                }
                if bytes.len() as u64 != part.size_bytes {
                    return Err(VaultError::IncompleteFile(format!(
                        "part {} returned {} bytes, expected {}",
                        part.seq,
                        bytes.len(),
                        part.size_bytes
                    )));
                }
                Ok((part.seq, bytes.freeze()))
            });
        }

        let mut fetched = BTreeMap::new();
        while let Some(joined) = workers.join_next().await {
            let outcome = joined
                .map_err(|error| VaultError::Internal(format!("part fetch task failed: {}", error)))
                .and_then(|result| result);

            match outcome {
                Ok((seq, bytes)) => {
                    fetched.insert(seq, bytes);
                }
                Err(error) => {
                    workers.abort_all();
                    tracing::warn!("Download aborted: error={}", error);
                    return Err(error);
                }
            }
        }
        Ok(fetched)
    }
}
