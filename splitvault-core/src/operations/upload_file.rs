use crate::cipher::{PartNonce, encrypt_body};
use crate::error::{Result, VaultError};
use crate::node::Node;
use crate::placement::{NodeSelector, PlacementConfig, ShardPlan};
use crate::registry::NodeRegistry;
use crate::storage::{FileRecord, FileState, MetadataStore, PartRecord, clean_path};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;

const PART_CHANNEL_DEPTH: usize = 8;

/// Snapshot of one in-flight upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadProgress {
    pub file_id: String,
    pub path: String,
    pub name: String,
    pub total_bytes: u64,
    pub consumed_bytes: u64,
    pub part_count: u32,
    pub confirmed_parts: u32,
}

impl UploadProgress {
    /// Share of the declared size consumed from the source, 0 to 100.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.consumed_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}

#[derive(Debug, Default)]
pub struct UploadTracker {
    uploads: Mutex<HashMap<String, UploadProgress>>,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<UploadProgress> {
        let mut uploads: Vec<UploadProgress> = self
            .uploads
            .lock()
            .map(|uploads| uploads.values().cloned().collect())
            .unwrap_or_default();
        uploads.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        uploads
    }

    fn update(&self, file_id: &str, apply: impl FnOnce(&mut UploadProgress)) {
        if let Ok(mut uploads) = self.uploads.lock() {
            if let Some(progress) = uploads.get_mut(file_id) {
                apply(progress);
            }
        }
    }

    fn start(&self, progress: UploadProgress) {
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.insert(progress.file_id.clone(), progress);
        }
    }

    fn finish(&self, file_id: &str) {
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.remove(file_id);
        }
    }
}

#[derive(Clone)]
pub struct UploadFileOperation {
    store: Arc<MetadataStore>,
    registry: Arc<NodeRegistry>,
    selector: Arc<dyn NodeSelector>,
    tracker: Arc<UploadTracker>,
    placement: PlacementConfig,
    max_concurrent_transfers: usize,
}

pub struct UploadFileOperationRequest {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub body: BoxStream<'static, Result<Bytes>>,
}

#[derive(Debug, Clone)]
pub struct UploadFileOperationResult {
    pub file: FileRecord,
    pub part_count: u32,
}

impl UploadFileOperation {
    pub fn new(
        store: Arc<MetadataStore>,
        registry: Arc<NodeRegistry>,
        selector: Arc<dyn NodeSelector>,
        tracker: Arc<UploadTracker>,
        placement: PlacementConfig,
        max_concurrent_transfers: usize,
    ) -> Self {
        Self {
            store,
            registry,
            selector,
            tracker,
            placement,
            max_concurrent_transfers: max_concurrent_transfers.max(1),
        }
    }

    pub async fn run(&self, request: UploadFileOperationRequest) -> Result<UploadFileOperationResult> {
        let UploadFileOperationRequest {
            path,
            name,
            size,
            body,
        } = request;

        validate_name(&name)?;
        if size == 0 {
            return Err(VaultError::InvalidRequest(
                "file size must be positive".to_string(),
            ));
        }
        let path = clean_path(&path);

        if self.store.get_file(&path, &name)?.is_some() {
            return Err(VaultError::FileExists(format!("{}{}", path, name)));
        }

        let nodes = self.registry.reachable_nodes().await?;
        let plan = ShardPlan::compute(size, &self.placement, nodes.len())?;

        let now = Utc::now();
        let mut file = FileRecord {
            id: ulid::Ulid::new().to_string(),
            name,
            path,
            size_bytes: size,
            state: FileState::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_file(&file)?;
        self.store.set_file_state(&file.id, FileState::InProgress)?;
        file.state = FileState::InProgress;

        tracing::info!(
            "Uploading file: id={} path={}{} size={} parts={} nodes={}",
            file.id,
            file.path,
            file.name,
            size,
            plan.part_count,
            nodes.len()
        );

        self.tracker.start(UploadProgress {
            file_id: file.id.clone(),
            path: file.path.clone(),
            name: file.name.clone(),
            total_bytes: size,
            consumed_bytes: 0,
            part_count: plan.part_count,
            confirmed_parts: 0,
        });

        let outcome = self.transfer(&file.id, &plan, &nodes, body).await;
        self.tracker.finish(&file.id);

        match outcome {
            Ok(()) => {
                self.store.set_file_state(&file.id, FileState::Complete)?;
                file.state = FileState::Complete;
                file.updated_at = Utc::now();
                tracing::info!("Upload complete: id={} parts={}", file.id, plan.part_count);
                Ok(UploadFileOperationResult {
                    file,
                    part_count: plan.part_count,
                })
            }
            Err(failure) => {
                self.store.set_file_state(&file.id, FileState::Failed)?;
                tracing::warn!(
                    "Upload failed: id={} confirmed_parts={} reason={}",
                    file.id,
                    failure.confirmed_parts,
                    failure.reason
                );
                Err(VaultError::UploadFailed {
                    file_id: file.id,
                    confirmed_parts: failure.confirmed_parts,
                    reason: failure.reason,
                })
            }
        }
    }

    /// Cuts `body` into the planned parts and streams each one to its node.
    ///
    /// Parts are produced strictly in order by this task; their transfers run on
    /// a pool bounded by `max_concurrent_transfers`. Every spawned transfer is
    /// joined before returning, whatever the outcome.
    async fn transfer(
        &self,
        file_id: &str,
        plan: &ShardPlan,
        nodes: &[Node],
        mut body: BoxStream<'static, Result<Bytes>>,
    ) -> std::result::Result<(), UploadFailure> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_transfers));
        let mut workers: JoinSet<Result<u32>> = JoinSet::new();
        let mut confirmed = 0usize;
        let mut first_error: Option<String> = None;
        let mut leftover: Option<Bytes> = None;
        let mut consumed = 0u64;
        let mut abandoned = false;

        for seq in 0..plan.part_count {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    first_error = Some("transfer pool closed".to_string());
                    break;
                }
            };

            while let Some(joined) = workers.try_join_next() {
                record_join(joined, &mut confirmed, &mut first_error);
            }
            if first_error.is_some() {
                break;
            }

            let index = self.selector.select(nodes.len());
            let Some(node) = nodes.get(index).cloned() else {
                first_error = Some(format!(
                    "node selector picked index {} of {} nodes",
                    index,
                    nodes.len()
                ));
                break;
            };
            let (tx, rx) = mpsc::channel::<Result<Bytes>>(PART_CHANNEL_DEPTH);
            let part = PartRecord {
                id: ulid::Ulid::new().to_string(),
                file_id: file_id.to_string(),
                node_id: node.id.clone(),
                nonce: PartNonce::generate(),
                seq,
                size_bytes: plan.part_len(seq),
            };
            let transport = self.registry.transport();
            let store = self.store.clone();
            let tracker = self.tracker.clone();

            workers.spawn(async move {
                let _permit = permit;
                let encrypted =
                    encrypt_body(ReceiverStream::new(rx), &node.content_key, &part.nonce)?;
                transport
                    .write_blob(&node.endpoint(), &node.auth_token, &part.id, encrypted)
                    .await?;
                store.insert_part(&part)?;
                tracker.update(&part.file_id, |progress| progress.confirmed_parts += 1);
                tracing::debug!(
                    "Part confirmed: file={} seq={} node={} size={}",
                    part.file_id,
                    part.seq,
                    part.node_id,
                    part.size_bytes
                );
                Ok(part.seq)
            });

            let mut remaining = plan.part_len(seq);
            while remaining > 0 {
                let chunk = match leftover.take() {
                    Some(chunk) => chunk,
                    None => match body.next().await {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(error)) => {
                            let reason = format!("reading upload body failed: {}", error);
                            let _ = tx.send(Err(error)).await;
                            first_error.get_or_insert(reason);
                            break;
                        }
                        None => {
                            let reason = format!(
                                "upload body ended {} bytes short of the declared size",
                                plan.total_len - consumed
                            );
                            let _ = tx
                                .send(Err(VaultError::InvalidRequest(reason.clone())))
                                .await;
                            first_error.get_or_insert(reason);
                            break;
                        }
                    },
                };
                if chunk.is_empty() {
                    continue;
                }

                let take = remaining.min(chunk.len() as u64) as usize;
                let mut piece = chunk;
                if take < piece.len() {
                    leftover = Some(piece.split_off(take));
                }
                remaining -= take as u64;
                consumed += take as u64;
                self.tracker
                    .update(file_id, |progress| progress.consumed_bytes = consumed);

                if tx.send(Ok(piece)).await.is_err() {
                    // the rest of the body no longer lines up with the plan
                    abandoned = true;
                    break;
                }
            }
            drop(tx);

            if abandoned || first_error.is_some() {
                break;
            }
        }

        if !abandoned && first_error.is_none() && has_trailing_bytes(leftover, &mut body).await {
            first_error = Some("upload body is longer than the declared size".to_string());
        }

        while let Some(joined) = workers.join_next().await {
            record_join(joined, &mut confirmed, &mut first_error);
        }
        if abandoned {
            first_error.get_or_insert_with(|| "part transfer stopped reading its body".to_string());
        }

        match first_error {
            None if confirmed == plan.part_count as usize => Ok(()),
            None => Err(UploadFailure {
                confirmed_parts: confirmed,
                reason: format!(
                    "only {} of {} parts were confirmed",
                    confirmed, plan.part_count
                ),
            }),
            Some(reason) => Err(UploadFailure {
                confirmed_parts: confirmed,
                reason,
            }),
        }
    }
}

struct UploadFailure {
    confirmed_parts: usize,
    reason: String,
}

fn record_join(
    joined: std::result::Result<Result<u32>, tokio::task::JoinError>,
    confirmed: &mut usize,
    first_error: &mut Option<String>,
) {
    match joined {
        Ok(Ok(_)) => *confirmed += 1,
        Ok(Err(error)) => {
            first_error.get_or_insert_with(|| error.to_string());
        }
        Err(error) => {
            first_error.get_or_insert_with(|| format!("part transfer task failed: {}", error));
        }
    }
}

async fn has_trailing_bytes(
    leftover: Option<Bytes>,
    body: &mut BoxStream<'static, Result<Bytes>>,
) -> bool {
    if leftover.is_some_and(|chunk| !chunk.is_empty()) {
        return true;
    }
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) if chunk.is_empty() => continue,
            _ => return true,
        }
    }
    false
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(VaultError::InvalidRequest(
            "file name cannot be empty".to_string(),
        ));
    }
    if name.contains('/') {
        return Err(VaultError::InvalidRequest(format!(
            "file name cannot contain '/': {}",
            name
        )));
    }
    Ok(())
}
