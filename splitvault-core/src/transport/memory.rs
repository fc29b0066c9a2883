//! In-process node transport.
//!
//! Behaves like a set of paired nodes (pairing exclusivity, token checks,
//! blob storage) and lets callers take nodes offline or inject failures.

use super::NodeTransport;
use crate::cipher::{BlobBody, BlobReader};
use crate::error::{Result, VaultError};
use crate::node::{NodeAddress, NodeEndpoint};
use crate::protocol::{MSG_ALREADY_PAIRED, MSG_NO_SUCH_BLOB, MSG_NOT_PAIRED};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct MemoryNode {
    token: Option<String>,
    blobs: HashMap<String, Bytes>,
    offline: bool,
    fail_writes: bool,
    reject_bodies: bool,
    write_delay: Duration,
}

#[derive(Default)]
pub struct MemoryTransport {
    nodes: Mutex<HashMap<String, MemoryNode>>,
    failing_deletes: Mutex<HashSet<String>>,
    failing_reads: Mutex<HashSet<String>>,
    write_attempts: AtomicUsize,
    forgotten: Mutex<Vec<NodeEndpoint>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, address: &NodeAddress) {
        self.lock_nodes()
            .entry(address.to_string())
            .or_default();
    }

    pub fn set_offline(&self, address: &NodeAddress, offline: bool) {
        self.with_node(address, |node| node.offline = offline);
    }

    pub fn fail_writes(&self, address: &NodeAddress, fail: bool) {
        self.with_node(address, |node| node.fail_writes = fail);
    }

    /// Makes the node answer writes without reading the body, failing
    /// after the write delay.
    pub fn reject_bodies(&self, address: &NodeAddress, reject: bool) {
        self.with_node(address, |node| node.reject_bodies = reject);
    }

    pub fn set_write_delay(&self, address: &NodeAddress, delay: Duration) {
        self.with_node(address, |node| node.write_delay = delay);
    }

    /// Makes every delete of `blob_id` fail until cleared.
    pub fn fail_delete_of(&self, blob_id: &str) {
        if let Ok(mut failing) = self.failing_deletes.lock() {
            failing.insert(blob_id.to_string());
        }
    }

    /// Makes every read of `blob_id` drop the connection after the first
    /// piece until cleared.
    pub fn fail_read_of(&self, blob_id: &str) {
        if let Ok(mut failing) = self.failing_reads.lock() {
            failing.insert(blob_id.to_string());
        }
    }

    pub fn clear_failures(&self) {
        for failing in [&self.failing_deletes, &self.failing_reads] {
            if let Ok(mut failing) = failing.lock() {
                failing.clear();
            }
        }
    }

    pub fn paired_token(&self, address: &NodeAddress) -> Option<String> {
        self.lock_nodes()
            .get(&address.to_string())
            .and_then(|node| node.token.clone())
    }

    pub fn blob(&self, address: &NodeAddress, blob_id: &str) -> Option<Bytes> {
        self.lock_nodes()
            .get(&address.to_string())
            .and_then(|node| node.blobs.get(blob_id).cloned())
    }

    pub fn blob_count(&self, address: &NodeAddress) -> usize {
        self.lock_nodes()
            .get(&address.to_string())
            .map(|node| node.blobs.len())
            .unwrap_or(0)
    }

    /// Endpoints the panel said it no longer uses, oldest first.
    pub fn forgotten(&self) -> Vec<NodeEndpoint> {
        self.forgotten
            .lock()
            .map(|forgotten| forgotten.clone())
            .unwrap_or_default()
    }

    /// Number of `write_blob` calls made so far, successful or not.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn total_blobs(&self) -> usize {
        self.lock_nodes().values().map(|node| node.blobs.len()).sum()
    }

    fn lock_nodes(&self) -> MutexGuard<'_, HashMap<String, MemoryNode>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_node(&self, address: &NodeAddress, apply: impl FnOnce(&mut MemoryNode)) {
        let mut nodes = self.lock_nodes();
        apply(nodes.entry(address.to_string()).or_default());
    }

    /// Runs `op` against a reachable node whose pairing token matches.
    fn authorized<T>(
        &self,
        endpoint: &NodeEndpoint,
        token: &str,
        op: impl FnOnce(&mut MemoryNode) -> Result<T>,
    ) -> Result<T> {
        let mut nodes = self.lock_nodes();
        let node = reachable(&mut nodes, endpoint)?;
        match node.token.as_deref() {
            None => Err(VaultError::Remote {
                status: 400,
                message: MSG_NOT_PAIRED.to_string(),
            }),
            Some(stored) if stored != token => Err(VaultError::Unauthorized(format!(
                "node {}: {}",
                endpoint.address, MSG_ALREADY_PAIRED
            ))),
            Some(_) => op(node),
        }
    }
}

fn reachable<'a>(
    nodes: &'a mut HashMap<String, MemoryNode>,
    endpoint: &NodeEndpoint,
) -> Result<&'a mut MemoryNode> {
    match nodes.get_mut(&endpoint.address.to_string()) {
        Some(node) if !node.offline => Ok(node),
        _ => Err(VaultError::Connectivity(format!(
            "cannot connect to node {}",
            endpoint.address
        ))),
    }
}

fn no_such_blob() -> VaultError {
    VaultError::Remote {
        status: 400,
        message: MSG_NO_SUCH_BLOB.to_string(),
    }
}

#[async_trait]
impl NodeTransport for MemoryTransport {
    async fn pair(&self, endpoint: &NodeEndpoint, token: &str) -> Result<()> {
        let mut nodes = self.lock_nodes();
        let node = reachable(&mut nodes, endpoint)?;
        match node.token.as_deref() {
            Some(stored) if stored != token => Err(VaultError::Unauthorized(format!(
                "node {}: {}",
                endpoint.address, MSG_ALREADY_PAIRED
            ))),
            Some(_) => Ok(()),
            None => {
                node.token = Some(token.to_string());
                Ok(())
            }
        }
    }

    async fn unpair(&self, endpoint: &NodeEndpoint, token: &str) -> Result<()> {
        self.authorized(endpoint, token, |node| {
            node.token = None;
            Ok(())
        })
    }

    async fn write_blob(
        &self,
        endpoint: &NodeEndpoint,
        token: &str,
        blob_id: &str,
        body: BlobBody,
    ) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let (delay, reject) =
            self.authorized(endpoint, token, |node| Ok((node.write_delay, node.reject_bodies)))?;

        if reject {
            drop(body);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            return Err(VaultError::Remote {
                status: 413,
                message: "body rejected".to_string(),
            });
        }

        let chunks: Vec<Bytes> = body.try_collect().await?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.authorized(endpoint, token, |node| {
            if node.fail_writes {
                return Err(VaultError::Remote {
                    status: 500,
                    message: "disk full".to_string(),
                });
            }
            node.blobs
                .insert(blob_id.to_string(), Bytes::from(chunks.concat()));
            Ok(())
        })
    }

    async fn read_blob(
        &self,
        endpoint: &NodeEndpoint,
        token: &str,
        blob_id: &str,
    ) -> Result<BlobReader> {
        let bytes = self.authorized(endpoint, token, |node| {
            node.blobs.get(blob_id).cloned().ok_or_else(no_such_blob)
        })?;

        // hand the blob back in small pieces like a network body would
        let mut pieces: Vec<Result<Bytes>> = bytes
            .chunks(7)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();

        let failing = self
            .failing_reads
            .lock()
            .map(|failing| failing.contains(blob_id))
            .unwrap_or(false);
        if failing {
            pieces.truncate(1);
            pieces.push(Err(VaultError::Connectivity(format!(
                "node {} dropped the connection",
                endpoint.address
            ))));
        }
        Ok(stream::iter(pieces).boxed())
    }

    async fn delete_blob(
        &self,
        endpoint: &NodeEndpoint,
        token: &str,
        blob_id: &str,
    ) -> Result<()> {
        let failing = self
            .failing_deletes
            .lock()
            .map(|failing| failing.contains(blob_id))
            .unwrap_or(false);
        if failing {
            return Err(VaultError::Connectivity(format!(
                "node {} dropped the connection",
                endpoint.address
            )));
        }

        self.authorized(endpoint, token, |node| {
            node.blobs
                .remove(blob_id)
                .map(|_| ())
                .ok_or_else(no_such_blob)
        })
    }

    fn forget(&self, endpoint: &NodeEndpoint) {
        if let Ok(mut forgotten) = self.forgotten.lock() {
            forgotten.push(endpoint.clone());
        }
    }
}
