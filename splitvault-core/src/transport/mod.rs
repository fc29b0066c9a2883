//! Client side of the panel-to-node protocol.

pub mod http;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use crate::cipher::{BlobBody, BlobReader};
use crate::error::Result;
use crate::node::NodeEndpoint;
use async_trait::async_trait;
use std::time::Duration;

pub use http::HttpNodeTransport;
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryTransport;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Ceiling for `/init` and `/deinit`, which double as liveness probes.
    pub probe_timeout: Duration,
    /// Ceiling for a whole blob write, read or delete.
    pub transfer_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(300),
        }
    }
}

/// Operations a node exposes to its paired panel.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Offers `token` to the node's pairing endpoint.
    async fn pair(&self, endpoint: &NodeEndpoint, token: &str) -> Result<()>;

    async fn unpair(&self, endpoint: &NodeEndpoint, token: &str) -> Result<()>;

    async fn write_blob(
        &self,
        endpoint: &NodeEndpoint,
        token: &str,
        blob_id: &str,
        body: BlobBody,
    ) -> Result<()>;

    async fn read_blob(
        &self,
        endpoint: &NodeEndpoint,
        token: &str,
        blob_id: &str,
    ) -> Result<BlobReader>;

    async fn delete_blob(&self, endpoint: &NodeEndpoint, token: &str, blob_id: &str)
    -> Result<()>;

    /// Drops any per-node state kept for `endpoint` once the panel stops using it.
    fn forget(&self, _endpoint: &NodeEndpoint) {}
}

pub type DynTransport = dyn NodeTransport;
