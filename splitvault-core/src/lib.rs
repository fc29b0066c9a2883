//! Splitvault Core - sharding, encryption and placement of files across paired storage nodes

pub mod cipher;
pub mod error;
pub mod node;
pub mod operations;
pub mod permissions;
pub mod placement;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use cipher::{
    BlobBody, BlobReader, ChunkTransform, ContentKey, PartCipher, PartNonce, decrypt_reader,
    encrypt_body, generate_auth_token,
};
pub use error::{Result, VaultError};
pub use node::{Node, NodeAddress, NodeConnection, NodeEndpoint, NodeView};
pub use operations::*;
pub use permissions::{FileCapabilities, NodeCapabilities, Permissions, UserCapabilities};
pub use placement::{
    DEFAULT_SHARD_SIZE, NodeSelector, PlacementConfig, ShardPlan, UniformRandomSelector,
};
pub use registry::{ListNodesOptions, NodeRegistry};
pub use session::{DownloadGuard, SessionRegistry};
pub use storage::{FileRecord, FileState, MetadataStore, PartRecord, clean_path};
pub use transport::{DynTransport, HttpNodeTransport, NodeTransport, TransportConfig};
#[cfg(any(test, feature = "test-support"))]
pub use transport::MemoryTransport;
