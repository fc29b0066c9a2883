//! Splitvault storage node - an authenticated store of opaque encrypted blobs

pub mod blob_store;
pub mod config;
pub mod error;
pub mod pairing;
pub mod server;
pub mod tls;

pub use blob_store::BlobStore;
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use pairing::PairingState;
pub use server::{NodeState, build_router, run_node};
