use crate::node::{Node, NodeAddress};
use crate::registry::NodeRegistry;
use crate::storage::MetadataStore;
use crate::transport::MemoryTransport;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use std::sync::{Arc, OnceLock};

/// A real self-signed CA so pinned client construction succeeds.
pub(crate) fn test_ca_pem() -> String {
    static PEM: OnceLock<String> = OnceLock::new();
    PEM.get_or_init(|| {
        let key = KeyPair::generate().expect("key pair");
        let mut params =
            CertificateParams::new(vec!["splitvault-test".to_string()]).expect("params");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.self_signed(&key).expect("self signed").pem()
    })
    .clone()
}

pub(crate) struct Cluster {
    pub _dir: tempfile::TempDir,
    pub store: Arc<MetadataStore>,
    pub transport: Arc<MemoryTransport>,
    pub registry: Arc<NodeRegistry>,
    pub nodes: Vec<Node>,
}

/// A panel with `count` paired in-memory nodes.
pub(crate) async fn cluster(count: usize) -> Cluster {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MetadataStore::new(dir.path().join("panel.sqlite3")).expect("store"));
    let transport = Arc::new(MemoryTransport::new());
    let registry = Arc::new(NodeRegistry::new(store.clone(), transport.clone()));

    let mut nodes = Vec::new();
    for i in 0..count {
        let address = NodeAddress::new(format!("node-{}", i), 3001);
        transport.add_node(&address);
        nodes.push(registry.pair(address, test_ca_pem()).await.expect("pair"));
    }

    Cluster {
        _dir: dir,
        store,
        transport,
        registry,
        nodes,
    }
}
