//! Node registry
//!
//! Durable record of paired storage nodes. Liveness is never stored: it is
//! recomputed by probing each node's pairing endpoint with the token the
//! panel already holds, which the node accepts as an idempotent re-pair.

use crate::cipher::{ContentKey, generate_auth_token};
use crate::error::{Result, VaultError};
use crate::node::{Node, NodeAddress, NodeConnection, NodeView};
use crate::storage::MetadataStore;
use crate::transport::{DynTransport, http::validate_ca_pem};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Which nodes and which fields a listing exposes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListNodesOptions {
    pub only_connected: bool,
    pub include_connection_details: bool,
    pub include_content_key: bool,
}

pub struct NodeRegistry {
    store: Arc<MetadataStore>,
    transport: Arc<DynTransport>,
    probe_timeout: Duration,
}

impl NodeRegistry {
    pub fn new(store: Arc<MetadataStore>, transport: Arc<DynTransport>) -> Self {
        Self {
            store,
            transport,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn transport(&self) -> Arc<DynTransport> {
        self.transport.clone()
    }

    /// Runs the trust handshake against a fresh node and records it on success.
    pub async fn pair(&self, address: NodeAddress, ca_cert: String) -> Result<Node> {
        address.validate()?;
        validate_ca_pem(&ca_cert)?;

        let node = Node {
            id: ulid::Ulid::new().to_string(),
            address,
            ca_cert,
            content_key: ContentKey::generate(),
            auth_token: generate_auth_token(),
            created_at: Utc::now(),
        };

        self.transport
            .pair(&node.endpoint(), &node.auth_token)
            .await?;
        self.store.insert_node(&node)?;

        tracing::info!("Paired node: id={} address={}", node.id, node.address);
        Ok(node)
    }

    /// Moves a node to a new address, re-running the handshake with its existing token.
    pub async fn reconfigure(
        &self,
        node_id: &str,
        address: NodeAddress,
        ca_cert: String,
        force: bool,
    ) -> Result<Node> {
        address.validate()?;
        validate_ca_pem(&ca_cert)?;

        let mut node = self.get(node_id)?;
        let previous = node.endpoint();
        node.address = address;
        node.ca_cert = ca_cert;

        if let Err(error) = self
            .transport
            .pair(&node.endpoint(), &node.auth_token)
            .await
        {
            if !force {
                tracing::warn!(
                    "Handshake with new node address failed: id={} address={} error={}",
                    node.id,
                    node.address,
                    error
                );
                return Err(error);
            }
            tracing::warn!(
                "Forcing node address change despite failed handshake: id={} address={} error={}",
                node.id,
                node.address,
                error
            );
        }

        if !self
            .store
            .update_node_address(&node.id, &node.address, &node.ca_cert)?
        {
            return Err(VaultError::NodeNotFound(node_id.to_string()));
        }
        if previous.ca_cert != node.ca_cert {
            self.transport.forget(&previous);
        }

        tracing::info!("Reconfigured node: id={} address={}", node.id, node.address);
        Ok(node)
    }

    /// Releases the node's pairing and forgets it.
    pub async fn unpair(&self, node_id: &str, force: bool) -> Result<()> {
        let node = self.get(node_id)?;

        if let Err(error) = self
            .transport
            .unpair(&node.endpoint(), &node.auth_token)
            .await
        {
            if !force {
                return Err(error);
            }
            tracing::warn!(
                "Removing node despite failed unpair: id={} error={}",
                node.id,
                error
            );
        }

        let orphaned = self.store.count_parts_on_node(&node.id)?;
        if orphaned > 0 {
            tracing::warn!(
                "Removed node still holds parts: id={} parts={}",
                node.id,
                orphaned
            );
        }

        self.store.delete_node(&node.id)?;
        self.transport.forget(&node.endpoint());
        tracing::info!("Unpaired node: id={}", node.id);
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Result<Node> {
        self.store
            .get_node(node_id)?
            .ok_or_else(|| VaultError::NodeNotFound(node_id.to_string()))
    }

    pub fn list_all(&self) -> Result<Vec<Node>> {
        self.store.list_nodes()
    }

    /// Probes every node concurrently and reports who answered.
    pub async fn probe_all(&self) -> Result<Vec<(Node, bool)>> {
        let nodes = self.store.list_nodes()?;

        let probes = nodes.iter().map(|node| self.is_reachable(node));
        let connected = join_all(probes).await;

        Ok(nodes.into_iter().zip(connected).collect())
    }

    /// Full node records of every node that answered a probe.
    pub async fn reachable_nodes(&self) -> Result<Vec<Node>> {
        Ok(self
            .probe_all()
            .await?
            .into_iter()
            .filter_map(|(node, connected)| connected.then_some(node))
            .collect())
    }

    pub async fn list_reachable(&self, options: ListNodesOptions) -> Result<Vec<NodeView>> {
        let probed = self.probe_all().await?;

        Ok(probed
            .into_iter()
            .filter(|(_, connected)| *connected || !options.only_connected)
            .map(|(node, connected)| NodeView {
                connection: options.include_connection_details.then(|| NodeConnection {
                    address: node.address.clone(),
                    ca_cert: node.ca_cert.clone(),
                    auth_token: node.auth_token.clone(),
                }),
                content_key: options
                    .include_content_key
                    .then(|| node.content_key.clone()),
                id: node.id,
                connected,
            })
            .collect())
    }

    /// Re-offers the node its own token under the probe timeout.
    pub async fn is_reachable(&self, node: &Node) -> bool {
        let endpoint = node.endpoint();
        let probe = self.transport.pair(&endpoint, &node.auth_token);

        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                tracing::debug!("Node probe failed: id={} error={}", node.id, error);
                false
            }
            Err(_) => {
                tracing::debug!("Node probe timed out: id={}", node.id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ca_pem;
    use crate::transport::MemoryTransport;

    fn registry() -> (tempfile::TempDir, Arc<MemoryTransport>, NodeRegistry) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MetadataStore::new(dir.path().join("panel.sqlite3")).expect("store"));
        let transport = Arc::new(MemoryTransport::new());
        let registry = NodeRegistry::new(store, transport.clone());
        (dir, transport, registry)
    }

    #[tokio::test]
    async fn failed_handshake_persists_nothing() {
        let (_dir, _transport, registry) = registry();
        let result = registry
            .pair(NodeAddress::new("offline", 3001), test_ca_pem())
            .await;

        assert!(matches!(result, Err(VaultError::Connectivity(_))));
        assert!(registry.list_all().expect("list").is_empty());
    }

    #[tokio::test]
    async fn only_one_panel_can_pair_a_node() {
        let (dir, transport, first) = registry();
        let address = NodeAddress::new("node-a", 3001);
        transport.add_node(&address);

        let node = first
            .pair(address.clone(), test_ca_pem())
            .await
            .expect("pair");
        assert_eq!(
            transport.paired_token(&address).as_deref(),
            Some(node.auth_token.as_str())
        );

        let other_store =
            Arc::new(MetadataStore::new(dir.path().join("other.sqlite3")).expect("store"));
        let second = NodeRegistry::new(other_store, transport.clone());
        let result = second.pair(address.clone(), test_ca_pem()).await;
        assert!(matches!(result, Err(VaultError::Unauthorized(_))));
        assert!(second.list_all().expect("list").is_empty());

        first.unpair(&node.id, false).await.expect("unpair");
        second
            .pair(address, test_ca_pem())
            .await
            .expect("pair after release");
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_call() {
        let (_dir, _transport, registry) = registry();
        assert!(matches!(
            registry
                .pair(NodeAddress::new("", 3001), test_ca_pem())
                .await,
            Err(VaultError::InvalidRequest(_))
        ));
        assert!(matches!(
            registry
                .pair(NodeAddress::new("node-a", 3001), String::new())
                .await,
            Err(VaultError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn reconfigure_keeps_old_address_unless_forced() {
        let (_dir, transport, registry) = registry();
        let address = NodeAddress::new("node-a", 3001);
        transport.add_node(&address);
        let node = registry
            .pair(address.clone(), test_ca_pem())
            .await
            .expect("pair");

        let moved = NodeAddress::new("node-b", 3002);
        let result = registry
            .reconfigure(&node.id, moved.clone(), test_ca_pem(), false)
            .await;
        assert!(result.is_err());
        assert_eq!(registry.get(&node.id).expect("get").address, address);

        registry
            .reconfigure(&node.id, moved.clone(), test_ca_pem(), true)
            .await
            .expect("forced");
        let stored = registry.get(&node.id).expect("get");
        assert_eq!(stored.address, moved);
        assert_eq!(stored.auth_token, node.auth_token);
    }

    #[tokio::test]
    async fn reconfigure_reuses_the_existing_token() {
        let (_dir, transport, registry) = registry();
        let address = NodeAddress::new("node-a", 3001);
        transport.add_node(&address);
        let node = registry
            .pair(address, test_ca_pem())
            .await
            .expect("pair");

        let moved = NodeAddress::new("node-a.lan", 3001);
        transport.add_node(&moved);
        registry
            .reconfigure(&node.id, moved.clone(), test_ca_pem(), false)
            .await
            .expect("reconfigure");
        assert_eq!(
            transport.paired_token(&moved).as_deref(),
            Some(node.auth_token.as_str())
        );
    }

    #[tokio::test]
    async fn unpair_failure_keeps_row_unless_forced() {
        let (_dir, transport, registry) = registry();
        let address = NodeAddress::new("node-a", 3001);
        transport.add_node(&address);
        let node = registry
            .pair(address.clone(), test_ca_pem())
            .await
            .expect("pair");

        transport.set_offline(&address, true);
        assert!(registry.unpair(&node.id, false).await.is_err());
        assert!(registry.get(&node.id).is_ok());

        registry.unpair(&node.id, true).await.expect("forced");
        assert!(matches!(
            registry.get(&node.id),
            Err(VaultError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn retired_endpoints_are_forgotten_by_the_transport() {
        let (_dir, transport, registry) = registry();
        let address = NodeAddress::new("node-a", 3001);
        transport.add_node(&address);
        let node = registry
            .pair(address.clone(), test_ca_pem())
            .await
            .expect("pair");

        // same CA at a new address keeps the pinned client
        let moved = NodeAddress::new("node-a.lan", 3001);
        transport.add_node(&moved);
        registry
            .reconfigure(&node.id, moved.clone(), test_ca_pem(), false)
            .await
            .expect("reconfigure");
        assert!(transport.forgotten().is_empty());

        let key = rcgen::KeyPair::generate().expect("key pair");
        let mut params = rcgen::CertificateParams::new(vec!["rotated".to_string()]).expect("params");
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let rotated = params.self_signed(&key).expect("self signed").pem();
        registry
            .reconfigure(&node.id, moved.clone(), rotated.clone(), false)
            .await
            .expect("new CA");
        let forgotten = transport.forgotten();
        assert_eq!(forgotten.len(), 1);
        assert_eq!(forgotten[0].ca_cert, test_ca_pem());

        registry.unpair(&node.id, false).await.expect("unpair");
        let forgotten = transport.forgotten();
        assert_eq!(forgotten.len(), 2);
        assert_eq!(forgotten[1].address, moved);
        assert_eq!(forgotten[1].ca_cert, rotated);
    }

    #[tokio::test]
    async fn listing_reports_liveness_and_hides_secrets_by_default() {
        let (_dir, transport, registry) = registry();
        let up = NodeAddress::new("node-up", 3001);
        let down = NodeAddress::new("node-down", 3001);
        transport.add_node(&up);
        transport.add_node(&down);
        registry
            .pair(up.clone(), test_ca_pem())
            .await
            .expect("pair");
        let lost = registry
            .pair(down.clone(), test_ca_pem())
            .await
            .expect("pair");
        transport.set_offline(&down, true);

        let all = registry
            .list_reachable(ListNodesOptions::default())
            .await
            .expect("list");
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|view| view.connection.is_none() && view.content_key.is_none()));
        let offline = all.iter().find(|view| view.id == lost.id).expect("view");
        assert!(!offline.connected);

        let reachable = registry
            .list_reachable(ListNodesOptions {
                only_connected: true,
                include_connection_details: true,
                include_content_key: true,
            })
            .await
            .expect("list");
        assert_eq!(reachable.len(), 1);
        let view = &reachable[0];
        assert!(view.connected);
        assert_eq!(
            view.connection.as_ref().map(|conn| conn.address.clone()),
            Some(up)
        );
        assert!(view.content_key.is_some());
    }
}
