use crate::cipher::ContentKey;
use crate::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(VaultError::InvalidRequest(
                "node host cannot be empty".to_string(),
            ));
        }
        if host.contains('/') || host.contains(char::is_whitespace) {
            return Err(VaultError::InvalidRequest(format!(
                "invalid node host: {}",
                host
            )));
        }
        if self.port == 0 {
            return Err(VaultError::InvalidRequest(
                "node port cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("https://[{}]:{}", self.host, self.port)
        } else {
            format!("https://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A paired storage node as persisted by the panel.
#[derive(Clone)]
pub struct Node {
    pub id: String,
    pub address: NodeAddress,
    pub ca_cert: String,
    pub content_key: ContentKey,
    pub auth_token: String,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint {
            node_id: self.id.clone(),
            address: self.address.clone(),
            ca_cert: self.ca_cert.clone(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Where and how to reach a node over TLS.
#[derive(Debug, Clone)]
pub struct NodeEndpoint {
    pub node_id: String,
    pub address: NodeAddress,
    pub ca_cert: String,
}

/// A node as reported by a registry listing. Sensitive fields are only
/// populated when the caller asked for them.
#[derive(Clone)]
pub struct NodeView {
    pub id: String,
    pub connected: bool,
    pub connection: Option<NodeConnection>,
    pub content_key: Option<ContentKey>,
}

#[derive(Debug, Clone)]
pub struct NodeConnection {
    pub address: NodeAddress,
    pub ca_cert: String,
    pub auth_token: String,
}

impl fmt::Debug for NodeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeView")
            .field("id", &self.id)
            .field("connected", &self.connected)
            .field(
                "address",
                &self.connection.as_ref().map(|conn| conn.address.to_string()),
            )
            .finish_non_exhaustive()
    }
}
