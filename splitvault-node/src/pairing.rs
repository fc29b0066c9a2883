use crate::error::{NodeError, Result};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Pairing {
    token: Option<String>,
    panel_ips: HashSet<IpAddr>,
}

/// The node's binding to exactly one panel.
///
/// The token is persisted so a restart keeps the pairing. The set of panel
/// addresses lives in memory only and is rebuilt by the panel's periodic
/// `/init` calls.
pub struct PairingState {
    token_path: PathBuf,
    inner: RwLock<Pairing>,
}

impl PairingState {
    pub async fn load(token_path: impl Into<PathBuf>) -> Result<Self> {
        let token_path = token_path.into();
        let token = match tokio::fs::read_to_string(&token_path).await {
            Ok(contents) => Some(contents.trim().to_string()).filter(|t| !t.is_empty()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
            Err(error) => return Err(error.into()),
        };

        if token.is_some() {
            tracing::info!("Loaded panel pairing from {:?}", token_path);
        }

        Ok(Self {
            token_path,
            inner: RwLock::new(Pairing {
                token,
                panel_ips: HashSet::new(),
            }),
        })
    }

    pub async fn is_paired(&self) -> bool {
        self.inner.read().await.token.is_some()
    }

    /// Accepts `token` if the node is unpaired or already paired with the
    /// same token, and remembers `ip` as a panel address.
    pub async fn pair(&self, token: &str, ip: IpAddr) -> Result<()> {
        if token.is_empty() {
            return Err(NodeError::InvalidBody);
        }

        let mut inner = self.inner.write().await;
        match inner.token.as_deref() {
            Some(stored) if stored != token => return Err(NodeError::Forbidden),
            Some(_) => {}
            None => {
                if let Some(parent) = self.token_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&self.token_path, token).await?;
                inner.token = Some(token.to_string());
                tracing::info!("Paired with panel at {}", ip);
            }
        }

        if inner.panel_ips.insert(ip) {
            tracing::debug!("Recorded panel address {}", ip);
        }
        Ok(())
    }

    pub async fn unpair(&self, token: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.token.as_deref() {
            None => return Err(NodeError::NotPaired),
            Some(stored) if stored != token => return Err(NodeError::Forbidden),
            Some(_) => {}
        }

        match tokio::fs::remove_file(&self.token_path).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        inner.token = None;
        inner.panel_ips.clear();
        tracing::info!("Unpaired from panel");
        Ok(())
    }

    /// Blob calls need the paired token from an address seen during pairing.
    pub async fn authorize(&self, token: &str, ip: IpAddr) -> Result<()> {
        let inner = self.inner.read().await;
        let Some(stored) = inner.token.as_deref() else {
            return Err(NodeError::NotPaired);
        };
        if stored != token || !inner.panel_ips.contains(&ip) {
            return Err(NodeError::Forbidden);
        }
        Ok(())
    }
}
