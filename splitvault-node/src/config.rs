use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Host name or IP the panel uses to reach this node. It becomes the
    /// subject of the TLS leaf certificate.
    #[serde(default = "default_common_name")]
    pub common_name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            common_name: default_common_name(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_common_name() -> String {
    "127.0.0.1".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl NodeConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(::config::Environment::with_prefix("SPLITVAULT_NODE").separator("__"))
            .build()
            .map_err(|e| NodeError::Config(e.to_string()))?;

        let config: NodeConfig = settings
            .try_deserialize()
            .map_err(|e| NodeError::Config(e.to_string()))?;

        if config.common_name.trim().is_empty() {
            return Err(NodeError::Config("common_name cannot be empty".to_string()));
        }
        Ok(config)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn token_path(&self) -> PathBuf {
        self.keys_dir().join("panel.token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent");
        let config = NodeConfig::from_file(path.to_str().expect("utf8")).expect("config");
        assert_eq!(config.bind_addr, "0.0.0.0:3001");
        assert_eq!(config.token_path(), PathBuf::from("data/keys/panel.token"));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("node.yaml");
        std::fs::write(&path, "common_name: storage-1.lan\ndata_dir: /srv/vault\n")
            .expect("write");

        let config = NodeConfig::from_file(path.to_str().expect("utf8")).expect("config");
        assert_eq!(config.common_name, "storage-1.lan");
        assert_eq!(config.blobs_dir(), PathBuf::from("/srv/vault/blobs"));
    }
}
