use serde::{Deserialize, Serialize};
use splitvault_core::{
    DEFAULT_MAX_CONCURRENT_TRANSFERS, DEFAULT_SHARD_SIZE, PlacementConfig, Permissions, Result,
    TransportConfig, VaultError,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Largest plaintext part, in bytes.
    #[serde(default = "default_shard_size")]
    pub shard_size: u64,
    /// Put at least one part on every reachable node.
    #[serde(default = "default_force_spreading")]
    pub force_spreading: bool,
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shard_size: default_shard_size(),
            force_spreading: default_force_spreading(),
            max_concurrent_transfers: default_max_concurrent_transfers(),
        }
    }
}

impl StorageConfig {
    pub fn placement(&self) -> PlacementConfig {
        PlacementConfig {
            shard_size: self.shard_size,
            force_spreading: self.force_spreading,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    /// How often every node is re-probed in the background.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl TransportSettings {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Packed permission code, e.g. `777`.
    #[serde(default = "default_permissions")]
    pub permissions: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/panel.sqlite3")
}

fn default_shard_size() -> u64 {
    DEFAULT_SHARD_SIZE
}

fn default_force_spreading() -> bool {
    true
}

fn default_max_concurrent_transfers() -> usize {
    DEFAULT_MAX_CONCURRENT_TRANSFERS
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_transfer_timeout_secs() -> u64 {
    300
}

fn default_probe_interval_secs() -> u64 {
    60
}

fn default_permissions() -> u16 {
    Permissions::ALL
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("SPLITVAULT").separator("__"))
            .build()
            .map_err(|e| VaultError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| VaultError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.shard_size == 0 {
            return Err(VaultError::Config(
                "storage.shard_size must be positive".to_string(),
            ));
        }
        if self.storage.max_concurrent_transfers == 0 {
            return Err(VaultError::Config(
                "storage.max_concurrent_transfers must be positive".to_string(),
            ));
        }
        if self.transport.probe_interval_secs == 0 {
            return Err(VaultError::Config(
                "transport.probe_interval_secs must be positive".to_string(),
            ));
        }
        for (index, api_key) in self.api_keys.iter().enumerate() {
            if api_key.key.trim().is_empty() {
                return Err(VaultError::Config(format!(
                    "api_keys[{}].key cannot be empty",
                    index
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("panel.yaml");
        std::fs::write(
            &path,
            "bind_addr: 127.0.0.1:4000\napi_keys:\n  - key: secret\n    permissions: 100\n",
        )
        .expect("write");

        let config = Config::from_file(path.to_str().expect("utf8")).expect("config");
        assert_eq!(config.bind_addr, "127.0.0.1:4000");
        assert_eq!(config.storage.shard_size, DEFAULT_SHARD_SIZE);
        assert!(config.storage.force_spreading);
        assert_eq!(config.api_keys[0].permissions, 100);
        assert_eq!(config.transport.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn zero_shard_size_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("panel.yaml");
        std::fs::write(&path, "storage:\n  shard_size: 0\n").expect("write");

        assert!(matches!(
            Config::from_file(path.to_str().expect("utf8")),
            Err(VaultError::Config(_))
        ));
    }
}
