//! Daemon configuration file

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use qzig_bridge::BridgeConfig;
use qzig_core::models::DEFAULT_NETWORK_NAME;
use qzig_core::radio::RadioConfig;
use qzig_core::{NodePath, Store};
use qzig_rpc::ConnectionOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkSection,
    pub store: StoreSection,
    pub rpc: RpcSection,
    pub radio: RadioSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Network id on the remote server; the persisted one is used when unset
    pub id: Option<String>,
    pub name: String,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            id: None,
            name: DEFAULT_NETWORK_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// The tree is persisted below `<root>/store`
    pub root: PathBuf,
    /// Upgrade images; relative paths are below `root`
    pub ota_dir: PathBuf,
}

impl StoreSection {
    pub fn ota_dir(&self) -> PathBuf {
        self.root.join(&self.ota_dir)
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            ota_dir: PathBuf::from("ota"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    pub host: String,
    pub port: u16,
    /// 0 waits forever
    pub request_timeout_secs: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 21005,
            request_timeout_secs: 30,
        }
    }
}

impl RpcSection {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            request_timeout: seconds(self.request_timeout_secs),
        }
    }
}

/// `type` selects the driver; the remaining keys belong to it
#[derive(Debug, Clone, Deserialize)]
pub struct RadioSection {
    #[serde(flatten)]
    pub driver: RadioConfig,
    /// 0 waits forever
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_bind")]
    pub bind: bool,
}

fn default_command_timeout() -> u64 {
    10
}

fn default_bind() -> bool {
    true
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            driver: RadioConfig::default(),
            command_timeout_secs: default_command_timeout(),
            bind: default_bind(),
        }
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The configured network id, else the persisted one, else a new one
    pub fn network_id(&self, store: &Store) -> String {
        if let Some(id) = self.network.id.as_ref().filter(|id| !id.is_empty()) {
            return id.clone();
        }
        let persisted = store
            .load_record(&NodePath::network(""))
            .ok()
            .flatten()
            .and_then(|record| record.data.get(":id")?.as_str().map(str::to_string));
        match persisted {
            Some(id) => {
                tracing::info!(network = %id, "Using persisted network id");
                id
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                tracing::warn!(network = %id, "No network id configured, created a new one");
                id
            }
        }
    }

    pub fn bridge_config(&self, network_id: String) -> BridgeConfig {
        BridgeConfig {
            network_id,
            network_name: self.network.name.clone(),
            command_timeout: seconds(self.radio.command_timeout_secs),
            bind: self.radio.bind,
            ota_dir: self.store.ota_dir(),
        }
    }
}
