//! Bridge settings

use std::path::PathBuf;
use std::time::Duration;

use qzig_core::models::DEFAULT_NETWORK_NAME;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Network id used on the remote server
    pub network_id: String,
    /// Name for a network that has none persisted
    pub network_name: String,
    /// Bound on radio calls made on behalf of inbound requests.
    /// `None` waits forever.
    pub command_timeout: Option<Duration>,
    /// Issue bind requests for newly created report values
    pub bind: bool,
    /// Directory upgrade images are served from
    pub ota_dir: PathBuf,
}

impl BridgeConfig {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            ..Default::default()
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            network_id: String::new(),
            network_name: DEFAULT_NETWORK_NAME.to_string(),
            command_timeout: Some(Duration::from_secs(10)),
            bind: true,
            ota_dir: PathBuf::from("ota"),
        }
    }
}
