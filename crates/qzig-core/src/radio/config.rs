//! Radio configuration

use serde::{Deserialize, Serialize};

/// Radio driver selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RadioConfig {
    /// External serial coordinator
    Serial(SerialConfig),
    /// In-memory radio for demos and tests
    Mock(MockRadioConfig),
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self::Mock(MockRadioConfig::default())
    }
}

/// Serial coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// Radio stack's own device database
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baudrate: default_baudrate(),
            database: default_database(),
        }
    }
}

fn default_device() -> String {
    "/dev/ttyACM1".to_string()
}

fn default_baudrate() -> u32 {
    57600
}

fn default_database() -> String {
    "qzig.db".to_string()
}

/// Mock radio settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockRadioConfig {
    /// Simulated latency of every radio call in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Devices present at startup
    #[serde(default)]
    pub devices: Vec<MockDeviceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockDeviceConfig {
    pub ieee: String,
    #[serde(default)]
    pub manufacturer_code: Option<u16>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<MockEndpointConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockEndpointConfig {
    pub id: u8,
    #[serde(default)]
    pub in_clusters: Vec<u16>,
    #[serde(default)]
    pub out_clusters: Vec<u16>,
}
