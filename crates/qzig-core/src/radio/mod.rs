//! Radio collaborator interface
//!
//! The mesh stack itself lives outside this workspace. The bridge only
//! sees it through these traits:
//!
//! - [`RadioController`] - the coordinator (device list, permit join, removal)
//! - [`LiveDevice`] - one joined device with its endpoints
//! - [`Cluster`] - one cluster on an endpoint (attribute reads/writes, commands)
//!
//! Radio callbacks are delivered as [`RadioEvent`]s on a broadcast channel
//! obtained from [`RadioController::subscribe`].

mod config;
mod error;
pub mod mock;

pub use config::{
    MockDeviceConfig, MockEndpointConfig, MockRadioConfig, RadioConfig, SerialConfig,
};
pub use error::{RadioError, RadioResult};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Cluster id of the basic information cluster
pub const BASIC_CLUSTER: u16 = 0x0000;

/// Cluster id of the over-the-air upgrade cluster
pub const OTA_CLUSTER: u16 = 0x0019;

pub const STATUS_SUCCESS: u8 = 0x00;
/// ZCL status for an attribute the device does not implement
pub const STATUS_UNSUPPORTED_ATTRIBUTE: u8 = 0x86;
pub const STATUS_ABORT: u8 = 0x95;
pub const STATUS_NO_IMAGE_AVAILABLE: u8 = 0x98;

/// Decoded attribute value as delivered by the radio stack
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
}

impl AttrValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Bool(b) => Some(i64::from(*b)),
            AttrValue::Int(i) => Some(*i),
            AttrValue::Float(f) => Some(*f as i64),
            AttrValue::Text(s) => s.trim().parse().ok(),
            AttrValue::Bytes(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(f) => Some(*f),
            AttrValue::Text(s) => s.trim().parse().ok(),
            other => other.as_i64().map(|i| i as f64),
        }
    }
}

/// String form used for state data; byte strings are decoded as UTF-8
impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{}", u8::from(*b)),
            AttrValue::Int(i) => write!(f, "{}", i),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            AttrValue::Text(s) => f.write_str(s),
        }
    }
}

/// Result of a read attributes request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadAttributes {
    /// Values by attribute id
    pub values: BTreeMap<u16, AttrValue>,
    /// ZCL status by attribute id for attributes that could not be read
    pub failures: BTreeMap<u16, u8>,
}

/// Per-attribute result of a write attributes request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStatus {
    pub attribute: u16,
    pub status: u8,
}

/// Cluster commands issued by value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterCommand {
    On,
    Off,
    Identify { seconds: u16 },
    ResetAllAlarms,
    SetLongPollInterval(u32),
    SetShortPollInterval(u16),
    FastPollStop,
}

/// Answer to a request the device sent to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterResponse {
    QueryNextImage {
        status: u8,
        manufacturer: u16,
        image_type: u16,
        version: u32,
        size: u32,
    },
    ImageBlock {
        status: u8,
        manufacturer: u16,
        image_type: u16,
        version: u32,
        offset: u32,
        data: Vec<u8>,
    },
    UpgradeEnd {
        manufacturer: u16,
        image_type: u16,
        version: u32,
        current_time: u32,
        upgrade_time: u32,
    },
}

/// Default response of a cluster command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    /// Value echoed by the device (e.g. the new on/off state)
    pub value: AttrValue,
    /// ZCL status, 0 means success
    pub status: u8,
}

impl CommandReply {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// One cluster on an endpoint
#[async_trait]
pub trait Cluster: Send + Sync {
    fn cluster_id(&self) -> u16;

    async fn read_attributes(
        &self,
        attributes: &[u16],
        manufacturer: Option<u16>,
    ) -> RadioResult<ReadAttributes>;

    async fn write_attributes(
        &self,
        values: &[(u16, AttrValue)],
        manufacturer: Option<u16>,
    ) -> RadioResult<Vec<WriteStatus>>;

    async fn command(&self, command: ClusterCommand) -> RadioResult<CommandReply>;

    /// Answer the device's request with sequence number `tsn`
    async fn respond(&self, tsn: u8, response: ClusterResponse) -> RadioResult<()>;
}

/// One endpoint of a live device
#[derive(Clone)]
pub struct Endpoint {
    pub id: u8,
    pub in_clusters: Vec<Arc<dyn Cluster>>,
    pub out_clusters: Vec<Arc<dyn Cluster>>,
}

impl Endpoint {
    pub fn in_cluster(&self, id: u16) -> Option<&Arc<dyn Cluster>> {
        self.in_clusters.iter().find(|c| c.cluster_id() == id)
    }

    /// Input clusters followed by output clusters
    pub fn clusters(&self) -> impl Iterator<Item = &Arc<dyn Cluster>> {
        self.in_clusters.iter().chain(self.out_clusters.iter())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |clusters: &[Arc<dyn Cluster>]| {
            clusters.iter().map(|c| c.cluster_id()).collect::<Vec<_>>()
        };
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("in_clusters", &ids(&self.in_clusters))
            .field("out_clusters", &ids(&self.out_clusters))
            .finish()
    }
}

/// A device currently known to the radio stack
#[async_trait]
pub trait LiveDevice: Send + Sync {
    /// Hardware address, e.g. `00:0d:6f:00:0a:90:69:e7`
    fn ieee(&self) -> &str;

    fn manufacturer_code(&self) -> Option<u16>;

    /// Endpoints in ascending id order, endpoint 0 included when present
    fn endpoints(&self) -> Vec<Endpoint>;

    /// Ask the device to report this cluster to the coordinator
    async fn bind(&self, endpoint: u8, cluster: u16) -> RadioResult<()>;

    /// Ask the device to leave the mesh
    async fn leave(&self) -> RadioResult<()>;
}

/// Callbacks from the radio stack
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    DeviceJoined {
        ieee: String,
    },
    DeviceLeft {
        ieee: String,
    },
    DeviceInitialized {
        ieee: String,
    },
    DeviceRemoved {
        ieee: String,
    },
    AttributeUpdated {
        ieee: String,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        value: AttrValue,
    },
    ClusterCommand {
        ieee: String,
        endpoint: u8,
        cluster: u16,
        tsn: u8,
        command_id: u8,
        args: Vec<AttrValue>,
    },
    ZdoCommand {
        ieee: String,
        command_id: u16,
        args: Vec<AttrValue>,
    },
}

/// The mesh coordinator
#[async_trait]
pub trait RadioController: Send + Sync {
    /// Open the radio transport
    async fn connect(&self) -> RadioResult<()>;

    fn devices(&self) -> Vec<Arc<dyn LiveDevice>>;

    fn get_device(&self, ieee: &str) -> Option<Arc<dyn LiveDevice>>;

    /// Allow new devices to join for `seconds`
    async fn permit(&self, seconds: u8) -> RadioResult<()>;

    /// Allow one device to join using its install code
    async fn permit_with_key(&self, node: &[u8], code: &[u8], seconds: u8) -> RadioResult<()>;

    /// Forget a device
    async fn remove(&self, ieee: &str) -> RadioResult<()>;

    /// Subscribe to radio callbacks
    fn subscribe(&self) -> broadcast::Receiver<RadioEvent>;
}

/// Create a radio controller from configuration
pub fn create_radio(config: &RadioConfig) -> RadioResult<Arc<dyn RadioController>> {
    match config {
        RadioConfig::Serial(cfg) => Err(RadioError::Unsupported(format!(
            "no serial radio driver linked for {} at {} baud",
            cfg.device, cfg.baudrate
        ))),
        RadioConfig::Mock(cfg) => Ok(Arc::new(mock::MockRadio::from_config(cfg))),
    }
}
