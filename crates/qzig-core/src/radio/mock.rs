//! In-memory radio for demos and tests
//!
//! Devices are added explicitly (or from [`MockRadioConfig`]); every call
//! made against the radio, its devices and clusters is recorded so tests
//! can assert on it. Radio callbacks are injected with [`MockRadio::emit`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{
    AttrValue, Cluster, ClusterCommand, ClusterResponse, CommandReply, Endpoint, LiveDevice,
    MockRadioConfig, RadioController, RadioError, RadioEvent, RadioResult, ReadAttributes,
    WriteStatus, BASIC_CLUSTER, STATUS_UNSUPPORTED_ATTRIBUTE,
};

/// Controller-level call recorded by the mock radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Connect,
    Permit(u8),
    PermitWithKey {
        node: Vec<u8>,
        code: Vec<u8>,
        seconds: u8,
    },
    Remove(String),
}

/// Attributes a freshly created mock cluster starts with
fn default_attributes(cluster: u16) -> BTreeMap<u16, AttrValue> {
    let pairs: &[(u16, i64)] = match cluster {
        0x0001 => &[(0x0020, 30)],
        0x0006 => &[(0x0000, 0), (0x4001, 0)],
        0x0020 => &[(0x0000, 14400), (0x0001, 20), (0x0002, 2), (0x0003, 40)],
        0x0402 => &[(0x0000, 2150)],
        0x0405 => &[(0x0000, 4520)],
        0x0B05 => &[(0x011D, -60)],
        0xFC00 => &[(0x0000, 1)],
        0x0019 => &[(0x0006, 0)],
        _ => &[],
    };
    pairs
        .iter()
        .map(|(id, v)| (*id, AttrValue::Int(*v)))
        .collect()
}

/// Mock cluster with an attribute table
pub struct MockCluster {
    id: u16,
    attributes: RwLock<BTreeMap<u16, AttrValue>>,
    commands: RwLock<Vec<ClusterCommand>>,
    responses: RwLock<Vec<(u8, ClusterResponse)>>,
    writes: RwLock<Vec<(u16, AttrValue)>>,
    reads: AtomicUsize,
    failure: RwLock<Option<RadioError>>,
}

impl MockCluster {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            attributes: RwLock::new(default_attributes(id)),
            commands: RwLock::new(Vec::new()),
            responses: RwLock::new(Vec::new()),
            writes: RwLock::new(Vec::new()),
            reads: AtomicUsize::new(0),
            failure: RwLock::new(None),
        }
    }

    pub fn set_attribute(&self, id: u16, value: AttrValue) {
        self.attributes.write().insert(id, value);
    }

    pub fn attribute(&self, id: u16) -> Option<AttrValue> {
        self.attributes.read().get(&id).cloned()
    }

    /// Commands received so far
    pub fn commands(&self) -> Vec<ClusterCommand> {
        self.commands.read().clone()
    }

    /// Responses sent to the device so far, with their sequence numbers
    pub fn responses(&self) -> Vec<(u8, ClusterResponse)> {
        self.responses.read().clone()
    }

    /// Attribute writes received so far
    pub fn writes(&self) -> Vec<(u16, AttrValue)> {
        self.writes.read().clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make every following call fail with `error` (or succeed again with `None`)
    pub fn fail_with(&self, error: Option<RadioError>) {
        *self.failure.write() = error;
    }

    fn check_failure(&self) -> RadioResult<()> {
        match self.failure.read().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Cluster for MockCluster {
    fn cluster_id(&self) -> u16 {
        self.id
    }

    async fn read_attributes(
        &self,
        attributes: &[u16],
        _manufacturer: Option<u16>,
    ) -> RadioResult<ReadAttributes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        let table = self.attributes.read();
        let mut result = ReadAttributes::default();
        for id in attributes {
            match table.get(id) {
                Some(value) => {
                    result.values.insert(*id, value.clone());
                }
                None => {
                    result.failures.insert(*id, STATUS_UNSUPPORTED_ATTRIBUTE);
                }
            }
        }
        Ok(result)
    }

    async fn write_attributes(
        &self,
        values: &[(u16, AttrValue)],
        _manufacturer: Option<u16>,
    ) -> RadioResult<Vec<WriteStatus>> {
        self.check_failure()?;

        let mut statuses = Vec::with_capacity(values.len());
        for (id, value) in values {
            self.writes.write().push((*id, value.clone()));
            self.set_attribute(*id, value.clone());
            statuses.push(WriteStatus {
                attribute: *id,
                status: 0,
            });
        }
        Ok(statuses)
    }

    async fn command(&self, command: ClusterCommand) -> RadioResult<CommandReply> {
        self.check_failure()?;
        self.commands.write().push(command);

        let value = match command {
            ClusterCommand::On => {
                self.set_attribute(0, AttrValue::Int(1));
                AttrValue::Int(1)
            }
            ClusterCommand::Off => {
                self.set_attribute(0, AttrValue::Int(0));
                AttrValue::Int(0)
            }
            ClusterCommand::SetLongPollInterval(v) => {
                self.set_attribute(1, AttrValue::Int(i64::from(v)));
                AttrValue::Int(i64::from(v))
            }
            ClusterCommand::SetShortPollInterval(v) => {
                self.set_attribute(2, AttrValue::Int(i64::from(v)));
                AttrValue::Int(i64::from(v))
            }
            ClusterCommand::Identify { .. }
            | ClusterCommand::ResetAllAlarms
            | ClusterCommand::FastPollStop => AttrValue::Int(0),
        };
        Ok(CommandReply { value, status: 0 })
    }

    async fn respond(&self, tsn: u8, response: ClusterResponse) -> RadioResult<()> {
        self.check_failure()?;
        self.responses.write().push((tsn, response));
        Ok(())
    }
}

struct MockEndpoint {
    id: u8,
    in_clusters: Vec<Arc<MockCluster>>,
    out_clusters: Vec<Arc<MockCluster>>,
}

/// Mock device built from endpoints and cluster ids
pub struct MockDevice {
    ieee: String,
    manufacturer_code: Option<u16>,
    endpoints: Vec<MockEndpoint>,
    binds: RwLock<Vec<(u8, u16)>>,
    fail_bind: AtomicBool,
    left: AtomicBool,
}

impl MockDevice {
    pub fn new(ieee: impl Into<String>) -> Self {
        Self {
            ieee: ieee.into(),
            manufacturer_code: None,
            endpoints: Vec::new(),
            binds: RwLock::new(Vec::new()),
            fail_bind: AtomicBool::new(false),
            left: AtomicBool::new(false),
        }
    }

    pub fn with_manufacturer_code(mut self, code: u16) -> Self {
        self.manufacturer_code = Some(code);
        self
    }

    /// Add an endpoint; endpoints are kept in ascending id order
    pub fn with_endpoint(mut self, id: u8, in_clusters: &[u16], out_clusters: &[u16]) -> Self {
        let make = |ids: &[u16]| {
            ids.iter()
                .map(|c| Arc::new(MockCluster::new(*c)))
                .collect::<Vec<_>>()
        };
        self.endpoints.retain(|e| e.id != id);
        self.endpoints.push(MockEndpoint {
            id,
            in_clusters: make(in_clusters),
            out_clusters: make(out_clusters),
        });
        self.endpoints.sort_by_key(|e| e.id);
        self
    }

    /// Populate the basic cluster with device information
    ///
    /// Uses the first endpoint carrying the basic cluster, or adds one on
    /// endpoint 1 when none does.
    pub fn with_basic_info(mut self, manufacturer: &str, product: &str, serial: &str) -> Self {
        if self.basic_cluster().is_none() {
            match self.endpoints.iter().position(|e| e.id == 1) {
                Some(idx) => self.endpoints[idx]
                    .in_clusters
                    .insert(0, Arc::new(MockCluster::new(BASIC_CLUSTER))),
                None => self = self.with_endpoint(1, &[BASIC_CLUSTER], &[]),
            }
        }
        if let Some(basic) = self.basic_cluster() {
            for (id, v) in [(0u16, 3i64), (1, 1), (2, 0), (3, 2)] {
                basic.set_attribute(id, AttrValue::Int(v));
            }
            basic.set_attribute(4, AttrValue::Bytes(manufacturer.as_bytes().to_vec()));
            basic.set_attribute(5, AttrValue::Bytes(product.as_bytes().to_vec()));
            basic.set_attribute(10, AttrValue::Bytes(serial.as_bytes().to_vec()));
        }
        self
    }

    /// Input or output cluster on an endpoint
    pub fn cluster(&self, endpoint: u8, cluster: u16) -> Option<Arc<MockCluster>> {
        let endpoint = self.endpoints.iter().find(|e| e.id == endpoint)?;
        endpoint
            .in_clusters
            .iter()
            .chain(endpoint.out_clusters.iter())
            .find(|c| c.id == cluster)
            .cloned()
    }

    fn basic_cluster(&self) -> Option<Arc<MockCluster>> {
        self.endpoints
            .iter()
            .flat_map(|e| e.in_clusters.iter())
            .find(|c| c.id == BASIC_CLUSTER)
            .cloned()
    }

    /// Bind requests received so far
    pub fn binds(&self) -> Vec<(u8, u16)> {
        self.binds.read().clone()
    }

    pub fn set_fail_bind(&self, fail: bool) {
        self.fail_bind.store(fail, Ordering::SeqCst);
    }

    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveDevice for MockDevice {
    fn ieee(&self) -> &str {
        &self.ieee
    }

    fn manufacturer_code(&self) -> Option<u16> {
        self.manufacturer_code
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        let erase = |clusters: &[Arc<MockCluster>]| {
            clusters
                .iter()
                .map(|c| c.clone() as Arc<dyn Cluster>)
                .collect()
        };
        self.endpoints
            .iter()
            .map(|e| Endpoint {
                id: e.id,
                in_clusters: erase(&e.in_clusters),
                out_clusters: erase(&e.out_clusters),
            })
            .collect()
    }

    async fn bind(&self, endpoint: u8, cluster: u16) -> RadioResult<()> {
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(RadioError::DeliveryFailed(format!(
                "bind {}/0x{:04X} not acknowledged",
                endpoint, cluster
            )));
        }
        self.binds.write().push((endpoint, cluster));
        Ok(())
    }

    async fn leave(&self) -> RadioResult<()> {
        self.left.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock coordinator
pub struct MockRadio {
    latency: Duration,
    connected: AtomicBool,
    devices: RwLock<Vec<Arc<MockDevice>>>,
    events_tx: broadcast::Sender<RadioEvent>,
    calls: RwLock<Vec<RadioCall>>,
    failure: RwLock<Option<RadioError>>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            latency: Duration::ZERO,
            connected: AtomicBool::new(false),
            devices: RwLock::new(Vec::new()),
            events_tx,
            calls: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
        }
    }

    pub fn from_config(config: &MockRadioConfig) -> Self {
        let mut radio = Self::new();
        radio.latency = Duration::from_millis(config.latency_ms);
        for dev in &config.devices {
            let mut device = MockDevice::new(dev.ieee.clone());
            if let Some(code) = dev.manufacturer_code {
                device = device.with_manufacturer_code(code);
            }
            for ep in &dev.endpoints {
                device = device.with_endpoint(ep.id, &ep.in_clusters, &ep.out_clusters);
            }
            if dev.manufacturer.is_some() || dev.product.is_some() || dev.serial.is_some() {
                device = device.with_basic_info(
                    dev.manufacturer.as_deref().unwrap_or_default(),
                    dev.product.as_deref().unwrap_or_default(),
                    dev.serial.as_deref().unwrap_or_default(),
                );
            }
            radio.add_device(Arc::new(device));
        }
        radio
    }

    /// Register a device as joined; an existing device with the same address is replaced
    pub fn add_device(&self, device: Arc<MockDevice>) {
        let mut devices = self.devices.write();
        devices.retain(|d| d.ieee != device.ieee);
        devices.push(device);
    }

    pub fn device(&self, ieee: &str) -> Option<Arc<MockDevice>> {
        self.devices.read().iter().find(|d| d.ieee == ieee).cloned()
    }

    /// Deliver a radio callback to every subscriber
    pub fn emit(&self, event: RadioEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Controller-level calls received so far
    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Make every following controller call fail with `error`
    pub fn fail_with(&self, error: Option<RadioError>) {
        *self.failure.write() = error;
    }

    async fn call(&self, call: RadioCall) -> RadioResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.calls.write().push(call);
        match self.failure.read().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RadioController for MockRadio {
    async fn connect(&self) -> RadioResult<()> {
        self.call(RadioCall::Connect).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn devices(&self) -> Vec<Arc<dyn LiveDevice>> {
        self.devices
            .read()
            .iter()
            .map(|d| d.clone() as Arc<dyn LiveDevice>)
            .collect()
    }

    fn get_device(&self, ieee: &str) -> Option<Arc<dyn LiveDevice>> {
        self.device(ieee).map(|d| d as Arc<dyn LiveDevice>)
    }

    async fn permit(&self, seconds: u8) -> RadioResult<()> {
        self.call(RadioCall::Permit(seconds)).await
    }

    async fn permit_with_key(&self, node: &[u8], code: &[u8], seconds: u8) -> RadioResult<()> {
        self.call(RadioCall::PermitWithKey {
            node: node.to_vec(),
            code: code.to_vec(),
            seconds,
        })
        .await
    }

    async fn remove(&self, ieee: &str) -> RadioResult<()> {
        self.call(RadioCall::Remove(ieee.to_string())).await?;
        let removed = {
            let mut devices = self.devices.write();
            let before = devices.len();
            devices.retain(|d| d.ieee != ieee);
            devices.len() != before
        };
        if !removed {
            return Err(RadioError::DeviceNotFound(ieee.to_string()));
        }
        self.emit(RadioEvent::DeviceRemoved {
            ieee: ieee.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.events_tx.subscribe()
    }
}
