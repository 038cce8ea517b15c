//! Device: one node of the mesh

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::node::{Node, NodeKind, NodeRecord};
use super::value::{Value, ValueKey};
use crate::error::{ModelError, ModelResult};
use crate::radio::{AttrValue, Cluster, ClusterResponse, LiveDevice, BASIC_CLUSTER};
use crate::registry::ValueRegistry;

pub const DEVICE_URN: &str = "urn:seluxit:xml:bastard:device-1.1";

/// Version of a device whose information has not been read yet
pub const VERSION_UNSET: &str = "N/A";

/// Basic cluster attributes read on first discovery, in two batches
const DEVICE_INFO_BATCHES: [&[u16]; 2] = [&[0, 1, 2, 3, 4, 5], &[10]];

fn device_urn() -> String {
    DEVICE_URN.to_string()
}

fn version_unset() -> String {
    VERSION_UNSET.to_string()
}

fn default_protocol() -> String {
    "ZigBee".to_string()
}

fn default_included() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct DeviceInfo {
    #[serde(rename = ":type", default = "device_urn")]
    pub(super) urn: String,
    #[serde(rename = ":id")]
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
    #[serde(default)]
    pub(super) manufacturer: String,
    #[serde(default)]
    pub(super) product: String,
    #[serde(default = "version_unset")]
    pub(super) version: String,
    #[serde(default)]
    pub(super) serial: String,
    #[serde(default)]
    pub(super) description: String,
    #[serde(default = "default_protocol")]
    pub(super) protocol: String,
    #[serde(default)]
    pub(super) communication: String,
    #[serde(default = "default_included")]
    pub(super) included: String,
}

#[derive(Serialize, Deserialize)]
struct DeviceAttributes {
    ieee: String,
}

pub struct Device {
    pub(super) info: DeviceInfo,
    pub(super) ieee: String,
    pub(super) values: Vec<Value>,
    live: Option<Arc<dyn LiveDevice>>,
}

impl Device {
    pub fn new(ieee: impl Into<String>) -> Self {
        Self {
            info: DeviceInfo {
                urn: device_urn(),
                id: uuid::Uuid::new_v4().to_string(),
                name: String::new(),
                manufacturer: String::new(),
                product: String::new(),
                version: version_unset(),
                serial: String::new(),
                description: String::new(),
                protocol: default_protocol(),
                communication: String::new(),
                included: default_included(),
            },
            ieee: ieee.into(),
            values: Vec::new(),
            live: None,
        }
    }

    /// Rebuild a device from its record and the values found below it
    pub fn load(record: &NodeRecord, values: Vec<Value>) -> ModelResult<Self> {
        let attrs: DeviceAttributes =
            serde_json::from_value(record.attr.clone()).map_err(|source| {
                ModelError::InvalidAttributes {
                    kind: "device",
                    source,
                }
            })?;
        let info: DeviceInfo =
            serde_json::from_value(record.data.clone()).map_err(|source| {
                ModelError::InvalidPayload {
                    kind: "device",
                    source,
                }
            })?;

        let mut device = Self {
            info,
            ieee: attrs.ieee,
            values: Vec::new(),
            live: None,
        };
        for value in values {
            if device.value_by_key(value.key()).is_some() {
                tracing::warn!(
                    ieee = %device.ieee,
                    value = %value.id(),
                    "Dropping value with duplicate key"
                );
                continue;
            }
            device.insert_value(value);
        }
        Ok(device)
    }

    /// Insert keeping values ordered by key; returns the position
    pub(super) fn insert_value(&mut self, value: Value) -> usize {
        let key = value.key();
        let pos = self.values.partition_point(|v| v.key() < key);
        self.values.insert(pos, value);
        pos
    }

    /// Hardware address
    pub fn ieee(&self) -> &str {
        &self.ieee
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn manufacturer(&self) -> &str {
        &self.info.manufacturer
    }

    pub fn product(&self) -> &str {
        &self.info.product
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn serial(&self) -> &str {
        &self.info.serial
    }

    /// Device information has not been read yet
    pub fn needs_info(&self) -> bool {
        self.info.version == VERSION_UNSET
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, id: &str) -> Option<&Value> {
        self.values.iter().find(|v| v.id() == id)
    }

    pub fn value_mut(&mut self, id: &str) -> Option<&mut Value> {
        self.values.iter_mut().find(|v| v.id() == id)
    }

    pub fn value_by_key(&self, key: ValueKey) -> Option<&Value> {
        self.values.iter().find(|v| v.key() == key)
    }

    /// Value owning the state with `state_id`
    pub fn value_for_state_mut(&mut self, state_id: &str) -> Option<&mut Value> {
        self.values
            .iter_mut()
            .find(|v| v.state(state_id).is_some())
    }

    pub fn live(&self) -> Option<&Arc<dyn LiveDevice>> {
        self.live.as_ref()
    }

    /// Merge the live radio device into this node
    ///
    /// Reads the device information once, then resolves every cluster on
    /// every non-zero endpoint through the registry. Existing values are
    /// reused by key, new ones are created and, when `bind` is set, the
    /// device is asked to report their cluster. Bind failures are logged.
    pub async fn parse(
        &mut self,
        live: Arc<dyn LiveDevice>,
        registry: &ValueRegistry,
        bind: bool,
    ) {
        self.ieee = live.ieee().to_string();
        if self.needs_info() {
            self.read_device_info(live.as_ref()).await;
        }

        let manufacturer = live.manufacturer_code();
        for endpoint in live.endpoints() {
            if endpoint.id == 0 {
                continue;
            }
            for cluster in endpoint.clusters() {
                for kind in registry.resolve(cluster.cluster_id(), manufacturer) {
                    let spec = kind.spec();
                    let key = ValueKey::new(i32::from(endpoint.id), spec.cluster, spec.index);
                    let idx = match self.values.iter().position(|v| v.key() == key) {
                        Some(idx) => idx,
                        None => self.insert_value(Value::new(kind, i32::from(endpoint.id))),
                    };

                    let value = &mut self.values[idx];
                    value.attach(cluster.clone());
                    if !value.should_bind() {
                        continue;
                    }
                    if bind {
                        match live.bind(endpoint.id, cluster.cluster_id()).await {
                            Ok(()) => tracing::debug!(
                                ieee = %self.ieee,
                                endpoint = endpoint.id,
                                cluster = cluster.cluster_id(),
                                "Bound cluster"
                            ),
                            Err(e) => tracing::warn!(
                                ieee = %self.ieee,
                                endpoint = endpoint.id,
                                cluster = cluster.cluster_id(),
                                error = %e,
                                "Failed to bind cluster"
                            ),
                        }
                    }
                    value.mark_bound();
                }
            }
        }

        self.live = Some(live);
    }

    /// Seed REPORT states from the radio; returns the ids of updated states
    pub async fn initial_reads(&mut self) -> Vec<String> {
        let mut updated = Vec::new();
        for value in &mut self.values {
            match value.refresh().await {
                Ok(Some(state)) => updated.push(state),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    ieee = %self.ieee,
                    value = %value.name(),
                    error = %e,
                    "Initial read failed"
                ),
            }
        }
        updated
    }

    /// Apply an attribute report to every listening value on the cluster
    ///
    /// Returns `(value id, state id)` for each updated REPORT state.
    pub fn attribute_updated(
        &mut self,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        value: &AttrValue,
    ) -> Vec<(String, String)> {
        let mut updated = Vec::new();
        for v in &mut self.values {
            let key = v.key();
            if key.endpoint != i32::from(endpoint)
                || key.cluster != i32::from(cluster)
                || !v.is_listening()
            {
                continue;
            }
            if let Some(state) = v.attribute_updated(attribute, value) {
                updated.push((v.id().to_string(), state));
            }
        }
        updated
    }

    /// Hand a device-originated command to the values on the cluster
    ///
    /// Returns the cluster to answer on with the answer, when a value has
    /// one.
    pub fn cluster_command(
        &self,
        endpoint: u8,
        cluster: u16,
        command_id: u8,
        args: &[AttrValue],
        ota_dir: &Path,
    ) -> Option<(Arc<dyn Cluster>, ClusterResponse)> {
        let mut handled = false;
        let mut answer = None;
        for v in &self.values {
            let key = v.key();
            if key.endpoint != i32::from(endpoint) || key.cluster != i32::from(cluster) {
                continue;
            }
            handled = true;
            let Some(response) = v.kind().cluster_command(&self.ieee, command_id, args, ota_dir)
            else {
                continue;
            };
            match v.cluster() {
                Some(c) if answer.is_none() => answer = Some((Arc::clone(c), response)),
                Some(_) => {}
                None => tracing::warn!(
                    ieee = %self.ieee,
                    cluster,
                    "Can not answer on an unbound value"
                ),
            }
        }
        if !handled {
            tracing::debug!(
                ieee = %self.ieee,
                endpoint,
                cluster,
                command_id,
                "Cluster command for unknown value"
            );
        }
        answer
    }

    async fn read_device_info(&mut self, live: &dyn LiveDevice) -> bool {
        let endpoints = live.endpoints();
        let basic = endpoints
            .iter()
            .find(|e| e.id == 0)
            .and_then(|e| e.in_cluster(BASIC_CLUSTER))
            .or_else(|| {
                endpoints
                    .iter()
                    .filter(|e| e.id != 0)
                    .find_map(|e| e.in_cluster(BASIC_CLUSTER))
            });
        let Some(basic) = basic else {
            tracing::error!(ieee = %self.ieee, "Device has no basic cluster");
            return false;
        };

        tracing::debug!(ieee = %self.ieee, "Reading device information");
        for batch in DEVICE_INFO_BATCHES {
            match basic.read_attributes(batch, None).await {
                Ok(result) => {
                    if !result.failures.is_empty() {
                        tracing::error!(
                            ieee = %self.ieee,
                            failures = ?result.failures,
                            "Failed to get attributes from device"
                        );
                    }
                    self.apply_device_info(&result.values);
                }
                Err(e) => {
                    tracing::error!(
                        ieee = %self.ieee,
                        error = %e,
                        "Failed to read attributes from device"
                    );
                    return false;
                }
            }
        }
        true
    }

    fn apply_device_info(&mut self, attributes: &BTreeMap<u16, AttrValue>) {
        let mut version = Vec::new();
        for (id, value) in attributes {
            match *id {
                0..=3 => version.push(value.to_string()),
                4 => self.info.manufacturer = value.to_string(),
                5 => {
                    self.info.product = value.to_string();
                    self.info.name = self.info.product.clone();
                }
                10 => self.info.serial = value.to_string(),
                _ => {}
            }
        }
        if !version.is_empty() {
            self.info.version = version.join(".");
        }
    }
}

impl Node for Device {
    fn kind(&self) -> NodeKind {
        NodeKind::Device
    }

    fn id(&self) -> &str {
        &self.info.id
    }

    fn payload(&self) -> JsonValue {
        serde_json::to_value(&self.info).unwrap_or_default()
    }

    fn attributes(&self) -> JsonValue {
        serde_json::to_value(DeviceAttributes {
            ieee: self.ieee.clone(),
        })
        .unwrap_or_default()
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.values.iter().map(|v| v as &dyn Node).collect()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.info.id)
            .field("ieee", &self.ieee)
            .field("name", &self.info.name)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::mock::MockDevice;
    use crate::values::ValueKind;
    use pretty_assertions::assert_eq;

    fn plug() -> Arc<MockDevice> {
        Arc::new(
            MockDevice::new("00:0d:6f:00:0a:90:69:e7")
                .with_endpoint(1, &[0x0000, 0x0006], &[0x0019])
                .with_endpoint(2, &[0x0006], &[])
                .with_basic_info("Seluxit", "Smart Plug", "SN-1"),
        )
    }

    #[tokio::test]
    async fn parse_reads_info_and_creates_values() {
        let live = plug();
        let mut device = Device::new("");
        device
            .parse(live.clone(), &ValueRegistry::standard(), true)
            .await;

        assert_eq!(device.ieee(), "00:0d:6f:00:0a:90:69:e7");
        assert_eq!(device.manufacturer(), "Seluxit");
        assert_eq!(device.product(), "Smart Plug");
        assert_eq!(device.name(), "Smart Plug");
        assert_eq!(device.serial(), "SN-1");
        assert_eq!(device.version(), "3.1.0.2");

        let names: Vec<&str> = device.values().iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["On/Off", "On Time", "Ota", "On/Off 2", "On Time 2"]);
        assert_eq!(live.binds(), vec![(1, 0x0006), (2, 0x0006)]);
    }

    #[tokio::test]
    async fn parse_twice_reuses_values() {
        let live = plug();
        let registry = ValueRegistry::standard();
        let mut device = Device::new("");
        device.parse(live.clone(), &registry, true).await;
        let ids: Vec<String> = device.values().iter().map(|v| v.id().to_string()).collect();

        device.parse(live.clone(), &registry, true).await;

        let again: Vec<String> = device.values().iter().map(|v| v.id().to_string()).collect();
        assert_eq!(ids, again);
        assert_eq!(live.binds().len(), 2);
    }

    #[tokio::test]
    async fn info_is_not_read_twice() {
        let live = plug();
        let mut device = Device::new("");
        device.parse(live.clone(), &ValueRegistry::standard(), false).await;
        let basic = live.cluster(1, BASIC_CLUSTER).unwrap();
        assert_eq!(basic.read_count(), 2);

        device.parse(live.clone(), &ValueRegistry::standard(), false).await;
        assert_eq!(basic.read_count(), 2);
    }

    #[tokio::test]
    async fn failed_info_read_is_retried() {
        let live = plug();
        let basic = live.cluster(1, BASIC_CLUSTER).unwrap();
        basic.fail_with(Some(crate::radio::RadioError::Timeout("basic".into())));
        let mut device = Device::new("");

        device.parse(live.clone(), &ValueRegistry::standard(), false).await;
        assert!(device.needs_info());
        assert_eq!(device.values().len(), 5);

        basic.fail_with(None);
        device.parse(live.clone(), &ValueRegistry::standard(), false).await;
        assert!(!device.needs_info());
    }

    #[tokio::test]
    async fn bind_failure_is_not_fatal() {
        let live = plug();
        live.set_fail_bind(true);
        let mut device = Device::new("");
        device.parse(live.clone(), &ValueRegistry::standard(), true).await;
        assert_eq!(device.values().len(), 5);
        assert!(device.values()[0].is_listening());
    }

    #[tokio::test]
    async fn no_bind_when_disabled() {
        let live = plug();
        let mut device = Device::new("");
        device.parse(live.clone(), &ValueRegistry::standard(), false).await;
        assert!(live.binds().is_empty());
    }

    #[tokio::test]
    async fn unknown_clusters_are_skipped() {
        let live = Arc::new(MockDevice::new("aa").with_endpoint(1, &[0x0300], &[]));
        let mut device = Device::new("aa");
        device.parse(live, &ValueRegistry::standard(), true).await;
        assert!(device.values().is_empty());
    }

    #[tokio::test]
    async fn initial_reads_seed_report_states() {
        let live = Arc::new(
            MockDevice::new("aa")
                .with_endpoint(1, &[0x0402], &[])
                .with_basic_info("A", "B", "C"),
        );
        let mut device = Device::new("aa");
        device.parse(live, &ValueRegistry::standard(), false).await;

        let updated = device.initial_reads().await;

        assert_eq!(updated.len(), 1);
        let temperature = &device.values()[0];
        assert_eq!(temperature.kind(), ValueKind::Temperature);
        assert_eq!(temperature.report_state().unwrap().data(), "21.5");
    }

    #[tokio::test]
    async fn attribute_reports_reach_listening_values() {
        let live = plug();
        let mut device = Device::new("");
        device.parse(live, &ValueRegistry::standard(), false).await;

        let updated = device.attribute_updated(2, 0x0006, 0, &AttrValue::Bool(true));

        assert_eq!(updated.len(), 1);
        let value = device.value(&updated[0].0).unwrap();
        assert_eq!(value.name(), "On/Off 2");
        assert_eq!(value.report_state().unwrap().data(), "1");
    }

    #[tokio::test]
    async fn upgrade_query_is_answered_on_its_cluster() {
        let live = plug();
        let mut device = Device::new("");
        device.parse(live.clone(), &ValueRegistry::standard(), false).await;
        let dir = tempfile::TempDir::new().unwrap();
        let args = [0, 4098, 1, 4].map(AttrValue::Int);

        let (cluster, response) = device
            .cluster_command(1, 0x0019, 0x01, &args, dir.path())
            .unwrap();

        assert_eq!(cluster.cluster_id(), 0x0019);
        assert!(matches!(
            response,
            ClusterResponse::QueryNextImage {
                status: crate::radio::STATUS_NO_IMAGE_AVAILABLE,
                ..
            }
        ));
        assert!(device
            .cluster_command(2, 0x0019, 0x01, &args, dir.path())
            .is_none());
        assert!(device
            .cluster_command(1, 0x0006, 0x01, &[], dir.path())
            .is_none());
    }

    #[test]
    fn payload_starts_unset() {
        let device = Device::new("aa");
        let payload = device.payload();
        assert_eq!(payload[":type"], DEVICE_URN);
        assert_eq!(payload["version"], VERSION_UNSET);
        assert_eq!(payload["protocol"], "ZigBee");
        assert_eq!(payload["included"], "1");
        assert_eq!(device.attributes()["ieee"], "aa");
    }

    #[test]
    fn load_drops_duplicate_keys() {
        let device = Device::new("aa");
        let a = Value::new(ValueKind::OnOff, 1);
        let b = Value::new(ValueKind::OnOff, 1);
        let loaded = Device::load(&device.record(), vec![a, b]).unwrap();
        assert_eq!(loaded.values().len(), 1);
        assert_eq!(loaded.ieee(), "aa");
    }
}
