//! Network: root of the device tree

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::device::Device;
use super::gateway::GATEWAY_IEEE;
use super::node::{Node, NodeKind, NodeRecord};
use super::state::State;
use super::value::Value;
use crate::radio::{AttrValue, LiveDevice};
use crate::routing::NodePath;
use crate::store::Store;
use crate::uplink::SyncContext;

pub const NETWORK_URN: &str = "urn:seluxit:xml:bastard:network-1.1";

pub const DEFAULT_NETWORK_NAME: &str = "ZigBee Network";

fn network_urn() -> String {
    NETWORK_URN.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NetworkInfo {
    #[serde(rename = ":type", default = "network_urn")]
    urn: String,
    #[serde(rename = ":id")]
    id: String,
    name: String,
}

pub struct Network {
    info: NetworkInfo,
    devices: Vec<Device>,
}

impl Network {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: NetworkInfo {
                urn: network_urn(),
                id: id.into(),
                name: name.into(),
            },
            devices: Vec::new(),
        }
    }

    /// Load the persisted tree, tolerating damage
    ///
    /// A missing or corrupt network file yields a fresh network; corrupt
    /// devices, values or states are skipped. The configured id always
    /// wins over the persisted one. The gateway is created or completed
    /// afterwards.
    pub fn load(store: &Store, id: &str, name: &str) -> Self {
        let mut network = Self::new(id, name);
        let root = network.path();

        match store.load_record(&root) {
            Ok(Some(record)) => match serde_json::from_value::<NetworkInfo>(record.data) {
                Ok(info) => {
                    if info.id != id {
                        tracing::warn!(
                            persisted = %info.id,
                            configured = %id,
                            "Persisted network id differs from configuration"
                        );
                    }
                    network.info.name = info.name;
                }
                Err(e) => tracing::error!(error = %e, "Failed to parse network data"),
            },
            Ok(None) => tracing::info!(root = %store.root().display(), "No persisted network"),
            Err(e) => tracing::error!(error = %e, "Failed to load network data"),
        }

        for (device_path, record) in store.child_records(&root, NodeKind::Device) {
            match load_device(store, &device_path, &record) {
                Ok(device) if network.device_by_ieee(device.ieee()).is_some() => {
                    tracing::warn!(
                        device = %device_path.id(),
                        ieee = %device.ieee(),
                        "Dropping persisted duplicate of a device"
                    );
                    if let Err(e) = store.remove(&device_path) {
                        tracing::error!(error = %e, "Failed to remove duplicate device");
                    }
                }
                Ok(device) => network.insert_device(device),
                Err(e) => tracing::warn!(
                    device = %device_path.id(),
                    error = %e,
                    "Skipping persisted device"
                ),
            }
        }

        network.ensure_gateway();
        network
    }

    pub fn path(&self) -> NodePath {
        NodePath::network(&self.info.id)
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device_by_ieee(&self, ieee: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.ieee() == ieee)
    }

    pub fn device_by_id(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == id)
    }

    pub fn device_by_id_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id() == id)
    }

    pub fn device_path(&self, device: &Device) -> NodePath {
        self.path().device(device.id())
    }

    /// Path of the state with `state_id`, if it exists
    pub fn state_path(&self, state_id: &str) -> Option<NodePath> {
        self.devices.iter().find_map(|d| {
            d.values().iter().find_map(|v| {
                v.state(state_id)
                    .map(|_| self.path().device(d.id()).value(v.id()).state(state_id))
            })
        })
    }

    /// Value owning a state, with the value's path
    pub fn value_for_state_mut(&mut self, state_id: &str) -> Option<(NodePath, &mut Value)> {
        let root = self.path();
        self.devices.iter_mut().find_map(|d| {
            let device_path = root.device(d.id());
            d.value_for_state_mut(state_id)
                .map(|v| (device_path.value(v.id()), v))
        })
    }

    /// Value with `value_id`, with its path
    pub fn value_mut(&mut self, value_id: &str) -> Option<(NodePath, &mut Value)> {
        let root = self.path();
        self.devices.iter_mut().find_map(|d| {
            let device_path = root.device(d.id());
            d.value_mut(value_id)
                .map(|v| (device_path.value(v.id()), v))
        })
    }

    fn insert_device(&mut self, device: Device) {
        let pos = self
            .devices
            .partition_point(|d| d.ieee() < device.ieee());
        self.devices.insert(pos, device);
    }

    /// Make sure the gateway exists with all its values
    ///
    /// Returns true when anything was added.
    pub fn ensure_gateway(&mut self) -> bool {
        match self.devices.iter_mut().find(|d| d.is_gateway()) {
            Some(gateway) => gateway.ensure_gateway_values(),
            None => {
                self.insert_device(Device::gateway());
                true
            }
        }
    }

    /// Merge a live radio device into the tree
    ///
    /// An existing device with the same hardware address is reused, so
    /// calling this twice never creates a second node. The subtree is
    /// persisted before and after the initial reads. With `announce` the
    /// device is posted upstream. Returns the device id.
    pub async fn add_device(
        &mut self,
        live: Arc<dyn LiveDevice>,
        announce: bool,
        ctx: &SyncContext<'_>,
    ) -> String {
        let root = self.path();
        let ieee = live.ieee().to_string();
        if self.device_by_ieee(&ieee).is_none() {
            tracing::info!(ieee = %ieee, "New device");
            self.insert_device(Device::new(&ieee));
        }
        let Some(device) = self.devices.iter_mut().find(|d| d.ieee() == ieee) else {
            return String::new();
        };

        device.parse(live, ctx.registry, ctx.bind).await;
        let path = root.device(device.id());
        if let Err(e) = ctx.store.save(&path, &*device) {
            tracing::error!(ieee = %ieee, error = %e, "Failed to save device");
        }

        if !device.initial_reads().await.is_empty() {
            if let Err(e) = ctx.store.save(&path, &*device) {
                tracing::error!(ieee = %ieee, error = %e, "Failed to save device");
            }
        }

        if announce {
            ctx.uplink
                .post(&root.collection_url(NodeKind::Device), device.data());
        }
        device.id().to_string()
    }

    /// Remove a device by hardware address
    ///
    /// Deletes its files and pushes a delete upstream. Unknown addresses
    /// are logged and ignored.
    pub fn remove_device(&mut self, ieee: &str, ctx: &SyncContext<'_>) -> Option<Device> {
        let Some(pos) = self.devices.iter().position(|d| d.ieee() == ieee) else {
            tracing::error!(ieee = %ieee, "Failed to find device to remove");
            return None;
        };
        let device = self.devices.remove(pos);
        let path = self.device_path(&device);
        if let Err(e) = ctx.store.remove(&path) {
            tracing::error!(ieee = %ieee, error = %e, "Failed to remove device files");
        }
        ctx.uplink.delete(&path.url());
        tracing::info!(ieee = %ieee, device = %device.id(), "Removed device");
        Some(device)
    }

    /// Remove every device missing from `live` except the gateway
    ///
    /// Returns the hardware addresses that were removed.
    pub fn remove_orphans(&mut self, live: &[String], ctx: &SyncContext<'_>) -> Vec<String> {
        let orphans: Vec<String> = self
            .devices
            .iter()
            .filter(|d| d.ieee() != GATEWAY_IEEE && !live.iter().any(|l| l == d.ieee()))
            .map(|d| d.ieee().to_string())
            .collect();
        for ieee in &orphans {
            self.remove_device(ieee, ctx);
        }
        orphans
    }

    /// Route an attribute report from the radio to the REPORT states listening on it
    ///
    /// Every updated state is persisted and pushed upstream. Returns the
    /// ids of the updated states.
    pub fn attribute_updated(
        &mut self,
        ieee: &str,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        value: &AttrValue,
        ctx: &SyncContext<'_>,
    ) -> Vec<String> {
        let Some(device) = self.devices.iter_mut().find(|d| d.ieee() == ieee) else {
            tracing::debug!(ieee = %ieee, "Attribute report from unknown device");
            return Vec::new();
        };
        let updated = device.attribute_updated(endpoint, cluster, attribute, value);
        let device_id = device.id().to_string();

        let mut states = Vec::new();
        for (value_id, state_id) in updated {
            let path = self.path().device(&device_id).value(&value_id);
            self.publish_state(&path, &state_id, ctx);
            states.push(state_id);
        }
        states
    }

    /// Apply a report to one value (delayed or immediate echo), then persist and push
    pub fn report(
        &mut self,
        value_id: &str,
        attribute: u16,
        value: &AttrValue,
        ctx: &SyncContext<'_>,
    ) -> Option<String> {
        let (path, target) = self.value_mut(value_id)?;
        let state_id = target.attribute_updated(attribute, value)?;
        self.publish_state(&path, &state_id, ctx);
        Some(state_id)
    }

    /// Persist a value subtree and push one of its states upstream
    pub fn publish_state(&self, value_path: &NodePath, state_id: &str, ctx: &SyncContext<'_>) {
        let Some(value) = self
            .device_by_id(&device_id_of(value_path))
            .and_then(|d| d.value(value_path.id()))
        else {
            return;
        };
        if let Err(e) = ctx.store.save(value_path, value) {
            tracing::error!(value = %value.id(), error = %e, "Failed to save value");
        }
        if let Some(state) = value.state(state_id) {
            let url = value_path.state(state_id).url();
            tracing::debug!(url = %url, data = %state.data(), "Pushing state");
            ctx.uplink.put(&url, state.payload());
        }
    }

    /// Persist the whole tree
    pub fn save(&self, store: &Store) -> crate::error::StoreResult<()> {
        store.save(&self.path(), self)
    }
}

fn device_id_of(path: &NodePath) -> String {
    path.segments()
        .iter()
        .find(|(kind, _)| *kind == NodeKind::Device)
        .map(|(_, id)| id.clone())
        .unwrap_or_default()
}

fn load_device(
    store: &Store,
    path: &NodePath,
    record: &NodeRecord,
) -> crate::error::ModelResult<Device> {
    let mut values = Vec::new();
    for (value_path, value_record) in store.child_records(path, NodeKind::Value) {
        let states = store
            .child_records(&value_path, NodeKind::State)
            .into_iter()
            .filter_map(|(state_path, state_record)| {
                State::from_record(&state_record)
                    .map_err(|e| {
                        tracing::warn!(
                            state = %state_path.id(),
                            error = %e,
                            "Skipping persisted state"
                        )
                    })
                    .ok()
            })
            .collect();
        match Value::load(&value_record, states) {
            Ok(value) => values.push(value),
            Err(e) => tracing::warn!(
                value = %value_path.id(),
                error = %e,
                "Skipping persisted value"
            ),
        }
    }
    Device::load(record, values)
}

impl Node for Network {
    fn kind(&self) -> NodeKind {
        NodeKind::Network
    }

    fn id(&self) -> &str {
        &self.info.id
    }

    fn payload(&self) -> JsonValue {
        serde_json::to_value(&self.info).unwrap_or_default()
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.devices.iter().map(|d| d as &dyn Node).collect()
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("devices", &self.devices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::models::StateType;
    use crate::radio::mock::MockDevice;
    use crate::registry::ValueRegistry;
    use crate::testing::RecordingUplink;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        store: Store,
        uplink: RecordingUplink,
        registry: ValueRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let store = Store::new(tmp.path());
            Self {
                _tmp: tmp,
                store,
                uplink: RecordingUplink::new(),
                registry: ValueRegistry::standard(),
            }
        }

        fn ctx(&self) -> SyncContext<'_> {
            SyncContext {
                store: &self.store,
                uplink: &self.uplink,
                registry: &self.registry,
                bind: true,
            }
        }
    }

    fn plug(ieee: &str) -> Arc<MockDevice> {
        Arc::new(
            MockDevice::new(ieee)
                .with_endpoint(1, &[0x0006], &[])
                .with_basic_info("Seluxit", "Plug", "1"),
        )
    }

    #[test]
    fn load_of_empty_store_has_only_gateway() {
        let fx = Fixture::new();
        let network = Network::load(&fx.store, "net", DEFAULT_NETWORK_NAME);
        assert_eq!(network.devices().len(), 1);
        assert!(network.devices()[0].is_gateway());
        assert_eq!(network.id(), "net");
    }

    #[test]
    fn corrupt_network_file_falls_back_to_default() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.store.root()).unwrap();
        fs::write(fx.store.root().join("network.json"), b"[1,2,3]").unwrap();

        let network = Network::load(&fx.store, "net", DEFAULT_NETWORK_NAME);

        assert_eq!(network.name(), DEFAULT_NETWORK_NAME);
        assert_eq!(network.devices().len(), 1);
    }

    #[tokio::test]
    async fn add_device_twice_keeps_one_node() {
        let fx = Fixture::new();
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        let live = plug("aa");

        let first = network.add_device(live.clone(), false, &fx.ctx()).await;
        let second = network.add_device(live, false, &fx.ctx()).await;

        assert_eq!(first, second);
        assert_eq!(network.devices().len(), 1);
        assert!(fx.uplink.frames().is_empty());
    }

    #[tokio::test]
    async fn add_device_creates_on_off_with_two_states() {
        let fx = Fixture::new();
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        network.add_device(plug("aa"), false, &fx.ctx()).await;

        let device = network.device_by_ieee("aa").unwrap();
        let on_off = &device.values()[0];
        assert_eq!(on_off.name(), "On/Off");
        let types: Vec<StateType> = on_off.states().iter().map(|s| s.state_type()).collect();
        assert_eq!(types, vec![StateType::Report, StateType::Control]);
    }

    #[tokio::test]
    async fn announce_posts_device() {
        let fx = Fixture::new();
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        let id = network.add_device(plug("aa"), true, &fx.ctx()).await;

        let posts = fx.uplink.sent("POST");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].url, "/network/net/device");
        assert_eq!(posts[0].data.as_ref().unwrap()[":id"], id.as_str());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let fx = Fixture::new();
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        network.ensure_gateway();
        network.add_device(plug("aa"), false, &fx.ctx()).await;
        network.add_device(plug("bb"), false, &fx.ctx()).await;
        network.save(&fx.store).unwrap();

        let loaded = Network::load(&fx.store, "net", DEFAULT_NETWORK_NAME);

        assert_eq!(loaded.data(), network.data());
    }

    #[tokio::test]
    async fn corrupt_value_is_skipped_on_load() {
        let fx = Fixture::new();
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        network.add_device(plug("aa"), false, &fx.ctx()).await;
        network.save(&fx.store).unwrap();
        let device = network.device_by_ieee("aa").unwrap();
        let broken = network
            .device_path(device)
            .value(device.values()[0].id());
        fs::write(fx.store.dir(&broken).join("value.json"), b"{").unwrap();

        let loaded = Network::load(&fx.store, "net", DEFAULT_NETWORK_NAME);

        let device = loaded.device_by_ieee("aa").unwrap();
        assert_eq!(device.values().len(), network.device_by_ieee("aa").unwrap().values().len() - 1);
    }

    #[tokio::test]
    async fn duplicate_ieee_is_dropped_on_load() {
        let fx = Fixture::new();
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        let id = network.add_device(plug("aa"), false, &fx.ctx()).await;
        network.save(&fx.store).unwrap();

        // a second directory claiming the same hardware address
        let original = fx.store.dir(&network.path().device(&id));
        let copy = fx.store.dir(&network.path().device("zzzz"));
        fs::create_dir_all(&copy).unwrap();
        let text = fs::read_to_string(original.join("device.json")).unwrap();
        fs::write(copy.join("device.json"), text.replace(&id, "zzzz")).unwrap();

        let mut loaded = Network::load(&fx.store, "net", DEFAULT_NETWORK_NAME);
        let count = |n: &Network| n.devices().iter().filter(|d| d.ieee() == "aa").count();
        assert_eq!(count(&loaded), 1);
        assert_eq!(loaded.device_by_ieee("aa").unwrap().id(), id);
        assert!(!copy.exists());

        loaded.add_device(plug("aa"), false, &fx.ctx()).await;
        assert_eq!(count(&loaded), 1);
    }

    #[tokio::test]
    async fn remove_device_deletes_files_and_notifies() {
        let fx = Fixture::new();
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        let id = network.add_device(plug("aa"), false, &fx.ctx()).await;
        let dir = fx.store.dir(&network.path().device(&id));
        assert!(dir.exists());

        let removed = network.remove_device("aa", &fx.ctx());

        assert!(removed.is_some());
        assert!(!dir.exists());
        assert_eq!(
            fx.uplink.sent("DELETE")[0].url,
            format!("/network/net/device/{}", id)
        );
        assert!(network.remove_device("aa", &fx.ctx()).is_none());
    }

    #[tokio::test]
    async fn orphans_are_removed_except_gateway() {
        let fx = Fixture::new();
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        network.ensure_gateway();
        network.add_device(plug("aa"), false, &fx.ctx()).await;
        network.add_device(plug("bb"), false, &fx.ctx()).await;

        let removed = network.remove_orphans(&["bb".to_string()], &fx.ctx());

        assert_eq!(removed, vec!["aa".to_string()]);
        assert_eq!(network.devices().len(), 2);
        assert!(network.device_by_ieee(GATEWAY_IEEE).is_some());
        assert_eq!(fx.uplink.sent("DELETE").len(), 1);
    }

    #[tokio::test]
    async fn attribute_report_is_saved_and_pushed() {
        let fx = Fixture::new();
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        network.add_device(plug("aa"), false, &fx.ctx()).await;

        let states = network.attribute_updated("aa", 1, 0x0006, 0, &AttrValue::Int(1), &fx.ctx());

        assert_eq!(states.len(), 1);
        let path = network.state_path(&states[0]).unwrap();
        let puts = fx.uplink.sent("PUT");
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].url, path.url());
        assert_eq!(puts[0].data.as_ref().unwrap()["data"], "1");
        let record = fx.store.load_record(&path).unwrap().unwrap();
        assert_eq!(record.data["data"], "1");
    }

    #[test]
    fn find_child_reaches_states() {
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        network.ensure_gateway();
        let state_id = network.devices()[0].values()[0].states()[0].id().to_string();

        let found = network.find_child(&state_id).unwrap();

        assert_eq!(found.kind(), NodeKind::State);
        assert!(network.find_child("missing").is_none());
    }

    #[test]
    fn snapshot_nests_devices() {
        let mut network = Network::new("net", DEFAULT_NETWORK_NAME);
        network.ensure_gateway();
        let data = network.data();
        assert_eq!(data[":type"], NETWORK_URN);
        assert_eq!(data["name"], DEFAULT_NETWORK_NAME);
        assert_eq!(data["device"][0]["name"], "Gateway");
        assert_eq!(data["device"][0]["value"].as_array().unwrap().len(), 3);
    }
}
