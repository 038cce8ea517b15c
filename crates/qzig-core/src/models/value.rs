//! Value: one capability of a device

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::node::{Node, NodeKind, NodeRecord};
use super::state::{State, StateStatus, StateType};
use crate::error::{ModelError, ModelResult};
use crate::radio::{AttrValue, Cluster, RadioController, RadioResult};
use crate::values::{ControlResult, ControlTarget, ValueKind};

pub const VALUE_URN: &str = "urn:seluxit:xml:bastard:value-1.1";

pub const REPORT_STATE_ERROR: &str = "Report state can't be changed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "r")]
    ReadOnly,
    #[serde(rename = "w")]
    WriteOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl Permission {
    /// States a value with this permission carries
    pub fn state_types(&self) -> &'static [StateType] {
        match self {
            Permission::ReadOnly => &[StateType::Report],
            Permission::WriteOnly => &[StateType::Control],
            Permission::ReadWrite => &[StateType::Report, StateType::Control],
        }
    }

    pub fn can_read(&self) -> bool {
        !matches!(self, Permission::WriteOnly)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueStatus {
    #[default]
    Ok,
    Update,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberFormat {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringFormat {
    pub max: u32,
    pub encoding: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    Number(NumberFormat),
    String(StringFormat),
}

/// Identity of a value within its device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueKey {
    #[serde(rename = "endpoint_id")]
    pub endpoint: i32,
    #[serde(rename = "cluster_id")]
    pub cluster: i32,
    #[serde(default)]
    pub index: u32,
}

impl ValueKey {
    pub fn new(endpoint: i32, cluster: i32, index: u32) -> Self {
        Self {
            endpoint,
            cluster,
            index,
        }
    }
}

fn value_urn() -> String {
    VALUE_URN.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ValueInfo {
    #[serde(rename = ":type", default = "value_urn")]
    urn: String,
    #[serde(rename = ":id")]
    id: String,
    name: String,
    permission: Permission,
    #[serde(rename = "type")]
    value_type: String,
    #[serde(flatten)]
    format: ValueFormat,
    #[serde(default)]
    status: ValueStatus,
}

#[derive(Serialize, Deserialize)]
struct ValueAttributes {
    #[serde(flatten)]
    key: ValueKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<ValueKind>,
}

/// Attribute read issued against a value's cluster
pub struct ReadRequest {
    pub cluster: Arc<dyn Cluster>,
    pub attribute: u16,
    pub manufacturer: Option<u16>,
}

impl ReadRequest {
    pub async fn run(&self) -> RadioResult<Option<AttrValue>> {
        let result = self
            .cluster
            .read_attributes(&[self.attribute], self.manufacturer)
            .await?;
        if !result.failures.is_empty() {
            tracing::debug!(
                cluster = self.cluster.cluster_id(),
                failures = ?result.failures,
                "Attribute read failed"
            );
        }
        Ok(result.values.get(&self.attribute).cloned())
    }
}

/// Control request that passed validation and waits for the radio
pub struct PendingControl {
    pub kind: ValueKind,
    pub cluster: Option<Arc<dyn Cluster>>,
    pub manufacturer: Option<u16>,
    pub data: String,
}

impl PendingControl {
    pub async fn run(&self, radio: &dyn RadioController) -> ControlResult {
        let target = ControlTarget {
            cluster: self.cluster.as_ref(),
            radio,
            manufacturer: self.manufacturer,
        };
        self.kind.control(&target, &self.data).await
    }
}

pub struct Value {
    info: ValueInfo,
    key: ValueKey,
    kind: ValueKind,
    states: Vec<State>,
    cluster: Option<Arc<dyn Cluster>>,
    listening: bool,
    fresh: bool,
}

impl Value {
    /// Create a value of `kind` on `endpoint` with its states
    pub fn new(kind: ValueKind, endpoint: i32) -> Self {
        let spec = kind.spec();
        let format = spec.format.to_format();
        let name = if endpoint != 1 && !kind.is_gateway() {
            format!("{} {}", spec.name, endpoint)
        } else {
            spec.name.to_string()
        };
        let initial = initial_data(&format);
        let states = spec
            .permission
            .state_types()
            .iter()
            .map(|t| State::new(*t, initial))
            .collect();

        Self {
            info: ValueInfo {
                urn: value_urn(),
                id: uuid::Uuid::new_v4().to_string(),
                name,
                permission: spec.permission,
                value_type: spec.value_type.to_string(),
                format,
                status: ValueStatus::Ok,
            },
            key: ValueKey::new(endpoint, spec.cluster, spec.index),
            kind,
            states,
            cluster: None,
            listening: false,
            fresh: true,
        }
    }

    /// Rebuild a value from its record and the states found below it
    ///
    /// The state set is repaired to match the permission: missing states
    /// are recreated and surplus ones dropped.
    pub fn load(record: &NodeRecord, loaded: Vec<State>) -> ModelResult<Self> {
        let attrs: ValueAttributes = serde_json::from_value(record.attr.clone()).map_err(
            |source| ModelError::InvalidAttributes {
                kind: "value",
                source,
            },
        )?;
        let info: ValueInfo =
            serde_json::from_value(record.data.clone()).map_err(|source| {
                ModelError::InvalidPayload {
                    kind: "value",
                    source,
                }
            })?;
        let kind = attrs
            .kind
            .or_else(|| ValueKind::from_key(attrs.key.cluster, attrs.key.index))
            .ok_or(ModelError::UnknownValueKind {
                cluster: attrs.key.cluster,
                index: attrs.key.index,
            })?;

        let mut pool = loaded;
        let mut states = Vec::new();
        for state_type in info.permission.state_types() {
            match pool.iter().position(|s| s.state_type() == *state_type) {
                Some(pos) => states.push(pool.remove(pos)),
                None => {
                    tracing::warn!(value = %info.id, ?state_type, "Recreating missing state");
                    states.push(State::new(*state_type, initial_data(&info.format)));
                }
            }
        }
        for extra in &pool {
            tracing::warn!(value = %info.id, state = %extra.id(), "Dropping surplus state");
        }

        Ok(Self {
            info,
            key: attrs.key,
            kind,
            states,
            cluster: None,
            listening: false,
            fresh: false,
        })
    }

    pub fn key(&self) -> ValueKey {
        self.key
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn permission(&self) -> Permission {
        self.info.permission
    }

    pub fn format(&self) -> &ValueFormat {
        &self.info.format
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state(&self, id: &str) -> Option<&State> {
        self.states.iter().find(|s| s.id() == id)
    }

    pub fn report_state(&self) -> Option<&State> {
        self.states.iter().find(|s| s.is_report())
    }

    pub fn control_state(&self) -> Option<&State> {
        self.states
            .iter()
            .find(|s| s.state_type() == StateType::Control)
    }

    fn report_state_mut(&mut self) -> Option<&mut State> {
        self.states.iter_mut().find(|s| s.is_report())
    }

    pub fn cluster(&self) -> Option<&Arc<dyn Cluster>> {
        self.cluster.as_ref()
    }

    /// Whether attribute reports from the cluster reach the REPORT state
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Created in this session and not yet bound
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Attach the live cluster; the REPORT state becomes its listener
    pub fn attach(&mut self, cluster: Arc<dyn Cluster>) {
        self.listening = self.report_state().is_some();
        self.cluster = Some(cluster);
    }

    /// A bind request is due for this value
    pub fn should_bind(&self) -> bool {
        self.fresh && self.kind.spec().bind && self.report_state().is_some()
    }

    pub fn mark_bound(&mut self) {
        self.fresh = false;
    }

    /// Apply an attribute report to the REPORT state
    ///
    /// Returns the id of the updated state, or `None` when the report
    /// does not concern this value.
    pub fn attribute_updated(&mut self, attribute: u16, value: &AttrValue) -> Option<String> {
        let data = self.kind.convert_report(attribute, value)?;
        let report = self.report_state_mut()?;
        report.update(data, StateStatus::Send);
        Some(report.id().to_string())
    }

    /// Read of the reported attribute, when the value is readable and attached
    pub fn read_request(&self) -> Option<ReadRequest> {
        let spec = self.kind.spec();
        if !self.info.permission.can_read() {
            return None;
        }
        Some(ReadRequest {
            cluster: self.cluster.clone()?,
            attribute: spec.attribute?,
            manufacturer: spec.manufacturer,
        })
    }

    /// Re-read the reported attribute and apply it
    pub async fn refresh(&mut self) -> Result<Option<String>, String> {
        let Some(request) = self.read_request() else {
            return Ok(None);
        };
        match request.run().await.map_err(|e| e.to_string())? {
            Some(value) => Ok(self.attribute_updated(request.attribute, &value)),
            None => Ok(None),
        }
    }

    /// Validate a control request and record the requested data
    pub fn begin_control(&mut self, state_id: &str, data: &str) -> Result<PendingControl, String> {
        let state = self
            .states
            .iter_mut()
            .find(|s| s.id() == state_id)
            .ok_or_else(|| format!("Failed to find id {}", state_id))?;
        if state.is_report() {
            return Err(REPORT_STATE_ERROR.to_string());
        }
        state.update(data, StateStatus::Pending);

        Ok(PendingControl {
            kind: self.kind,
            cluster: self.cluster.clone(),
            manufacturer: self.kind.spec().manufacturer,
            data: data.to_string(),
        })
    }

    /// Mark the CONTROL state with the outcome of the radio call
    pub fn finish_control(&mut self, success: bool) {
        let status = if success {
            StateStatus::Send
        } else {
            StateStatus::Failed
        };
        if let Some(state) = self
            .states
            .iter_mut()
            .find(|s| s.state_type() == StateType::Control)
        {
            let data = state.data().to_string();
            state.update(data, status);
        }
    }

    /// Change a CONTROL state and run the radio command
    ///
    /// Effects are returned to the caller; immediate reports are not
    /// applied here.
    pub async fn change_state(
        &mut self,
        state_id: &str,
        data: &str,
        radio: &dyn RadioController,
    ) -> ControlResult {
        let pending = self.begin_control(state_id, data)?;
        let result = pending.run(radio).await;
        self.finish_control(result.is_ok());
        result
    }
}

fn initial_data(format: &ValueFormat) -> &'static str {
    match format {
        ValueFormat::Number(_) => "0",
        ValueFormat::String(_) => "",
    }
}

impl Node for Value {
    fn kind(&self) -> NodeKind {
        NodeKind::Value
    }

    fn id(&self) -> &str {
        &self.info.id
    }

    fn payload(&self) -> JsonValue {
        serde_json::to_value(&self.info).unwrap_or_default()
    }

    fn attributes(&self) -> JsonValue {
        let attrs = ValueAttributes {
            key: self.key,
            kind: Some(self.kind),
        };
        serde_json::to_value(&attrs).unwrap_or_default()
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.states.iter().map(|s| s as &dyn Node).collect()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("listening", &self.listening)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::mock::{MockCluster, MockRadio};
    use crate::radio::ClusterCommand;
    use crate::values::Effect;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state_types(value: &Value) -> Vec<StateType> {
        value.states().iter().map(|s| s.state_type()).collect()
    }

    #[test]
    fn states_follow_permission() {
        assert_eq!(
            state_types(&Value::new(ValueKind::Temperature, 1)),
            vec![StateType::Report]
        );
        assert_eq!(
            state_types(&Value::new(ValueKind::Identify, 1)),
            vec![StateType::Control]
        );
        assert_eq!(
            state_types(&Value::new(ValueKind::OnOff, 1)),
            vec![StateType::Report, StateType::Control]
        );
    }

    #[test]
    fn payload_has_wire_shape() {
        let value = Value::new(ValueKind::OnOff, 1);
        let payload = value.payload();
        assert_eq!(payload[":type"], VALUE_URN);
        assert_eq!(payload["name"], "On/Off");
        assert_eq!(payload["permission"], "rw");
        assert_eq!(payload["type"], "On/Off");
        assert_eq!(payload["status"], "ok");
        assert_eq!(
            payload["number"],
            json!({ "min": 0.0, "max": 1.0, "step": 1.0, "unit": "boolean" })
        );
    }

    #[test]
    fn string_values_start_empty() {
        let value = Value::new(ValueKind::JoinKey, -2);
        assert_eq!(value.payload()["string"]["encoding"], "hexbinary");
        assert_eq!(value.report_state().unwrap().data(), "");
        assert_eq!(value.name(), "Join Key");
    }

    #[test]
    fn endpoint_is_appended_to_name() {
        assert_eq!(Value::new(ValueKind::OnOff, 1).name(), "On/Off");
        assert_eq!(Value::new(ValueKind::OnOff, 2).name(), "On/Off 2");
    }

    #[test]
    fn attributes_carry_identity() {
        let value = Value::new(ValueKind::LongPollInterval, 1);
        assert_eq!(
            value.attributes(),
            json!({
                "endpoint_id": 1,
                "cluster_id": 0x20,
                "index": 1,
                "kind": "long_poll_interval"
            })
        );
    }

    #[test]
    fn load_round_trips() {
        let value = Value::new(ValueKind::OnOff, 1);
        let states = value.states().to_vec();
        let loaded = Value::load(&value.record(), states).unwrap();
        assert_eq!(loaded.data(), value.data());
        assert!(!loaded.is_fresh());
    }

    #[test]
    fn load_without_kind_uses_key() {
        let value = Value::new(ValueKind::Temperature, 1);
        let mut record = value.record();
        record.attr = json!({ "endpoint_id": 1, "cluster_id": 0x0402, "index": 0 });
        let loaded = Value::load(&record, value.states().to_vec()).unwrap();
        assert_eq!(loaded.kind(), ValueKind::Temperature);
    }

    #[test]
    fn load_repairs_state_set() {
        let value = Value::new(ValueKind::OnOff, 1);
        let report = value.report_state().unwrap().clone();
        let extra = State::new(StateType::Report, "9");
        let loaded = Value::load(&value.record(), vec![report.clone(), extra]).unwrap();
        assert_eq!(
            state_types(&loaded),
            vec![StateType::Report, StateType::Control]
        );
        assert_eq!(loaded.report_state().unwrap().id(), report.id());
    }

    #[test]
    fn load_rejects_unknown_cluster() {
        let value = Value::new(ValueKind::OnOff, 1);
        let mut record = value.record();
        record.attr = json!({ "endpoint_id": 1, "cluster_id": 0x0300 });
        assert!(matches!(
            Value::load(&record, vec![]),
            Err(ModelError::UnknownValueKind { .. })
        ));
    }

    #[test]
    fn report_state_can_not_be_changed() {
        let mut value = Value::new(ValueKind::OnOff, 1);
        let report = value.report_state().unwrap().clone();
        let err = value.begin_control(report.id(), "1").err();
        assert_eq!(err.as_deref(), Some(REPORT_STATE_ERROR));
        assert_eq!(value.report_state().unwrap(), &report);
    }

    #[test]
    fn unknown_state_is_not_found() {
        let mut value = Value::new(ValueKind::OnOff, 1);
        let err = value.begin_control("nope", "1").err();
        assert_eq!(err.as_deref(), Some("Failed to find id nope"));
    }

    #[test]
    fn attribute_update_only_touches_report_state() {
        let mut value = Value::new(ValueKind::Temperature, 1);
        let id = value
            .attribute_updated(0, &AttrValue::Int(2150))
            .unwrap();
        assert_eq!(value.state(&id).unwrap().data(), "21.5");
        assert!(value.attribute_updated(7, &AttrValue::Int(1)).is_none());
    }

    #[tokio::test]
    async fn change_state_runs_command_and_marks_control() {
        let mock = Arc::new(MockCluster::new(0x0006));
        let radio = MockRadio::new();
        let mut value = Value::new(ValueKind::OnOff, 1);
        value.attach(mock.clone());
        let control = value.control_state().unwrap().id().to_string();

        let effects = value.change_state(&control, "1", &radio).await.unwrap();

        assert_eq!(effects, vec![Effect::report_now(0, AttrValue::Int(1))]);
        assert_eq!(mock.commands(), vec![ClusterCommand::On]);
        let state = value.control_state().unwrap();
        assert_eq!(state.data(), "1");
        assert_eq!(state.status(), StateStatus::Send);
    }

    #[tokio::test]
    async fn failed_control_marks_state_failed() {
        let mock = Arc::new(MockCluster::new(0x0006));
        mock.fail_with(Some(crate::radio::RadioError::Timeout("ack".into())));
        let radio = MockRadio::new();
        let mut value = Value::new(ValueKind::OnOff, 1);
        value.attach(mock);
        let control = value.control_state().unwrap().id().to_string();

        assert!(value.change_state(&control, "1", &radio).await.is_err());
        assert_eq!(value.control_state().unwrap().status(), StateStatus::Failed);
    }

    #[tokio::test]
    async fn refresh_reads_reported_attribute() {
        let mock = Arc::new(MockCluster::new(0x0402));
        mock.set_attribute(0, AttrValue::Int(1990));
        let mut value = Value::new(ValueKind::Temperature, 1);
        value.attach(mock.clone());

        let updated = value.refresh().await.unwrap();

        assert!(updated.is_some());
        assert_eq!(value.report_state().unwrap().data(), "19.9");
        assert_eq!(mock.read_count(), 1);
    }

    #[tokio::test]
    async fn write_only_value_is_not_read() {
        let mock = Arc::new(MockCluster::new(0x0003));
        let mut value = Value::new(ValueKind::Identify, 1);
        value.attach(mock.clone());
        assert_eq!(value.refresh().await, Ok(None));
        assert_eq!(mock.read_count(), 0);
    }

    #[test]
    fn attach_registers_listener_for_report_values() {
        let mut value = Value::new(ValueKind::Identify, 1);
        value.attach(Arc::new(MockCluster::new(0x0003)));
        assert!(!value.is_listening());

        let mut value = Value::new(ValueKind::OnOff, 1);
        value.attach(Arc::new(MockCluster::new(0x0006)));
        assert!(value.is_listening());
        assert!(value.should_bind());
    }
}
