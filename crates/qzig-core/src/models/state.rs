//! State: the last known value in one direction

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::node::{Node, NodeKind, NodeRecord};
use crate::error::{ModelError, ModelResult};

pub const STATE_URN: &str = "urn:seluxit:xml:bastard:state-1.1";

/// Direction of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
    /// Last value read from the device
    Report,
    /// Last value requested by the remote side
    Control,
}

/// Delivery status of a state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateStatus {
    #[default]
    Send,
    Pending,
    Failed,
}

/// Current timestamp in the wire format (ISO-8601 UTC, second precision)
pub fn timestamp_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn state_urn() -> String {
    STATE_URN.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(rename = ":type", default = "state_urn")]
    urn: String,
    #[serde(rename = ":id")]
    id: String,
    #[serde(rename = "type")]
    state_type: StateType,
    #[serde(default)]
    status: StateStatus,
    #[serde(default = "timestamp_now")]
    timestamp: String,
    #[serde(default)]
    data: String,
}

impl State {
    pub fn new(state_type: StateType, initial: impl Into<String>) -> Self {
        Self {
            urn: state_urn(),
            id: uuid::Uuid::new_v4().to_string(),
            state_type,
            status: StateStatus::Send,
            timestamp: timestamp_now(),
            data: initial.into(),
        }
    }

    pub fn from_record(record: &NodeRecord) -> ModelResult<Self> {
        serde_json::from_value(record.data.clone()).map_err(|source| ModelError::InvalidPayload {
            kind: "state",
            source,
        })
    }

    pub fn state_type(&self) -> StateType {
        self.state_type
    }

    pub fn is_report(&self) -> bool {
        self.state_type == StateType::Report
    }

    pub fn status(&self) -> StateStatus {
        self.status
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Store new data and refresh the timestamp
    pub fn update(&mut self, data: impl Into<String>, status: StateStatus) {
        self.data = data.into();
        self.status = status;
        self.timestamp = timestamp_now();
    }
}

impl Node for State {
    fn kind(&self) -> NodeKind {
        NodeKind::State
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn payload(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_default()
    }
}
