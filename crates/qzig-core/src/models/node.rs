//! Common node interface shared by every level of the tree

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

/// Level of a node in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Network,
    Device,
    Value,
    State,
}

impl NodeKind {
    /// Name used in URLs, directory names and JSON keys
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Network => "network",
            NodeKind::Device => "device",
            NodeKind::Value => "value",
            NodeKind::State => "state",
        }
    }

    /// Parse a URL segment
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "network" => Some(NodeKind::Network),
            "device" => Some(NodeKind::Device),
            "value" => Some(NodeKind::Value),
            "state" => Some(NodeKind::State),
            _ => None,
        }
    }

    /// Kind of the children held by this kind, if any
    pub fn child(&self) -> Option<NodeKind> {
        match self {
            NodeKind::Network => Some(NodeKind::Device),
            NodeKind::Device => Some(NodeKind::Value),
            NodeKind::Value => Some(NodeKind::State),
            NodeKind::State => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted form of one node
///
/// Stored as `<kind>.json` inside the node's directory. Children are never
/// part of the record; they live in their own directories below it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub data: JsonValue,
    #[serde(default = "empty_object")]
    pub attr: JsonValue,
}

pub(crate) fn empty_object() -> JsonValue {
    JsonValue::Object(Map::new())
}

/// Behaviour shared by Network, Device, Value and State.
///
/// Implementors only describe themselves (`payload`, `attributes`,
/// `children`); serialization and tree search are provided.
pub trait Node: Send + Sync {
    fn kind(&self) -> NodeKind;

    fn id(&self) -> &str;

    /// Payload of this node without its children
    fn payload(&self) -> JsonValue;

    /// Local metadata persisted with the node but never sent upstream
    fn attributes(&self) -> JsonValue {
        json!({})
    }

    /// Children in serialization order
    fn children(&self) -> Vec<&dyn Node> {
        Vec::new()
    }

    /// Full JSON tree rooted at this node
    ///
    /// Children are nested under the singular name of their kind, so a
    /// device carries `"value": [...]` and each value `"state": [...]`.
    fn data(&self) -> JsonValue {
        let mut data = self.payload();
        if let (Some(child_kind), JsonValue::Object(map)) = (self.kind().child(), &mut data) {
            let children = self.children().iter().map(|child| child.data()).collect();
            map.insert(child_kind.as_str().to_string(), JsonValue::Array(children));
        }
        data
    }

    /// Depth-first search below this node
    fn find_child(&self, id: &str) -> Option<&dyn Node> {
        for child in self.children() {
            if child.id() == id {
                return Some(child);
            }
            if let Some(found) = child.find_child(id) {
                return Some(found);
            }
        }
        None
    }

    fn record(&self) -> NodeRecord {
        NodeRecord {
            data: self.payload(),
            attr: self.attributes(),
        }
    }
}
