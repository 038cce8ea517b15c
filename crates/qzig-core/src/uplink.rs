//! Outbound notifications towards the remote server

use serde_json::Value as JsonValue;

use crate::registry::ValueRegistry;
use crate::store::Store;

/// Fire-and-forget notifications to the remote peer
///
/// Implementations queue the frame and return immediately; delivery
/// order follows call order.
pub trait Uplink: Send + Sync {
    fn post(&self, url: &str, data: JsonValue);

    fn put(&self, url: &str, data: JsonValue);

    fn delete(&self, url: &str);
}

/// Collaborators needed by tree operations that persist and notify
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub store: &'a Store,
    pub uplink: &'a dyn Uplink,
    pub registry: &'a ValueRegistry,
    /// Issue bind requests for newly created report values
    pub bind: bool,
}
