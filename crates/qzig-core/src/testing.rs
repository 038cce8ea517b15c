//! Test helpers
//!
//! [`RecordingUplink`] keeps every outbound notification so tests can
//! assert on what would have been sent to the remote server.

use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::uplink::Uplink;

/// One recorded notification
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkFrame {
    pub method: &'static str,
    pub url: String,
    pub data: Option<JsonValue>,
}

#[derive(Debug, Default)]
pub struct RecordingUplink {
    frames: Mutex<Vec<UplinkFrame>>,
}

impl RecordingUplink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<UplinkFrame> {
        self.frames.lock().clone()
    }

    /// Frames sent with `method`
    pub fn sent(&self, method: &str) -> Vec<UplinkFrame> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.method == method)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    fn record(&self, method: &'static str, url: &str, data: Option<JsonValue>) {
        self.frames.lock().push(UplinkFrame {
            method,
            url: url.to_string(),
            data,
        });
    }
}

impl Uplink for RecordingUplink {
    fn post(&self, url: &str, data: JsonValue) {
        self.record("POST", url, Some(data));
    }

    fn put(&self, url: &str, data: JsonValue) {
        self.record("PUT", url, Some(data));
    }

    fn delete(&self, url: &str) {
        self.record("DELETE", url, None);
    }
}
