//! The gateway pseudo-device
//!
//! The gateway is not a radio device. It carries the network management
//! values (permit join, keyed join, install code) and is recreated after
//! every load so those values always exist.

use super::device::Device;
use super::value::Value;
use crate::values::ValueKind;

/// Hardware address used for the gateway
pub const GATEWAY_IEEE: &str = "gateway";

impl Device {
    pub fn gateway() -> Self {
        let mut device = Device::new(GATEWAY_IEEE);
        device.info.name = "Gateway".to_string();
        device.info.manufacturer = "Seluxit".to_string();
        device.info.product = "Gateway".to_string();
        device.info.version = "1.0".to_string();
        device.info.description = "Device to control the gateway".to_string();
        device.info.communication = "Always Online".to_string();
        device.ensure_gateway_values();
        device
    }

    pub fn is_gateway(&self) -> bool {
        self.ieee == GATEWAY_IEEE
    }

    /// Add whichever management values are missing; returns true if any was added
    pub fn ensure_gateway_values(&mut self) -> bool {
        let mut added = false;
        for kind in ValueKind::GATEWAY {
            let spec = kind.spec();
            if self.values.iter().any(|v| v.kind() == kind) {
                continue;
            }
            tracing::debug!(value = spec.name, "Adding gateway value");
            self.insert_value(Value::new(kind, spec.cluster));
            added = true;
        }
        added
    }
}
