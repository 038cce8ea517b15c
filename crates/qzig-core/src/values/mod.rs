//! Concrete value kinds
//!
//! Every capability the bridge knows how to expose is one [`ValueKind`]
//! variant. A kind describes itself with a static [`ValueSpec`] (name,
//! permission, payload format, cluster binding) and implements the
//! conversion of attribute reports and the dispatch of control requests.
//! The [`crate::registry::ValueRegistry`] maps cluster ids to kinds.

mod gateway;
mod general;
mod ota;
mod poll;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{NumberFormat, Permission, StringFormat, ValueFormat};
use crate::radio::{AttrValue, Cluster, ClusterResponse, RadioController, OTA_CLUSTER};

pub use gateway::{INSTALL_CODE_PERMIT_SECONDS, JOIN_KEY_MIN_BYTES, INSTALL_KEY_MIN_BYTES};
pub use ota::{IMAGE_BLOCK, QUERY_NEXT_IMAGE, UPGRADE_END};

/// Manufacturer specific cluster carrying the device state
pub const DEVICE_STATE_CLUSTER: u16 = 0xFC00;
/// Manufacturer code the device state cluster belongs to
pub const DEVICE_STATE_MANUFACTURER: u16 = 0x1235;

/// Outcome of a control request: follow-up effects, or the error text
/// returned to the remote peer
pub type ControlResult = Result<Vec<Effect>, String>;

/// Follow-up work requested by a successful control
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Update the value's REPORT state with `value` after `delay`
    Report {
        delay: Duration,
        attribute: u16,
        value: AttrValue,
    },
    /// Keep an install code for the next device that joins
    ArmInstallCode(Vec<u8>),
}

impl Effect {
    pub fn report_now(attribute: u16, value: AttrValue) -> Self {
        Effect::Report {
            delay: Duration::ZERO,
            attribute,
            value,
        }
    }
}

/// Everything a control handler may touch
pub struct ControlTarget<'a> {
    pub cluster: Option<&'a Arc<dyn Cluster>>,
    pub radio: &'a dyn RadioController,
    pub manufacturer: Option<u16>,
}

impl<'a> ControlTarget<'a> {
    fn cluster(&self) -> Result<&'a Arc<dyn Cluster>, String> {
        self.cluster
            .ok_or_else(|| "Value is not bound to a radio cluster".to_string())
    }
}

/// Payload format of a kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormatSpec {
    Number {
        min: f64,
        max: f64,
        step: f64,
        unit: &'static str,
    },
    String {
        max: u32,
        encoding: &'static str,
    },
}

impl FormatSpec {
    pub fn to_format(&self) -> ValueFormat {
        match *self {
            FormatSpec::Number {
                min,
                max,
                step,
                unit,
            } => ValueFormat::Number(NumberFormat {
                min,
                max,
                step,
                unit: unit.to_string(),
            }),
            FormatSpec::String { max, encoding } => ValueFormat::String(StringFormat {
                max,
                encoding: encoding.to_string(),
            }),
        }
    }
}

/// Static description of a kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueSpec {
    pub name: &'static str,
    pub value_type: &'static str,
    pub permission: Permission,
    pub format: FormatSpec,
    /// Cluster id; negative ids are the gateway's own values
    pub cluster: i32,
    /// Disambiguates several kinds on one cluster
    pub index: u32,
    pub manufacturer: Option<u16>,
    /// Attribute holding the reported value
    pub attribute: Option<u16>,
    /// Ask the device to report this cluster
    pub bind: bool,
}

const fn number(min: f64, max: f64, step: f64, unit: &'static str) -> FormatSpec {
    FormatSpec::Number {
        min,
        max,
        step,
        unit,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    BatteryVoltage,
    Identify,
    OnOff,
    OnTime,
    ResetAllAlarms,
    CheckInInterval,
    LongPollInterval,
    ShortPollInterval,
    FastPollTimeout,
    FastPollStop,
    Temperature,
    Humidity,
    Rssi,
    DeviceState,
    Ota,
    PermitJoin,
    JoinKey,
    InstallKey,
}

impl ValueKind {
    pub const ALL: [ValueKind; 18] = [
        ValueKind::BatteryVoltage,
        ValueKind::Identify,
        ValueKind::OnOff,
        ValueKind::OnTime,
        ValueKind::ResetAllAlarms,
        ValueKind::CheckInInterval,
        ValueKind::LongPollInterval,
        ValueKind::ShortPollInterval,
        ValueKind::FastPollTimeout,
        ValueKind::FastPollStop,
        ValueKind::Temperature,
        ValueKind::Humidity,
        ValueKind::Rssi,
        ValueKind::DeviceState,
        ValueKind::Ota,
        ValueKind::PermitJoin,
        ValueKind::JoinKey,
        ValueKind::InstallKey,
    ];

    /// Kinds created for the gateway pseudo-device
    pub const GATEWAY: [ValueKind; 3] = [
        ValueKind::PermitJoin,
        ValueKind::JoinKey,
        ValueKind::InstallKey,
    ];

    pub fn spec(self) -> ValueSpec {
        use Permission::*;

        let base = ValueSpec {
            name: "",
            value_type: "",
            permission: ReadOnly,
            format: number(0.0, 0.0, 0.0, ""),
            cluster: 0,
            index: 0,
            manufacturer: None,
            attribute: None,
            bind: false,
        };

        match self {
            ValueKind::BatteryVoltage => ValueSpec {
                name: "Battery Voltage",
                value_type: "Voltage",
                format: number(0.0, 255.0, 1.0, "mV"),
                cluster: 0x0001,
                attribute: Some(0x0020),
                bind: true,
                ..base
            },
            ValueKind::Identify => ValueSpec {
                name: "Identify",
                value_type: "Identify",
                permission: WriteOnly,
                format: number(0.0, 120.0, 1.0, "seconds"),
                cluster: 0x0003,
                ..base
            },
            ValueKind::OnOff => ValueSpec {
                name: "On/Off",
                value_type: "On/Off",
                permission: ReadWrite,
                format: number(0.0, 1.0, 1.0, "boolean"),
                cluster: 0x0006,
                attribute: Some(0x0000),
                bind: true,
                ..base
            },
            ValueKind::OnTime => ValueSpec {
                name: "On Time",
                value_type: "Timeout",
                permission: ReadWrite,
                format: number(0.0, 65535.0, 1.0, "tenth seconds"),
                cluster: 0x0006,
                index: 1,
                attribute: Some(0x4001),
                ..base
            },
            ValueKind::ResetAllAlarms => ValueSpec {
                name: "Reset All Alarms",
                value_type: "On/Off",
                permission: WriteOnly,
                format: number(0.0, 1.0, 1.0, "boolean"),
                cluster: 0x0009,
                bind: true,
                ..base
            },
            ValueKind::CheckInInterval => ValueSpec {
                name: "Check-in Interval",
                value_type: "Interval",
                permission: ReadWrite,
                format: number(0.0, 7208960.0, 1.0, "quarter seconds"),
                cluster: 0x0020,
                attribute: Some(0x0000),
                ..base
            },
            ValueKind::LongPollInterval => ValueSpec {
                name: "Long Poll Interval",
                value_type: "Interval",
                permission: ReadWrite,
                format: number(4.0, 7208960.0, 1.0, "quarter seconds"),
                cluster: 0x0020,
                index: 1,
                attribute: Some(0x0001),
                ..base
            },
            ValueKind::ShortPollInterval => ValueSpec {
                name: "Short Poll Interval",
                value_type: "Interval",
                permission: ReadWrite,
                format: number(1.0, 65535.0, 1.0, "quarter seconds"),
                cluster: 0x0020,
                index: 2,
                attribute: Some(0x0002),
                ..base
            },
            ValueKind::FastPollTimeout => ValueSpec {
                name: "Fast Poll Timeout",
                value_type: "Timeout",
                permission: ReadWrite,
                format: number(1.0, 65535.0, 1.0, "quarter seconds"),
                cluster: 0x0020,
                index: 3,
                attribute: Some(0x0003),
                ..base
            },
            ValueKind::FastPollStop => ValueSpec {
                name: "Stop Fast Poll",
                value_type: "Command",
                permission: WriteOnly,
                format: number(0.0, 1.0, 1.0, ""),
                cluster: 0x0020,
                index: 4,
                ..base
            },
            ValueKind::Temperature => ValueSpec {
                name: "Temperature",
                value_type: "Temperature",
                format: number(-273.15, 327.67, 0.01, "celcius"),
                cluster: 0x0402,
                attribute: Some(0x0000),
                bind: true,
                ..base
            },
            ValueKind::Humidity => ValueSpec {
                name: "Humidity",
                value_type: "Humidity",
                format: number(0.0, 100.0, 0.01, "percentage"),
                cluster: 0x0405,
                attribute: Some(0x0000),
                bind: true,
                ..base
            },
            ValueKind::Rssi => ValueSpec {
                name: "RSSI",
                value_type: "Rssi",
                format: number(0.0, 255.0, 1.0, ""),
                cluster: 0x0B05,
                attribute: Some(0x011D),
                bind: true,
                ..base
            },
            ValueKind::DeviceState => ValueSpec {
                name: "Device State",
                value_type: "Device Mode",
                format: number(0.0, 8.0, 1.0, ""),
                cluster: i32::from(DEVICE_STATE_CLUSTER),
                manufacturer: Some(DEVICE_STATE_MANUFACTURER),
                attribute: Some(0x0000),
                bind: true,
                ..base
            },
            ValueKind::Ota => ValueSpec {
                name: "Ota",
                value_type: "Ota",
                format: FormatSpec::String {
                    max: 50,
                    encoding: "utf-8",
                },
                cluster: i32::from(OTA_CLUSTER),
                attribute: Some(0x0006),
                ..base
            },
            ValueKind::PermitJoin => ValueSpec {
                name: "Permit Join",
                value_type: "Network Management",
                permission: ReadWrite,
                format: number(0.0, 250.0, 1.0, "seconds"),
                cluster: -1,
                attribute: Some(0x0000),
                ..base
            },
            ValueKind::JoinKey => ValueSpec {
                name: "Join Key",
                value_type: "Network Management",
                permission: ReadWrite,
                format: FormatSpec::String {
                    max: 26,
                    encoding: "hexbinary",
                },
                cluster: -2,
                ..base
            },
            ValueKind::InstallKey => ValueSpec {
                name: "Install Key",
                value_type: "Network Management",
                permission: ReadWrite,
                format: FormatSpec::String {
                    max: 18,
                    encoding: "hexbinary",
                },
                cluster: -3,
                ..base
            },
        }
    }

    /// Kind persisted under `(cluster, index)`
    pub fn from_key(cluster: i32, index: u32) -> Option<ValueKind> {
        Self::ALL.into_iter().find(|kind| {
            let spec = kind.spec();
            spec.cluster == cluster && spec.index == index
        })
    }

    pub fn is_gateway(self) -> bool {
        Self::GATEWAY.contains(&self)
    }

    /// Convert a raw attribute report into state data
    ///
    /// Returns `None` when the attribute does not belong to this kind.
    pub fn convert_report(self, attribute: u16, value: &AttrValue) -> Option<String> {
        if matches!(self, ValueKind::JoinKey | ValueKind::InstallKey) {
            return Some(value.to_string());
        }
        if self.spec().attribute != Some(attribute) {
            return None;
        }
        match self {
            ValueKind::Temperature | ValueKind::Humidity => {
                value.as_f64().map(|v| (v / 100.0).to_string())
            }
            ValueKind::BatteryVoltage => value.as_i64().map(|v| (v * 100).to_string()),
            _ => Some(
                value
                    .as_i64()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| value.to_string()),
            ),
        }
    }

    /// Run a control request against the radio
    pub async fn control(self, target: &ControlTarget<'_>, data: &str) -> ControlResult {
        match self {
            ValueKind::OnOff => general::on_off(target, data).await,
            ValueKind::OnTime => general::on_time(self, target, data).await,
            ValueKind::Identify => general::identify(self, target, data).await,
            ValueKind::ResetAllAlarms => general::reset_all_alarms(target).await,
            ValueKind::CheckInInterval | ValueKind::FastPollTimeout => {
                poll::write_interval(self, target, data).await
            }
            ValueKind::LongPollInterval => poll::long_poll_interval(self, target, data).await,
            ValueKind::ShortPollInterval => poll::short_poll_interval(self, target, data).await,
            ValueKind::FastPollStop => poll::fast_poll_stop(target).await,
            ValueKind::PermitJoin => gateway::permit_join(self, target, data).await,
            ValueKind::JoinKey => gateway::join_key(target, data).await,
            ValueKind::InstallKey => gateway::install_key(target, data).await,
            ValueKind::BatteryVoltage
            | ValueKind::Temperature
            | ValueKind::Humidity
            | ValueKind::Rssi
            | ValueKind::DeviceState
            | ValueKind::Ota => Err(format!("{} can not be controlled", self.spec().name)),
        }
    }

    /// Handle a command sent by the device on this kind's cluster
    ///
    /// Returns the answer to send back, if the command needs one. Upgrade
    /// images are looked up in `ota_dir`.
    pub fn cluster_command(
        self,
        ieee: &str,
        command_id: u8,
        args: &[AttrValue],
        ota_dir: &Path,
    ) -> Option<ClusterResponse> {
        match self {
            ValueKind::ResetAllAlarms => {
                general::alarm_command(ieee, command_id, args);
                None
            }
            ValueKind::Ota => ota::command(ieee, ota_dir, command_id, args),
            _ => {
                tracing::debug!(
                    ieee = %ieee,
                    kind = ?self,
                    command_id,
                    "Unhandled cluster command"
                );
                None
            }
        }
    }

    /// Parse numeric control data and check it against the kind's range
    pub(crate) fn parse_number(self, data: &str) -> Result<i64, String> {
        let trimmed = data.trim();
        let number = trimmed
            .parse::<i64>()
            .ok()
            .or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| format!("Invalid number: {}", data))?;

        if let FormatSpec::Number { min, max, .. } = self.spec().format {
            let n = number as f64;
            if n < min || n > max {
                return Err(format!("Value {} is outside {}..{}", number, min, max));
            }
        }
        Ok(number)
    }
}

/// Fail a control when the device answered with a non-zero status
pub(crate) fn check_status(status: u8) -> Result<(), String> {
    if status == 0 {
        Ok(())
    } else {
        Err(format!("Command failed with status 0x{:02X}", status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn keys_are_unique() {
        for a in ValueKind::ALL {
            for b in ValueKind::ALL {
                if a != b {
                    let (sa, sb) = (a.spec(), b.spec());
                    assert!(
                        (sa.cluster, sa.index) != (sb.cluster, sb.index),
                        "{:?} and {:?} share a key",
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn from_key_finds_every_kind() {
        for kind in ValueKind::ALL {
            let spec = kind.spec();
            assert_eq!(ValueKind::from_key(spec.cluster, spec.index), Some(kind));
        }
        assert_eq!(ValueKind::from_key(0x0300, 0), None);
    }

    #[rstest]
    #[case(ValueKind::Temperature, 0, AttrValue::Int(1220), Some("12.2"))]
    #[case(ValueKind::Humidity, 0, AttrValue::Int(4500), Some("45"))]
    #[case(ValueKind::BatteryVoltage, 0x20, AttrValue::Int(30), Some("3000"))]
    #[case(ValueKind::OnOff, 0, AttrValue::Bool(true), Some("1"))]
    #[case(ValueKind::OnOff, 1, AttrValue::Int(1), None)]
    #[case(ValueKind::Rssi, 0x011D, AttrValue::Int(-60), Some("-60"))]
    #[case(ValueKind::JoinKey, 9, AttrValue::Text("00ff".into()), Some("00ff"))]
    #[case(ValueKind::Identify, 0, AttrValue::Int(1), None)]
    fn convert_report(
        #[case] kind: ValueKind,
        #[case] attribute: u16,
        #[case] value: AttrValue,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(
            kind.convert_report(attribute, &value).as_deref(),
            expected
        );
    }

    #[rstest]
    #[case("10", Ok(10))]
    #[case(" 7 ", Ok(7))]
    #[case("3.0", Ok(3))]
    #[case("2.9", Err(()))]
    #[case("NaN", Err(()))]
    #[case("inf", Err(()))]
    #[case("121", Err(()))]
    #[case("-1", Err(()))]
    #[case("ten", Err(()))]
    fn identify_number_range(#[case] data: &str, #[case] expected: Result<i64, ()>) {
        assert_eq!(
            ValueKind::Identify.parse_number(data).map_err(|_| ()),
            expected
        );
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(ValueKind::LongPollInterval).unwrap(),
            "long_poll_interval"
        );
    }

    #[test]
    fn permission_drives_states() {
        assert_eq!(ValueKind::Temperature.spec().permission, Permission::ReadOnly);
        assert_eq!(ValueKind::Identify.spec().permission, Permission::WriteOnly);
        assert_eq!(ValueKind::OnOff.spec().permission, Permission::ReadWrite);
    }
}
