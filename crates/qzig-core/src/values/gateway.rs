//! Network management values of the gateway pseudo-device

use std::time::Duration;

use super::{ControlResult, ControlTarget, Effect, ValueKind};
use crate::radio::AttrValue;

/// Permit window opened for keyed joins
pub const INSTALL_CODE_PERMIT_SECONDS: u8 = 180;
/// Node address (8 bytes) plus the shortest install code (10 bytes)
pub const JOIN_KEY_MIN_BYTES: usize = 18;
pub const INSTALL_KEY_MIN_BYTES: usize = 8;

const NODE_ADDRESS_BYTES: usize = 8;

fn decode_key(data: &str, min: usize) -> Result<Vec<u8>, String> {
    let bytes = hex::decode(data.trim()).map_err(|e| {
        tracing::error!(error = %e, "Invalid hex data");
        "Invalid hex data".to_string()
    })?;
    if bytes.len() < min {
        return Err(format!(
            "Install code has to be minimal {} characters, not {}",
            min,
            bytes.len()
        ));
    }
    Ok(bytes)
}

/// Open the network for `t` seconds; report `t` now and `0` when it closes
pub(super) async fn permit_join(
    kind: ValueKind,
    target: &ControlTarget<'_>,
    data: &str,
) -> ControlResult {
    let seconds = kind.parse_number(data)? as u8;
    target
        .radio
        .permit(seconds)
        .await
        .map_err(|e| e.to_string())?;
    tracing::info!(seconds, "Permit join");

    Ok(vec![
        Effect::report_now(0, AttrValue::Int(i64::from(seconds))),
        Effect::Report {
            delay: Duration::from_secs(u64::from(seconds)),
            attribute: 0,
            value: AttrValue::Int(0),
        },
    ])
}

/// Keyed join: node address followed by the install code
pub(super) async fn join_key(target: &ControlTarget<'_>, data: &str) -> ControlResult {
    let bytes = decode_key(data, JOIN_KEY_MIN_BYTES)?;
    let (node, code) = bytes.split_at(NODE_ADDRESS_BYTES);
    target
        .radio
        .permit_with_key(node, code, INSTALL_CODE_PERMIT_SECONDS)
        .await
        .map_err(|e| e.to_string())?;
    tracing::info!(node = %hex::encode(node), "Permit join with key");

    Ok(Vec::new())
}

/// Install code for whichever device joins next
pub(super) async fn install_key(target: &ControlTarget<'_>, data: &str) -> ControlResult {
    let code = decode_key(data, INSTALL_KEY_MIN_BYTES)?;
    target
        .radio
        .permit(INSTALL_CODE_PERMIT_SECONDS)
        .await
        .map_err(|e| e.to_string())?;
    tracing::info!("Install code armed for the next joining device");

    Ok(vec![Effect::ArmInstallCode(code)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::mock::{MockRadio, RadioCall};

    async fn run(kind: ValueKind, data: &str) -> (MockRadio, ControlResult) {
        let radio = MockRadio::new();
        let result = {
            let target = ControlTarget {
                cluster: None,
                radio: &radio,
                manufacturer: None,
            };
            kind.control(&target, data).await
        };
        (radio, result)
    }

    #[tokio::test]
    async fn permit_join_reports_open_then_closed() {
        let (radio, result) = run(ValueKind::PermitJoin, "60").await;
        assert_eq!(radio.calls(), vec![RadioCall::Permit(60)]);
        assert_eq!(
            result.unwrap(),
            vec![
                Effect::report_now(0, AttrValue::Int(60)),
                Effect::Report {
                    delay: Duration::from_secs(60),
                    attribute: 0,
                    value: AttrValue::Int(0),
                },
            ]
        );
    }

    #[tokio::test]
    async fn permit_join_above_limit_is_rejected() {
        let (radio, result) = run(ValueKind::PermitJoin, "251").await;
        assert!(result.is_err());
        assert!(radio.calls().is_empty());
    }

    #[tokio::test]
    async fn join_key_splits_node_and_code() {
        let (radio, result) =
            run(ValueKind::JoinKey, "000b57fffe42661a11223344556677884AF7").await;
        assert!(result.unwrap().is_empty());
        assert_eq!(
            radio.calls(),
            vec![RadioCall::PermitWithKey {
                node: hex::decode("000b57fffe42661a").unwrap(),
                code: hex::decode("11223344556677884AF7").unwrap(),
                seconds: 180,
            }]
        );
    }

    #[tokio::test]
    async fn join_key_rejects_bad_hex() {
        let (_, result) = run(ValueKind::JoinKey, "zz").await;
        assert_eq!(result.unwrap_err(), "Invalid hex data");
    }

    #[tokio::test]
    async fn join_key_rejects_short_code() {
        let (_, result) = run(ValueKind::JoinKey, "0011223344").await;
        assert_eq!(
            result.unwrap_err(),
            "Install code has to be minimal 18 characters, not 5"
        );
    }

    #[tokio::test]
    async fn install_key_arms_code() {
        let (radio, result) = run(ValueKind::InstallKey, "11223344556677884AF7").await;
        assert_eq!(
            result.unwrap(),
            vec![Effect::ArmInstallCode(
                hex::decode("11223344556677884AF7").unwrap()
            )]
        );
        assert_eq!(radio.calls(), vec![RadioCall::Permit(180)]);
    }

    #[tokio::test]
    async fn install_key_rejects_short_code() {
        let (_, result) = run(ValueKind::InstallKey, "0011").await;
        assert_eq!(
            result.unwrap_err(),
            "Install code has to be minimal 8 characters, not 2"
        );
    }
}
