//! General clusters: on/off, identify, alarms

use super::{check_status, ControlResult, ControlTarget, Effect, ValueKind};
use crate::radio::{AttrValue, ClusterCommand};

const ON_OFF_ATTRIBUTE: u16 = 0x0000;
const ON_TIME_ATTRIBUTE: u16 = 0x4001;
const ALARM_REPORT_COMMAND: u8 = 0x00;

pub(super) async fn on_off(target: &ControlTarget<'_>, data: &str) -> ControlResult {
    let command = if data.trim() == "1" {
        ClusterCommand::On
    } else {
        ClusterCommand::Off
    };
    let reply = target
        .cluster()?
        .command(command)
        .await
        .map_err(|e| e.to_string())?;
    tracing::debug!(?command, ?reply, "On/off reply");

    check_status(reply.status)?;
    Ok(vec![Effect::report_now(ON_OFF_ATTRIBUTE, reply.value)])
}

pub(super) async fn on_time(
    kind: ValueKind,
    target: &ControlTarget<'_>,
    data: &str,
) -> ControlResult {
    let tenths = kind.parse_number(data)?;
    let written = AttrValue::Int(tenths);
    let statuses = target
        .cluster()?
        .write_attributes(&[(ON_TIME_ATTRIBUTE, written.clone())], target.manufacturer)
        .await
        .map_err(|e| e.to_string())?;

    for status in &statuses {
        check_status(status.status)?;
    }
    Ok(vec![Effect::report_now(ON_TIME_ATTRIBUTE, written)])
}

pub(super) async fn identify(
    kind: ValueKind,
    target: &ControlTarget<'_>,
    data: &str,
) -> ControlResult {
    let seconds = kind.parse_number(data)?;
    let reply = target
        .cluster()?
        .command(ClusterCommand::Identify {
            seconds: seconds as u16,
        })
        .await
        .map_err(|e| e.to_string())?;
    tracing::debug!(seconds, ?reply, "Identify reply");

    check_status(reply.status)?;
    Ok(Vec::new())
}

pub(super) async fn reset_all_alarms(target: &ControlTarget<'_>) -> ControlResult {
    let reply = target
        .cluster()?
        .command(ClusterCommand::ResetAllAlarms)
        .await
        .map_err(|e| e.to_string())?;
    tracing::debug!(?reply, "Reset all alarms reply");

    check_status(reply.status)?;
    Ok(Vec::new())
}

/// Alarm cluster commands are only logged
pub(super) fn alarm_command(ieee: &str, command_id: u8, args: &[AttrValue]) {
    if command_id == ALARM_REPORT_COMMAND {
        let code = args.first().map(|a| a.to_string()).unwrap_or_default();
        let cluster = args.get(1).map(|a| a.to_string()).unwrap_or_default();
        tracing::info!(ieee = %ieee, code = %code, cluster = %cluster, "Alarm report");
    } else {
        tracing::debug!(ieee = %ieee, command_id, "Alarm cluster command");
    }
}
