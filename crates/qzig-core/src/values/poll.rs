//! Poll control cluster: one cluster, five values

use super::{check_status, ControlResult, ControlTarget, Effect, ValueKind};
use crate::radio::{AttrValue, ClusterCommand};

/// Check-in interval and fast poll timeout are plain attribute writes
pub(super) async fn write_interval(
    kind: ValueKind,
    target: &ControlTarget<'_>,
    data: &str,
) -> ControlResult {
    let attribute = kind
        .spec()
        .attribute
        .ok_or_else(|| format!("{} has no attribute", kind.spec().name))?;
    let written = AttrValue::Int(kind.parse_number(data)?);

    let statuses = target
        .cluster()?
        .write_attributes(&[(attribute, written.clone())], target.manufacturer)
        .await
        .map_err(|e| e.to_string())?;
    tracing::debug!(?kind, ?statuses, "Poll control write");

    for status in &statuses {
        check_status(status.status)?;
    }
    Ok(vec![Effect::report_now(attribute, written)])
}

pub(super) async fn long_poll_interval(
    kind: ValueKind,
    target: &ControlTarget<'_>,
    data: &str,
) -> ControlResult {
    let interval = kind.parse_number(data)?;
    let reply = target
        .cluster()?
        .command(ClusterCommand::SetLongPollInterval(interval as u32))
        .await
        .map_err(|e| e.to_string())?;

    check_status(reply.status)?;
    Ok(vec![Effect::report_now(0x0001, reply.value)])
}

pub(super) async fn short_poll_interval(
    kind: ValueKind,
    target: &ControlTarget<'_>,
    data: &str,
) -> ControlResult {
    let interval = kind.parse_number(data)?;
    let reply = target
        .cluster()?
        .command(ClusterCommand::SetShortPollInterval(interval as u16))
        .await
        .map_err(|e| e.to_string())?;

    check_status(reply.status)?;
    Ok(vec![Effect::report_now(0x0002, reply.value)])
}

pub(super) async fn fast_poll_stop(target: &ControlTarget<'_>) -> ControlResult {
    let reply = target
        .cluster()?
        .command(ClusterCommand::FastPollStop)
        .await
        .map_err(|e| e.to_string())?;

    check_status(reply.status)?;
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::radio::mock::{MockCluster, MockRadio};
    use crate::radio::Cluster;

    async fn run(kind: ValueKind, data: &str) -> (Arc<MockCluster>, ControlResult) {
        let mock = Arc::new(MockCluster::new(0x0020));
        let cluster: Arc<dyn Cluster> = mock.clone();
        let radio = MockRadio::new();
        let target = ControlTarget {
            cluster: Some(&cluster),
            radio: &radio,
            manufacturer: None,
        };
        let result = kind.control(&target, data).await;
        (mock, result)
    }

    #[tokio::test]
    async fn check_in_interval_is_written() {
        let (mock, result) = run(ValueKind::CheckInInterval, "7200").await;
        assert_eq!(mock.writes(), vec![(0, AttrValue::Int(7200))]);
        assert_eq!(
            result.unwrap(),
            vec![Effect::report_now(0, AttrValue::Int(7200))]
        );
    }

    #[tokio::test]
    async fn long_poll_interval_uses_command() {
        let (mock, result) = run(ValueKind::LongPollInterval, "40").await;
        assert_eq!(
            mock.commands(),
            vec![ClusterCommand::SetLongPollInterval(40)]
        );
        assert_eq!(
            result.unwrap(),
            vec![Effect::report_now(1, AttrValue::Int(40))]
        );
    }

    #[tokio::test]
    async fn long_poll_interval_below_minimum_is_rejected() {
        let (mock, result) = run(ValueKind::LongPollInterval, "2").await;
        assert!(result.is_err());
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn fast_poll_stop_reports_nothing() {
        let (mock, result) = run(ValueKind::FastPollStop, "1").await;
        assert!(result.unwrap().is_empty());
        assert_eq!(mock.commands(), vec![ClusterCommand::FastPollStop]);
    }
}
