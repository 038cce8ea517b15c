//! Radio callbacks

use std::sync::Arc;

use qzig_core::values::INSTALL_CODE_PERMIT_SECONDS;
use qzig_core::RadioEvent;
use tokio::sync::broadcast;

use crate::bridge::Inner;

/// Handle radio callbacks until the radio goes away
pub(crate) async fn run(inner: Arc<Inner>, mut events: broadcast::Receiver<RadioEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => handle(&inner, event).await,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Radio event listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("Radio event channel closed");
                break;
            }
        }
    }
}

pub(crate) async fn handle(inner: &Arc<Inner>, event: RadioEvent) {
    match event {
        RadioEvent::DeviceJoined { ieee } => device_joined(inner, &ieee).await,
        RadioEvent::DeviceLeft { ieee } => {
            tracing::info!(ieee = %ieee, "Device left");
            if let Err(e) = inner.radio.remove(&ieee).await {
                tracing::warn!(ieee = %ieee, error = %e, "Failed to remove device from the radio");
            }
        }
        RadioEvent::DeviceRemoved { ieee } => {
            let mut network = inner.network.lock().await;
            inner.remove_device(&mut network, &ieee);
        }
        RadioEvent::DeviceInitialized { ieee } => match inner.radio.get_device(&ieee) {
            Some(live) => {
                tracing::info!(ieee = %ieee, "Device initialized");
                let mut network = inner.network.lock().await;
                network.add_device(live, true, &inner.ctx()).await;
            }
            None => tracing::warn!(ieee = %ieee, "Initialized device is unknown to the radio"),
        },
        RadioEvent::AttributeUpdated {
            ieee,
            endpoint,
            cluster,
            attribute,
            value,
        } => {
            let mut network = inner.network.lock().await;
            let updated =
                network.attribute_updated(&ieee, endpoint, cluster, attribute, &value, &inner.ctx());
            tracing::debug!(
                ieee = %ieee,
                cluster,
                attribute,
                states = updated.len(),
                "Attribute updated"
            );
        }
        RadioEvent::ClusterCommand {
            ieee,
            endpoint,
            cluster,
            tsn,
            command_id,
            args,
        } => {
            let answer = {
                let network = inner.network.lock().await;
                match network.device_by_ieee(&ieee) {
                    Some(device) => device.cluster_command(
                        endpoint,
                        cluster,
                        command_id,
                        &args,
                        &inner.config.ota_dir,
                    ),
                    None => {
                        tracing::debug!(ieee = %ieee, cluster, tsn, "Command from unknown device");
                        None
                    }
                }
            };
            if let Some((target, response)) = answer {
                let sent = inner
                    .bounded("Cluster response", async move {
                        target.respond(tsn, response).await.map_err(|e| e.to_string())
                    })
                    .await;
                if let Err(e) = sent {
                    tracing::warn!(ieee = %ieee, cluster, tsn, error = %e, "Failed to answer cluster command");
                }
            }
        }
        RadioEvent::ZdoCommand {
            ieee, command_id, ..
        } => {
            tracing::debug!(ieee = %ieee, command_id, "ZDO command");
        }
    }
}

/// A pending install code is spent on the first device that joins
async fn device_joined(inner: &Inner, ieee: &str) {
    let Some(code) = inner.install_code.lock().take() else {
        tracing::info!(ieee = %ieee, "Device joined");
        return;
    };
    let Some(node) = ieee_bytes(ieee) else {
        tracing::error!(ieee = %ieee, "Joined device has an invalid address");
        return;
    };
    tracing::info!(ieee = %ieee, "Device joined, permitting with install code");
    if let Err(e) = inner
        .radio
        .permit_with_key(&node, &code, INSTALL_CODE_PERMIT_SECONDS)
        .await
    {
        tracing::error!(ieee = %ieee, error = %e, "Permit with install code failed");
    }
}

/// `00:0d:6f:...` to its eight bytes
fn ieee_bytes(ieee: &str) -> Option<Vec<u8>> {
    let bytes = hex::decode(ieee.replace(':', "")).ok()?;
    (bytes.len() == 8).then_some(bytes)
}
