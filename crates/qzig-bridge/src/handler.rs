//! Requests from the remote server
//!
//! Urls end in `<kind>/<id>`; only `state` and `device` are served.
//!
//! | method | state                          | device                    |
//! |--------|--------------------------------|---------------------------|
//! | PUT    | control a CONTROL state        | -                         |
//! | GET    | re-read a REPORT state, push it | push the device payload   |
//! | DELETE | -                              | leave the mesh and remove |

use std::sync::Arc;

use async_trait::async_trait;
use qzig_core::{parse_resource_url, Node, Uplink};
use qzig_rpc::{HandlerResult, RequestHandler, RequestParams};
use serde_json::Value as JsonValue;

use crate::bridge::Inner;
use crate::reports::apply_effects;

pub(crate) struct BridgeHandler {
    inner: Arc<Inner>,
}

impl BridgeHandler {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    async fn control_state(&self, state_id: &str, data: &str) -> HandlerResult {
        let inner = &self.inner;
        let (value_path, pending) = {
            let mut network = inner.network.lock().await;
            let (path, value) = network
                .value_for_state_mut(state_id)
                .ok_or_else(|| not_found(state_id))?;
            (path, value.begin_control(state_id, data)?)
        };

        // The tree stays unlocked while the radio works
        let result = inner
            .bounded("Radio command", pending.run(inner.radio.as_ref()))
            .await;

        let mut network = inner.network.lock().await;
        let value_id = value_path.id().to_string();
        if let Some((_, value)) = network.value_mut(&value_id) {
            value.finish_control(result.is_ok());
            if let Err(e) = inner.store.save(&value_path, &*value) {
                tracing::error!(value = %value_id, error = %e, "Failed to save value");
            }
        }

        let effects = result.map_err(|e| {
            tracing::warn!(state = %state_id, error = %e, "Control failed");
            e
        })?;
        apply_effects(inner, &mut network, &value_id, effects);
        Ok(())
    }

    async fn refresh_state(&self, state_id: &str) -> HandlerResult {
        let inner = &self.inner;
        let (value_path, request) = {
            let mut network = inner.network.lock().await;
            let (path, value) = network
                .value_for_state_mut(state_id)
                .ok_or_else(|| not_found(state_id))?;
            if !value.state(state_id).is_some_and(|s| s.is_report()) {
                return Err(format!("State {} can not be read", state_id));
            }
            (path, value.read_request())
        };

        let read = match request {
            Some(request) => {
                let attribute = request.attribute;
                inner
                    .bounded("Attribute read", async move {
                        request.run().await.map_err(|e| e.to_string())
                    })
                    .await?
                    .map(|value| (attribute, value))
            }
            None => None,
        };

        let mut network = inner.network.lock().await;
        let ctx = inner.ctx();
        let refreshed = read.and_then(|(attribute, value)| {
            network.report(value_path.id(), attribute, &value, &ctx)
        });
        if refreshed.is_none() {
            network.publish_state(&value_path, state_id, &ctx);
        }
        Ok(())
    }

    async fn push_device(&self, device_id: &str) -> HandlerResult {
        let network = self.inner.network.lock().await;
        let device = network
            .device_by_id(device_id)
            .ok_or_else(|| not_found(device_id))?;
        let url = network.device_path(device).url();
        self.inner.uplink.put(&url, device.data());
        Ok(())
    }

    async fn delete_device(&self, device_id: &str) -> HandlerResult {
        let inner = &self.inner;
        let (ieee, live) = {
            let network = inner.network.lock().await;
            let device = network
                .device_by_id(device_id)
                .ok_or_else(|| not_found(device_id))?;
            if device.is_gateway() {
                return Err("The gateway can not be deleted".to_string());
            }
            (device.ieee().to_string(), device.live().cloned())
        };

        if let Some(live) = live {
            let left = inner
                .bounded("Leave request", async move {
                    live.leave().await.map_err(|e| e.to_string())
                })
                .await;
            if let Err(e) = left {
                tracing::warn!(ieee = %ieee, error = %e, "Device did not leave the mesh");
            }
        }

        let mut network = inner.network.lock().await;
        inner.remove_device(&mut network, &ieee);
        Ok(())
    }
}

fn not_found(id: &str) -> String {
    format!("Failed to find id {}", id)
}

fn invalid_service(kind: &str) -> String {
    format!("Invalid service ({}) in url", kind)
}

fn resource(url: &str) -> Result<(&str, &str), String> {
    parse_resource_url(url).ok_or_else(|| format!("Invalid url {}", url))
}

/// The `data` field of a state payload as text
fn control_data(data: Option<&JsonValue>) -> Result<String, String> {
    match data.and_then(|d| d.get("data")) {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        Some(JsonValue::Bool(b)) => Ok(if *b { "1" } else { "0" }.to_string()),
        _ => Err("Missing data in request".to_string()),
    }
}

#[async_trait]
impl RequestHandler for BridgeHandler {
    async fn put(&self, params: RequestParams) -> HandlerResult {
        let (kind, id) = resource(&params.url)?;
        if kind != "state" {
            return Err(invalid_service(kind));
        }
        let data = control_data(params.data.as_ref())?;
        self.control_state(id, &data).await
    }

    async fn get(&self, params: RequestParams) -> HandlerResult {
        match resource(&params.url)? {
            ("state", id) => self.refresh_state(id).await,
            ("device", id) => self.push_device(id).await,
            (kind, _) => Err(invalid_service(kind)),
        }
    }

    async fn delete(&self, params: RequestParams) -> HandlerResult {
        match resource(&params.url)? {
            ("device", id) => self.delete_device(id).await,
            (kind, _) => Err(invalid_service(kind)),
        }
    }
}
