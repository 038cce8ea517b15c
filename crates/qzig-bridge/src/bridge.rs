//! The sync orchestrator

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use qzig_core::models::NodeKind;
use qzig_core::{Network, Node, RadioController, Store, SyncContext, Uplink, ValueRegistry};
use qzig_rpc::{RequestHandler, RpcClient, RpcError};
use serde_json::Value as JsonValue;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::events;
use crate::handler::BridgeHandler;
use crate::reports::ReportTimers;
use crate::uplink::RpcUplink;

/// Startup progress of a [`Bridge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Connecting,
    Loading,
    Reconciling,
    Live,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Connecting => "connecting",
            Phase::Loading => "loading",
            Phase::Reconciling => "reconciling",
            Phase::Live => "live",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State shared by the bridge, its RPC handler, the radio event loop and
/// the report timers
pub(crate) struct Inner {
    pub(crate) config: BridgeConfig,
    pub(crate) network: Mutex<Network>,
    pub(crate) store: Store,
    pub(crate) radio: Arc<dyn RadioController>,
    pub(crate) registry: ValueRegistry,
    pub(crate) uplink: RpcUplink,
    pub(crate) reports: ReportTimers,
    pub(crate) install_code: parking_lot::Mutex<Option<Vec<u8>>>,
    phase: watch::Sender<Phase>,
}

impl Inner {
    pub(crate) fn ctx(&self) -> SyncContext<'_> {
        SyncContext {
            store: &self.store,
            uplink: &self.uplink,
            registry: &self.registry,
            bind: self.config.bind,
        }
    }

    fn set_phase(&self, phase: Phase) {
        tracing::info!(%phase, "Bridge phase");
        self.phase.send_replace(phase);
    }

    /// Run a radio call bounded by the command timeout
    pub(crate) async fn bounded<T, F>(&self, what: &str, call: F) -> Result<T, String>
    where
        F: Future<Output = Result<T, String>>,
    {
        match self.config.command_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(format!("{} timed out after {:?}", what, limit))),
            None => call.await,
        }
    }

    /// Remove a device and forget its pending reports
    pub(crate) fn remove_device(&self, network: &mut Network, ieee: &str) -> bool {
        if let Some(device) = network.device_by_ieee(ieee) {
            for value in device.values() {
                self.reports.cancel(value.id());
            }
        }
        network.remove_device(ieee, &self.ctx()).is_some()
    }
}

/// Keeps the network tree, the radio and the remote server in sync
pub struct Bridge {
    inner: Arc<Inner>,
    events: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        store: Store,
        radio: Arc<dyn RadioController>,
        registry: ValueRegistry,
        client: RpcClient,
    ) -> Self {
        let network = Network::new(&config.network_id, &config.network_name);
        let (phase, _) = watch::channel(Phase::Init);
        Self {
            inner: Arc::new(Inner {
                config,
                network: Mutex::new(network),
                store,
                radio,
                registry,
                uplink: RpcUplink::new(client),
                reports: ReportTimers::default(),
                install_code: parking_lot::Mutex::new(None),
                phase,
            }),
            events: parking_lot::Mutex::new(None),
        }
    }

    /// Handler serving the remote server's requests
    pub fn handler(&self) -> Arc<dyn RequestHandler> {
        Arc::new(BridgeHandler::new(Arc::clone(&self.inner)))
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    /// The network tree, for inspection
    pub fn network(&self) -> &Mutex<Network> {
        &self.inner.network
    }

    /// Number of delayed reports still waiting
    pub fn pending_reports(&self) -> usize {
        self.inner.reports.pending()
    }

    /// Open the radio transport
    pub async fn connect_radio(&self) -> BridgeResult<()> {
        self.inner.set_phase(Phase::Connecting);
        self.inner.radio.connect().await?;
        tracing::info!("Radio connected");
        Ok(())
    }

    /// Load, announce, reconcile, then go live
    ///
    /// Radio callbacks arriving while this runs are buffered and handled
    /// once the bridge is live.
    pub async fn start(&self) -> BridgeResult<()> {
        let radio_events = self.inner.radio.subscribe();

        self.load().await;
        self.announce().await;
        self.reconcile().await?;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(events::run(inner, radio_events));
        if let Some(previous) = self.events.lock().replace(handle) {
            previous.abort();
        }
        self.inner.set_phase(Phase::Live);
        Ok(())
    }

    /// Stop handling radio callbacks and drop pending reports
    pub fn shutdown(&self) {
        if let Some(handle) = self.events.lock().take() {
            handle.abort();
        }
        self.inner.reports.cancel_all();
        self.inner.set_phase(Phase::Stopped);
    }

    /// Rebuild the tree from disk and merge the live radio devices into it
    pub(crate) async fn load(&self) {
        self.inner.set_phase(Phase::Loading);
        let inner = &self.inner;
        let ctx = inner.ctx();

        let mut network = inner.network.lock().await;
        *network = Network::load(
            &inner.store,
            &inner.config.network_id,
            &inner.config.network_name,
        );

        let mut live = Vec::new();
        for device in inner.radio.devices() {
            live.push(device.ieee().to_string());
            network.add_device(device, false, &ctx).await;
        }

        let orphans = network.remove_orphans(&live, &ctx);
        if !orphans.is_empty() {
            tracing::info!(count = orphans.len(), "Removed devices no longer on the radio");
        }
        network.ensure_gateway();
        tracing::info!(devices = network.devices().len(), "Network loaded");
    }

    /// Push the whole tree upstream, then persist it
    async fn announce(&self) {
        let network = self.inner.network.lock().await;
        self.inner.uplink.post("/network", network.data());
        if let Err(e) = network.save(&self.inner.store) {
            tracing::error!(error = %e, "Failed to save network");
        }
    }

    /// Delete devices the remote server knows but this tree does not
    async fn reconcile(&self) -> BridgeResult<()> {
        self.inner.set_phase(Phase::Reconciling);
        let url = {
            let network = self.inner.network.lock().await;
            network.path().collection_url(NodeKind::Device)
        };

        let reply = match self.inner.uplink.client().get(&url).await {
            Ok(reply) => reply,
            Err(RpcError::ConnectionClosed) => return Err(RpcError::ConnectionClosed.into()),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Could not fetch remote devices");
                return Ok(());
            }
        };

        let network = self.inner.network.lock().await;
        for id in remote_ids(&reply) {
            if network.device_by_id(&id).is_none() {
                let path = network.path().device(&id);
                tracing::info!(device = %id, "Deleting device unknown to this gateway");
                self.inner.uplink.delete(&path.url());
            }
        }
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(handle) = self.events.lock().take() {
            handle.abort();
        }
        self.inner.reports.cancel_all();
    }
}

/// Device ids from the remote listing; a single string is one id
fn remote_ids(reply: &JsonValue) -> Vec<String> {
    match reply {
        JsonValue::String(id) => vec![id.clone()],
        JsonValue::Array(ids) => ids
            .iter()
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect(),
        JsonValue::Null => Vec::new(),
        other => {
            tracing::warn!(reply = %other, "Unexpected device listing");
            Vec::new()
        }
    }
}
