//! Delayed reports
//!
//! A control may ask for its REPORT state to be updated later (a permit
//! join window closing, for instance). Each value has at most one timer;
//! scheduling a new one replaces the old. Timers hold only a weak
//! reference to the bridge, so a dropped bridge never reports.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use qzig_core::{Effect, Network};
use tokio::task::JoinHandle;

use crate::bridge::Inner;

#[derive(Default)]
pub(crate) struct ReportTimers {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ReportTimers {
    pub(crate) fn insert(&self, value_id: String, handle: JoinHandle<()>) {
        let mut timers = self.timers.lock();
        timers.retain(|_, h| !h.is_finished());
        if let Some(previous) = timers.insert(value_id, handle) {
            previous.abort();
        }
    }

    pub(crate) fn cancel(&self, value_id: &str) {
        if let Some(handle) = self.timers.lock().remove(value_id) {
            handle.abort();
        }
    }

    pub(crate) fn cancel_all(&self) {
        for (_, handle) in self.timers.lock().drain() {
            handle.abort();
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.timers
            .lock()
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }
}

impl Drop for ReportTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Carry out the effects of a successful control on `value_id`
///
/// Immediate reports are applied to `network` right away; later ones get
/// a timer.
pub(crate) fn apply_effects(
    inner: &Arc<Inner>,
    network: &mut Network,
    value_id: &str,
    effects: Vec<Effect>,
) {
    for effect in effects {
        match effect {
            Effect::Report {
                delay,
                attribute,
                value,
            } if delay.is_zero() => {
                network.report(value_id, attribute, &value, &inner.ctx());
            }
            Effect::Report {
                delay,
                attribute,
                value,
            } => {
                tracing::debug!(value = %value_id, ?delay, "Scheduling report");
                let weak = Arc::downgrade(inner);
                let id = value_id.to_string();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let mut network = inner.network.lock().await;
                    network.report(&id, attribute, &value, &inner.ctx());
                });
                inner.reports.insert(value_id.to_string(), handle);
            }
            Effect::ArmInstallCode(code) => {
                tracing::info!(bytes = code.len(), "Install code armed for the next join");
                *inner.install_code.lock() = Some(code);
            }
        }
    }
}
