//! Outbound side: the client handle and the queue it feeds

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};

use crate::error::{RpcError, RpcResult};
use crate::frame::{Method, ReplyFrame, RequestFrame};

/// One entry of the outbound queue
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Request that expects a reply; blocks the queue while in flight
    Request {
        frame: RequestFrame,
        reply: oneshot::Sender<RpcResult<JsonValue>>,
    },
    /// Request sent without waiting
    Notify(RequestFrame),
    /// Reply to a request received from the peer
    Reply(ReplyFrame),
}

/// Receiving end of the outbound queue, consumed by a connection
pub struct OutboundQueue {
    pub(crate) rx: mpsc::UnboundedReceiver<Outbound>,
    pub(crate) tx: mpsc::UnboundedSender<Outbound>,
}

/// Cloneable handle for issuing requests to the peer
///
/// The handle can be created before the connection exists; frames queue
/// up until a connection drains them.
#[derive(Clone)]
pub struct RpcClient {
    tx: mpsc::UnboundedSender<Outbound>,
    next_id: Arc<AtomicU64>,
}

/// Create a client and the queue a connection will drain
pub fn outbound_queue() -> (RpcClient, OutboundQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let client = RpcClient {
        tx: tx.clone(),
        next_id: Arc::new(AtomicU64::new(1)),
    };
    (client, OutboundQueue { rx, tx })
}

impl RpcClient {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fetch a resource from the peer.
    ///
    /// The request is queued when this is called, so the order of calls
    /// is the order on the wire even if the futures are awaited later.
    pub fn get(&self, url: impl Into<String>) -> impl Future<Output = RpcResult<JsonValue>> {
        let frame = RequestFrame::new(self.next_id(), Method::Get, url, None);
        let (reply, rx) = oneshot::channel();
        let queued = self.tx.send(Outbound::Request { frame, reply });
        async move {
            queued.map_err(|_| RpcError::ConnectionClosed)?;
            rx.await.map_err(|_| RpcError::ConnectionClosed)?
        }
    }

    pub fn post(&self, url: impl Into<String>, data: JsonValue) {
        self.notify(Method::Post, url.into(), Some(data));
    }

    pub fn put(&self, url: impl Into<String>, data: JsonValue) {
        self.notify(Method::Put, url.into(), Some(data));
    }

    pub fn delete(&self, url: impl Into<String>) {
        self.notify(Method::Delete, url.into(), None);
    }

    fn notify(&self, method: Method, url: String, data: Option<JsonValue>) {
        let frame = RequestFrame::new(self.next_id(), method, url, data);
        if let Err(e) = self.tx.send(Outbound::Notify(frame)) {
            if let Outbound::Notify(frame) = e.0 {
                tracing::warn!(
                    method = %frame.method,
                    url = %frame.params.url,
                    "Dropping request, connection is closed"
                );
            }
        }
    }
}
