//! Connection tasks
//!
//! A connection owns three tasks: the sender draining the outbound queue,
//! the reader splitting the stream into frames, and the worker running
//! inbound requests one at a time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};

use crate::client::{Outbound, OutboundQueue};
use crate::error::{RpcError, RpcResult};
use crate::frame::{
    decode_line, encode_line, Inbound, Method, ReplyFrame, RequestParams, MAX_FRAME_BYTES,
};
use crate::handler::{dispatch, RequestHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// How long a request may hold the queue waiting for its reply.
    /// `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// The request currently awaiting its reply
struct InFlight {
    id: u64,
    reply: oneshot::Sender<RpcResult<JsonValue>>,
    done: oneshot::Sender<()>,
}

struct Shared {
    in_flight: Mutex<Option<InFlight>>,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn take_in_flight(&self, id: u64) -> Option<InFlight> {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().map(|pending| pending.id) == Some(id) {
            slot.take()
        } else {
            None
        }
    }

    fn resolve(&self, reply: ReplyFrame) {
        if let Some(error) = &reply.error {
            tracing::error!(code = error.code, message = %error.message, "Peer returned an error");
        }
        let in_flight = reply.id.as_u64().and_then(|id| self.take_in_flight(id));
        match in_flight {
            Some(pending) => {
                let _ = pending.reply.send(reply.into_result());
                let _ = pending.done.send(());
            }
            None => tracing::debug!(id = %reply.id, "Dropping reply without a matching request"),
        }
    }

    fn close(&self) {
        self.state.send_replace(ConnectionState::Closed);
        if let Some(pending) = self.in_flight.lock().take() {
            let _ = pending.reply.send(Err(RpcError::ConnectionClosed));
        }
    }
}

/// A running connection to the peer
pub struct RpcConnection {
    shared: Arc<Shared>,
    state: watch::Receiver<ConnectionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    current_request: Arc<Mutex<Option<AbortHandle>>>,
}

impl RpcConnection {
    /// Connect over TCP and start serving
    pub async fn connect(
        addr: &str,
        queue: OutboundQueue,
        handler: Arc<dyn RequestHandler>,
        options: ConnectionOptions,
    ) -> RpcResult<Self> {
        tracing::info!(addr, "Connecting to peer");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RpcError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not disable Nagle");
        }
        Ok(Self::open(stream, queue, handler, options))
    }

    /// Start serving over an already connected stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<S>(
        stream: S,
        queue: OutboundQueue,
        handler: Arc<dyn RequestHandler>,
        options: ConnectionOptions,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            in_flight: Mutex::new(None),
            state: state_tx,
        });
        let current_request = Arc::new(Mutex::new(None));

        let (reader, writer) = tokio::io::split(stream);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let OutboundQueue { rx, tx } = queue;

        let tasks = vec![
            tokio::spawn(send_loop(
                writer,
                rx,
                Arc::clone(&shared),
                options.request_timeout,
            )),
            tokio::spawn(read_loop(reader, inbound_tx, Arc::clone(&shared))),
            tokio::spawn(request_loop(
                inbound_rx,
                handler,
                tx,
                Arc::clone(&current_request),
            )),
        ];

        shared.state.send_replace(ConnectionState::Open);
        tracing::debug!("Connection open");

        Self {
            shared,
            state: state_rx,
            tasks: Mutex::new(tasks),
            current_request,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves once the connection is closed by either side
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Stop all tasks. No handler runs after this returns.
    pub fn close(&self) {
        self.abort_all();
        self.shared.close();
        tracing::info!("Connection closed");
    }

    fn abort_all(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(request) = self.current_request.lock().take() {
            request.abort();
        }
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.abort_all();
    }
}

async fn write_frame<W, T>(writer: &mut W, frame: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let line = encode_line(frame)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    tracing::trace!(frame = %line.trim_end(), "send");
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn send_loop<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
    request_timeout: Option<Duration>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = queue.recv().await {
        let written = match item {
            Outbound::Notify(frame) => write_frame(&mut writer, &frame).await,
            Outbound::Reply(frame) => write_frame(&mut writer, &frame).await,
            Outbound::Request { frame, reply } => {
                let id = frame.id;
                let (done, finished) = oneshot::channel();
                *shared.in_flight.lock() = Some(InFlight { id, reply, done });

                let written = write_frame(&mut writer, &frame).await;
                if written.is_ok() {
                    match request_timeout {
                        Some(limit) => {
                            if tokio::time::timeout(limit, finished).await.is_err() {
                                if let Some(pending) = shared.take_in_flight(id) {
                                    tracing::warn!(id, url = %frame.params.url, "Request timed out");
                                    let _ = pending.reply.send(Err(RpcError::Timeout(limit)));
                                }
                            }
                        }
                        None => {
                            let _ = finished.await;
                        }
                    }
                }
                written
            }
        };

        if let Err(e) = written {
            tracing::error!(error = %e, "Write failed");
            break;
        }
    }
    shared.close();
}

/// What the reader found on the stream
enum Line {
    Frame,
    TooLong,
    Eof,
}

/// Read one newline-terminated line into `buf`
///
/// Lines over [`MAX_FRAME_BYTES`] are drained up to their newline and
/// reported as [`Line::TooLong`].
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_FRAME_BYTES as u64 + 1;
    buf.clear();
    if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
        return Ok(Line::Eof);
    }
    if buf.ends_with(b"\n") || buf.len() <= MAX_FRAME_BYTES {
        return Ok(Line::Frame);
    }

    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if n == 0 || buf.ends_with(b"\n") {
            break;
        }
    }
    buf.clear();
    Ok(Line::TooLong)
}

async fn read_loop<R>(reader: R, inbound: mpsc::UnboundedSender<JsonValue>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        match next_line(&mut reader, &mut buf).await {
            Ok(Line::Frame) => {
                if buf.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                tracing::trace!(frame = %String::from_utf8_lossy(&buf).trim_end(), "recv");
                match decode_line(&buf) {
                    Ok(Inbound::Request(request)) => {
                        if inbound.send(request).is_err() {
                            break;
                        }
                    }
                    Ok(Inbound::Reply(reply)) => shared.resolve(reply),
                    Err(e) => tracing::warn!(error = %e, "Ignoring undecodable frame"),
                }
            }
            Ok(Line::TooLong) => {
                tracing::warn!(limit = MAX_FRAME_BYTES, "Ignoring oversized frame");
            }
            Ok(Line::Eof) => {
                tracing::info!("Connection closed by peer");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Read failed");
                break;
            }
        }
    }
    shared.close();
}

async fn request_loop(
    mut inbound: mpsc::UnboundedReceiver<JsonValue>,
    handler: Arc<dyn RequestHandler>,
    replies: mpsc::UnboundedSender<Outbound>,
    current_request: Arc<Mutex<Option<AbortHandle>>>,
) {
    while let Some(request) = inbound.recv().await {
        let reply = handle_request(request, &handler, &current_request).await;
        if replies.send(Outbound::Reply(reply)).is_err() {
            break;
        }
    }
}

async fn handle_request(
    request: JsonValue,
    handler: &Arc<dyn RequestHandler>,
    current_request: &Mutex<Option<AbortHandle>>,
) -> ReplyFrame {
    let id = request.get("id").cloned().unwrap_or(JsonValue::Null);

    let method = match request.get("method").and_then(JsonValue::as_str) {
        Some(name) => name.parse::<Method>(),
        None => Err(RpcError::InvalidFrame("method is not a string".to_string())),
    };
    let method = match method {
        Ok(method) => method,
        Err(e) => return reject(id, e.to_string()),
    };
    let params = request.get("params").cloned().unwrap_or(JsonValue::Null);
    let params: RequestParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => return reject(id, format!("Invalid params: {}", e)),
    };

    tracing::debug!(%method, url = %params.url, "Handling request");

    // Run on its own task so a panicking handler still gets a reply
    let handler = Arc::clone(handler);
    let task = tokio::spawn(async move { dispatch(handler.as_ref(), method, params).await });
    *current_request.lock() = Some(task.abort_handle());
    let outcome = task
        .await
        .unwrap_or_else(|e| Err(format!("Request handler failed: {}", e)));
    current_request.lock().take();

    match outcome {
        Ok(()) => ReplyFrame::result(id, JsonValue::Bool(true)),
        Err(message) => reject(id, message),
    }
}

fn reject(id: JsonValue, message: String) -> ReplyFrame {
    tracing::error!(%message, "Request failed");
    ReplyFrame::error(id, message)
}
