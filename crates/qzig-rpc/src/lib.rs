//! qzig-rpc - JSON-RPC multiplexer over one ordered byte stream
//!
//! Both directions share one connection. Frames are single-line JSON
//! objects terminated by `\n`.
//!
//! ```text
//!   RpcClient ──► outbound queue ──► sender task ──► stream
//!                      ▲                 │ waits for the reply of
//!                      │ replies         │ the one pending request
//!                      │                 ▼
//!   RequestHandler ◄── worker ◄── inbound queue ◄── reader task ◄── stream
//! ```
//!
//! The sender drains the queue strictly in order. A request that expects
//! a reply (`GET`) blocks the queue until its reply arrives or the request
//! timeout expires, so at most one request is ever in flight.
//! Notifications (`PUT`/`POST`/`DELETE`) and replies never block.

mod client;
mod connection;
pub mod error;
pub mod frame;
mod handler;

pub use client::{outbound_queue, OutboundQueue, RpcClient};
pub use connection::{ConnectionOptions, ConnectionState, RpcConnection};
pub use error::{RpcError, RpcResult};
pub use frame::{Method, RequestParams};
pub use handler::{HandlerResult, RequestHandler};
