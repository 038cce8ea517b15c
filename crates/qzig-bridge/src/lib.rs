//! qzig-bridge - keeps the device tree, the radio and the remote server in sync
//!
//! [`Bridge`] walks through the startup phases
//!
//! ```text
//! Init -> Connecting -> Loading -> Reconciling -> Live
//! ```
//!
//! and then serves inbound RPC requests (through the handler returned by
//! [`Bridge::handler`]) and radio callbacks side by side. Both paths share
//! the network tree behind one async mutex, which is never held across a
//! radio command issued on behalf of a PUT.

mod bridge;
mod config;
pub mod error;
mod events;
mod handler;
mod reports;
mod uplink;

pub use bridge::{Bridge, Phase};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use uplink::RpcUplink;
