//! The device tree: Network -> Device -> Value -> State

mod device;
mod gateway;
mod network;
mod node;
mod state;
mod value;

pub use device::*;
pub use gateway::*;
pub use network::*;
pub use node::*;
pub use state::*;
pub use value::*;
