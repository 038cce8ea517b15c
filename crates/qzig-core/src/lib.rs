//! qzig-core - Device tree and value registry for the qzig mesh bridge
//!
//! This crate holds everything the bridge knows about the mesh network
//! independently of how it talks to the remote server:
//!
//! ```text
//! Network ── Device ── Value ── State (Report / Control)
//!    │          │        │
//!    │          │        └── ValueKind (registry: cluster id -> kinds)
//!    │          └── LiveDevice (radio collaborator)
//!    └── Store (one directory per node, <kind>/<id>/<kind>.json)
//! ```
//!
//! The tree never performs network I/O on its own. Operations that need
//! to reach the remote peer take an [`Uplink`], and the radio is reached
//! through the traits in [`radio`].

pub mod error;
pub mod models;
pub mod radio;
pub mod registry;
pub mod routing;
pub mod store;
pub mod testing;
pub mod uplink;
pub mod values;

pub use error::{ModelError, ModelResult, StoreError, StoreResult};
pub use models::*;
pub use radio::{
    AttrValue, Cluster, ClusterCommand, ClusterResponse, CommandReply, Endpoint, LiveDevice,
    RadioController, RadioError, RadioEvent, RadioResult, ReadAttributes, WriteStatus,
};
pub use registry::ValueRegistry;
pub use routing::{parse_resource_url, NodePath};
pub use store::Store;
pub use uplink::{SyncContext, Uplink};
pub use values::{ControlResult, ControlTarget, Effect, ValueKind, ValueSpec};
