//! Network-integration layer between logical device drivers and Z-Wave
//! mesh networks exposed through Z-Way gateways.
//!
//! This crate reconciles an eventually-consistent remote JSON tree with
//! local driver state:
//!
//! - **[`NetworkHandler`]** — per-gateway façade. Owns the connection,
//!   the node registry and the polling loop; detects topology changes
//!   (new / vanished nodes) and dispatches discovery events off the hot
//!   path through a single-consumer worker.
//!
//! - **[`ConnectionManager`]** — cached model tree plus the `lastUpdate`
//!   watermark. Fetches full or partial snapshots from the gateway and
//!   merges partial documents in place; a failed fetch leaves the tree
//!   at last-known-good.
//!
//! - **[`NodeRegistry`]** — bidirectional binding between physical
//!   nodes ([`NodeInfo`]) and logical drivers ([`NodeDriver`]). Both
//!   directions mutate under one critical section.
//!
//! - **[`HandlerDirectory`]** — lazily-created table of handlers, one
//!   per gateway endpoint. Gateways operate independently; there is no
//!   cross-gateway coordination.
//!
//! Per-device-category state machines are external collaborators: they
//! implement [`NodeDriver`] and consume the tree fragments routed to
//! them each polling cycle.

pub mod config;
pub mod connection;
pub mod directory;
pub mod driver;
pub mod error;
pub mod handler;
pub mod merge;
pub mod model;
pub mod registry;
pub mod poller;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::HandlerConfig;
pub use connection::ConnectionManager;
pub use directory::HandlerDirectory;
pub use driver::{DiscoveryListener, NodeDriver};
pub use error::CoreError;
pub use handler::{DiscoveryEvent, NetworkHandler};
pub use registry::NodeRegistry;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ClassData, CommandClass, Controller, ControllerData, DataElem, Device, Instance, ModelTree,
    NodeId, NodeIdentity, NodeInfo,
};
