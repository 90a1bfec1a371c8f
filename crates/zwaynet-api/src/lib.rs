//! Raw HTTP client for a Z-Way gateway's pseudo-REST interface.
//!
//! The gateway exposes two GET-only endpoints: a data endpoint that
//! returns JSON snapshots of the Z-Wave network state (full or partial,
//! depending on the `since` timestamp appended to the path), and a run
//! endpoint that executes command expressions such as
//! `devices[12].instances[0].commandClasses[38].Set(255)`.
//!
//! This crate is transport only: one request per call, no retry, no
//! caching, no interpretation of the returned JSON. `zwaynet-core`
//! owns the model tree and the polling logic.

pub mod client;
pub mod error;
pub mod transport;

pub use client::GatewayClient;
pub use error::Error;
pub use transport::{BasicCredentials, TransportConfig};
