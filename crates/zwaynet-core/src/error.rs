// ── Core error types ──
//
// Consumers of this crate never see raw reqwest failures; the api
// crate's error is wrapped. Topology inconsistencies (bound node absent
// from the tree, tree node absent from the registry) are deliberately
// NOT errors — they are discovery signals.

use thiserror::Error;

use crate::merge::MergeError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Network or HTTP failure talking to the gateway. The cycle
    /// continues; the model tree stays at last-known-good.
    #[error("Gateway transport error: {0}")]
    Transport(#[from] zwaynet_api::Error),

    /// The fetched document could not be merged or re-typed. The whole
    /// fetch is discarded and retried next cycle.
    #[error("Model merge failed: {0}")]
    Merge(#[from] MergeError),

    /// The merged tree no longer deserializes into the typed model.
    #[error("Model tree deserialization failed: {0}")]
    Model(#[from] serde_json::Error),

    /// Invalid configuration. Raised synchronously to the caller
    /// supplying configuration; required fields are never silently
    /// defaulted.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No model tree has been fetched yet.
    #[error("Model tree not yet available")]
    TreeUnavailable,
}

impl CoreError {
    /// Returns `true` if this failure should freeze the tree at
    /// last-known-good and retry on a later cycle.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Merge(_) | Self::Model(_))
    }
}
