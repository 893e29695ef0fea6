// src/error.rs
//
// Error taxonomy for the bridge. None of these is fatal: the worker logs them
// and falls back to a safe state, retrying on the next tick.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Discovery found no serial devices.
    #[error("no serial devices available")]
    DeviceUnavailable,

    /// Port enumeration itself failed.
    #[error("failed to enumerate ports: {0}")]
    Enumerate(String),

    /// Device busy, permission denied or gone.
    #[error("failed to open {path}: {reason}")]
    OpenFailure { path: String, reason: String },

    /// I/O error in the middle of a read.
    #[error("read error: {0}")]
    TransientRead(#[from] std::io::Error),

    /// A delimited frame with fewer than five fields.
    #[error("malformed frame: expected 5 fields, got {fields}")]
    MalformedFrame { fields: usize },

    /// A client selected a port the registry does not know about.
    #[error("unknown port '{0}'")]
    InvalidSelection(String),

    #[error("settings: {0}")]
    Settings(String),

    /// The acquisition thread could not be spawned.
    #[error("failed to start serial worker: {0}")]
    Worker(#[source] std::io::Error),
}

