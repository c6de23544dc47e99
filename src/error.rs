//! Crate-wide error type and result alias.
//!
//! Mirrors the `OrchestratorError`/`ApiError` split used elsewhere in acolib:
//! one `thiserror`-derived enum with a variant per recoverable-vs-fatal
//! failure class from the stream-core's error taxonomy. Most variants never
//! cross the crate boundary as a user-facing `error` frame — see
//! `frame::ErrorSeverity` and `stream_helper::StreamHelper::write_error` for
//! the handful that do.

use thiserror::Error;

/// Errors produced by the stream-core.
#[derive(Debug, Error)]
pub enum StreamCoreError {
    /// Category 1: the sink/transport rejected a write. Not recoverable at
    /// this layer — the caller is expected to log and cancel the request.
    #[error("transport write failed: {0}")]
    TransportWrite(String),

    /// A delta or accumulator value could not be serialized/deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stream registry was asked to operate on a session id that isn't
    /// registered (or is no longer registered).
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// A status-update configuration was invalid (e.g. an unnamed
    /// status-component schema).
    #[error("invalid status-update configuration: {0}")]
    InvalidStatusConfig(String),

    /// Generic operational failure, used for conditions that don't warrant
    /// their own variant but still need a typed `Result`.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamCoreError>;
