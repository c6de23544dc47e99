//! Stream-core for acolib's agent-orchestration runtime.
//!
//! This crate is the per-request streaming pipeline between LLM token/object
//! deltas produced by agent execution and the external wire protocol
//! consumed by a UI client. It multiplexes four event kinds (text,
//! structured data components, artifacts, operations/summaries) onto a
//! single ordered output channel, incrementally parses partial JSON
//! arriving token-by-token, runs a concurrent status-summarisation loop,
//! and enforces memory bounds, cancellation, and forced cleanup for
//! long-lived connections.
//!
//! HTTP routing, API-key validation, persistent storage, the LLM providers
//! themselves, the graph editor/UI, JSON-Schema conversion, and graph
//! topology are all out of scope — this crate consumes an abstract delta
//! source and exposes an abstract sink writer (see [`collaborators`] for
//! the handful of collaborator seams the status-update generator needs).
//!
//! Components (leaves first): [`json_partial`] (C2, partial-JSON parsing),
//! [`artifact`] (C3, marker/object parsing into [`frame::StreamPart`]s),
//! [`incremental`] (C4, drives C2+C3 from a delta source), [`sink`] (C1,
//! wire encoding), [`stream_helper`] (C5, ordered back-pressured writer),
//! [`session`] (C6, event log + status updates), [`registry`] (C7,
//! process-wide session lookup), [`cleanup`] (C8, signal handling and
//! forced shutdown).

pub mod artifact;
pub mod cleanup;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod incremental;
pub mod json_partial;
pub mod registry;
pub mod session;
pub mod sink;
pub mod stream_helper;

pub use config::{init_tracing, StreamCoreConfig};
pub use error::{Result, StreamCoreError};
pub use event::{Event, EventData, GenerationKind};
pub use frame::{
    ArtifactPayload, ComponentPayload, DataPartKind, ErrorEvent, ErrorSeverity, Frame, OperationEvent,
    StreamPart, SummaryEvent,
};
pub use registry::StreamRegistry;
pub use session::{GraphSession, StatusUpdateConfig};
pub use sink::{CapturingSink, NativeFrameSink, SharedSink, SinkWriter};
pub use stream_helper::StreamHelper;
