//! Sink Writer (C1) — §4.1 is silent on this component by name but §6
//! specifies its contract: "A single method `write(frame)` plus an
//! optional `merge(stream)`".
//!
//! Three implementations cover the writer shapes named in Design Note §9:
//! a native frame sink for data-stream clients, an SSE envelope sink
//! (feature-gated, bit-exact per §6), and an in-memory capturing sink for
//! non-streaming MCP-style callers.

use crate::error::{Result, StreamCoreError};
use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::Arc;

/// The transport-facing object every outbound frame eventually passes
/// through. Implementations MUST serialise writes (§5 "single-writer
/// discipline") — `StreamHelper` guarantees it only ever calls `write`
/// from behind its own internal mutex, so a `SinkWriter` impl does not need
/// to re-guard against concurrent callers itself.
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Encode and push one frame to the transport.
    async fn write(&self, frame: Frame) -> Result<()>;

    /// Emit the optional lead frame carrying the assistant's role. Wire
    /// format-dependent (§4.4): most sinks no-op.
    async fn write_role(&self, _role: Option<&str>) -> Result<()> {
        Ok(())
    }

    /// Called once, after the final drain, when `StreamHelper::complete()`
    /// runs. SSE sinks use this to emit `finish_reason: "stop"` followed by
    /// the literal `data: [DONE]`; other sinks no-op.
    async fn finish(&self) -> Result<()> {
        Ok(())
    }

    /// Merge another writer's buffered output into this one. Optional;
    /// only meaningful for capturing-style sinks that might need to be
    /// composed. Default is a no-op.
    async fn merge(&self, _other: &dyn SinkWriter) -> Result<()> {
        Ok(())
    }
}

/// A sink that forwards frames over an unbounded channel to whatever native
/// transport consumes the session's data-stream frames. Used by clients
/// that speak the crate's own wire-agnostic [`Frame`] shapes directly.
pub struct NativeFrameSink {
    sender: tokio::sync::mpsc::UnboundedSender<Frame>,
}

impl NativeFrameSink {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<Frame>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl SinkWriter for NativeFrameSink {
    async fn write(&self, frame: Frame) -> Result<()> {
        self.sender
            .send(frame)
            .map_err(|_| StreamCoreError::TransportWrite("native frame channel closed".into()))
    }
}

/// An in-memory sink that simply records every frame it receives, in
/// order. Used for non-streaming MCP-style callers (Design Note §9) that
/// want the final reconstructed response rather than incremental frames.
#[derive(Default)]
pub struct CapturingSink {
    frames: parking_lot::Mutex<Vec<Frame>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything captured so far, in write order.
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// Reconstruct the plain-text transcript by concatenating every
    /// `text-delta` payload captured so far, in order.
    pub fn collected_text(&self) -> String {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                Frame::TextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SinkWriter for CapturingSink {
    async fn write(&self, frame: Frame) -> Result<()> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

/// Wraps another sink behind an `Arc` so it can be shared between a
/// `StreamHelper` and whatever test harness or driver also wants to inspect
/// it (e.g. a `CapturingSink` held by both).
pub type SharedSink = Arc<dyn SinkWriter>;

#[cfg(feature = "axum-sse")]
pub mod sse {
    //! Bit-exact SSE envelope encoding per §6 "Alternative wire (SSE,
    //! bit-exact)". Feature-gated on `axum-sse` since it borrows
    //! `axum::response::sse::Event` purely as a transport value type — HTTP
    //! routing itself stays out of this crate's scope.

    use super::*;
    use crate::frame::Frame;
    use axum::response::sse::Event;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// SSE sink: encodes every [`Frame`] as one `chat.completion.chunk`
    /// envelope and forwards it over an unbounded channel to the HTTP
    /// response stream.
    pub struct SseFrameSink {
        sender: tokio::sync::mpsc::UnboundedSender<Event>,
        chunk_id: String,
        created: i64,
        sequence: AtomicI64,
    }

    impl SseFrameSink {
        pub fn new(sender: tokio::sync::mpsc::UnboundedSender<Event>, chunk_id: impl Into<String>) -> Self {
            Self {
                sender,
                chunk_id: chunk_id.into(),
                created: chrono::Utc::now().timestamp(),
                sequence: AtomicI64::new(0),
            }
        }

        fn envelope(&self, delta_content: serde_json::Value, finish_reason: Option<&str>) -> serde_json::Value {
            json!({
                "id": self.chunk_id,
                "object": "chat.completion.chunk",
                "created": self.created,
                "choices": [{
                    "index": 0,
                    "delta": { "content": delta_content },
                    "finish_reason": finish_reason,
                }],
            })
        }

        fn send(&self, value: serde_json::Value) -> Result<()> {
            self.sequence.fetch_add(1, Ordering::Relaxed);
            let event = Event::default().data(value.to_string());
            self.sender
                .send(event)
                .map_err(|_| StreamCoreError::TransportWrite("SSE channel closed".into()))
        }
    }

    #[async_trait]
    impl SinkWriter for SseFrameSink {
        async fn write(&self, frame: Frame) -> Result<()> {
            match frame {
                Frame::TextDelta { delta, .. } => {
                    self.send(self.envelope(json!(delta), None))
                }
                Frame::TextStart { .. } | Frame::TextEnd { .. } => Ok(()),
                other => {
                    let (type_tag, data) = classify(&other);
                    let stringified = json!({ "type": type_tag, "data": data }).to_string();
                    self.send(self.envelope(json!(stringified), None))
                }
            }
        }

        async fn finish(&self) -> Result<()> {
            self.send(self.envelope(json!(null), Some("stop")))?;
            self.sender
                .send(Event::default().data("[DONE]"))
                .map_err(|_| StreamCoreError::TransportWrite("SSE channel closed".into()))
        }
    }

    fn classify(frame: &Frame) -> (&'static str, serde_json::Value) {
        match frame {
            Frame::DataComponent { id, data } => (
                "data-component",
                json!({"id": id, "data": data}),
            ),
            Frame::DataArtifact { data } => ("data-artifact", json!({"data": data})),
            Frame::DataOperation { id, data } => (
                "data-operation",
                json!({"id": id, "data": data}),
            ),
            Frame::DataSummary { id, data } => (
                "data-summary",
                json!({"id": id, "data": data}),
            ),
            Frame::Error { .. } => ("error", serde_json::to_value(frame).unwrap_or(json!(null))),
            Frame::TextStart { .. } | Frame::TextDelta { .. } | Frame::TextEnd { .. } => {
                ("text", json!(null))
            }
        }
    }
}
