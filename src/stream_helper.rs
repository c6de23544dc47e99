//! Stream Helper (C5) — §4.4.
//!
//! Owns the text/operation/summary gating state machine and the single
//! writer discipline over a shared [`SinkWriter`]. One instance per live
//! request; registered with the [`crate::registry::StreamRegistry`] by
//! session id.

use crate::config::StreamCoreConfig;
use crate::error::Result;
use crate::frame::{ErrorEvent, Frame, OperationEvent, SummaryEvent};
use crate::sink::SharedSink;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Capability check used by [`crate::registry::StreamRegistry::register`]
/// (§9 "Dynamic dispatch over writer shapes"): a writer shape may optionally
/// be told its own session id once it's registered.
pub trait HasSessionId: Send + Sync {
    fn set_session_id(&self, session_id: String);
}

#[derive(Debug, Clone)]
enum QueuedEvent {
    Operation(OperationEvent),
    Summary(SummaryEvent),
}

struct GateState {
    text_streaming: bool,
    last_text_end_at: Option<Instant>,
    queue: VecDeque<QueuedEvent>,
}

impl GateState {
    fn new() -> Self {
        Self {
            text_streaming: false,
            last_text_end_at: None,
            queue: VecDeque::new(),
        }
    }

    fn past_gap(&self, now: Instant, gap_threshold: std::time::Duration) -> bool {
        match self.last_text_end_at {
            Some(last) => now.saturating_duration_since(last) >= gap_threshold,
            None => true,
        }
    }
}

pub struct StreamHelper {
    sink: Mutex<SharedSink>,
    gate: Mutex<GateState>,
    completed: AtomicBool,
    session_id: parking_lot::Mutex<Option<String>>,
    gap_threshold: std::time::Duration,
    lifetime_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StreamHelper {
    pub fn new(sink: SharedSink, config: &StreamCoreConfig) -> Arc<Self> {
        let helper = Arc::new(Self {
            sink: Mutex::new(sink),
            gate: Mutex::new(GateState::new()),
            completed: AtomicBool::new(false),
            session_id: parking_lot::Mutex::new(None),
            gap_threshold: config.gap_threshold,
            lifetime_handle: parking_lot::Mutex::new(None),
        });
        helper.clone().arm_lifetime_timer(config.max_stream_lifetime);
        helper
    }

    fn arm_lifetime_timer(self: Arc<Self>, lifetime: std::time::Duration) {
        let weak: Weak<Self> = Arc::downgrade(&self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(lifetime).await;
            if let Some(helper) = weak.upgrade() {
                helper.force_cleanup().await;
            }
        });
        *self.lifetime_handle.lock() = Some(handle);
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Warn-and-noop guard used by every public write method once
    /// `complete()` has run (§4.4 "Post-completion policy").
    fn guard(&self, operation: &str) -> bool {
        if self.is_completed() {
            tracing::warn!(operation, "write after stream completion ignored");
            true
        } else {
            false
        }
    }

    pub async fn write_role(&self, role: Option<&str>) -> Result<()> {
        if self.guard("write_role") {
            return Ok(());
        }
        self.sink.lock().await.write_role(role).await
    }

    /// Emit `text-start`, one `text-delta`, `text-end`, optionally pausing
    /// `delay_ms` before the delta. Drains the gated queue first if the gap
    /// since the last text sequence has cleared the threshold (§4.4 rule 1).
    pub async fn write_text(&self, text: impl Into<String>, delay_ms: u64) -> Result<()> {
        if self.guard("write_text") {
            return Ok(());
        }
        let text = text.into();
        let id = format!("msg-{}", Uuid::new_v4());

        {
            let mut gate = self.gate.lock().await;
            let now = Instant::now();
            if gate.past_gap(now, self.gap_threshold) {
                self.drain_locked(&mut gate).await?;
            }
            gate.text_streaming = true;
        }

        let sink = self.sink.lock().await;
        sink.write(Frame::TextStart { id: id.clone() }).await?;
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        sink.write(Frame::TextDelta {
            id: id.clone(),
            delta: text,
        })
        .await?;
        sink.write(Frame::TextEnd { id }).await?;
        drop(sink);

        let mut gate = self.gate.lock().await;
        gate.text_streaming = false;
        gate.last_text_end_at = Some(Instant::now());
        Ok(())
    }

    /// Emit a `data-operation` frame, subject to gating (§4.4 rule 3).
    pub async fn write_operation(&self, op: OperationEvent) -> Result<()> {
        if self.guard("write_operation") {
            return Ok(());
        }
        let mut gate = self.gate.lock().await;
        let now = Instant::now();
        if gate.text_streaming || !gate.past_gap(now, self.gap_threshold) {
            gate.queue.push_back(QueuedEvent::Operation(op));
            return Ok(());
        }
        self.drain_locked(&mut gate).await?;
        drop(gate);
        self.sink
            .lock()
            .await
            .write(Frame::DataOperation {
                id: Some(Uuid::new_v4().to_string()),
                data: op,
            })
            .await
    }

    /// Emit a `data-summary` frame, subject to the same gating as
    /// `write_operation` (§4.4 rule 3).
    pub async fn write_summary(&self, summary: SummaryEvent) -> Result<()> {
        if self.guard("write_summary") {
            return Ok(());
        }
        let mut gate = self.gate.lock().await;
        let now = Instant::now();
        if gate.text_streaming || !gate.past_gap(now, self.gap_threshold) {
            gate.queue.push_back(QueuedEvent::Summary(summary));
            return Ok(());
        }
        self.drain_locked(&mut gate).await?;
        drop(gate);
        self.sink
            .lock()
            .await
            .write(Frame::DataSummary {
                id: Some(Uuid::new_v4().to_string()),
                data: summary,
            })
            .await
    }

    /// Whether a text sequence is currently mid-flight. Consulted by
    /// [`crate::session::GraphSession`]'s status-update generator before it
    /// starts (§4.5 "must consult `isTextStreaming` at start and abort if
    /// true") — this is a best-effort peek, not a lock held across the
    /// generation; the gating in this module is what actually protects the
    /// wire if the two race.
    pub async fn is_text_streaming(&self) -> bool {
        self.gate.lock().await.text_streaming
    }

    /// Emit a `data-component` frame. Unlike operations/summaries, data
    /// parts are never gated — they're not named in §4.4's gating rules.
    pub async fn write_component(&self, id: impl Into<String>, data: crate::frame::ComponentPayload) -> Result<()> {
        if self.guard("write_component") {
            return Ok(());
        }
        self.sink
            .lock()
            .await
            .write(Frame::DataComponent { id: id.into(), data })
            .await
    }

    /// Emit a `data-artifact` frame. Per §4.4 rule 4: if `textStreaming` is
    /// true or within the gap, the artifact still emits immediately, but
    /// this does NOT alter `lastTextEndAt` or drain the queue.
    pub async fn write_artifact(&self, data: crate::frame::ArtifactPayload) -> Result<()> {
        if self.guard("write_artifact") {
            return Ok(());
        }
        self.sink.lock().await.write(Frame::DataArtifact { data }).await
    }

    /// Emit an `error` frame. Does not terminate the stream.
    pub async fn write_error(&self, err: impl Into<ErrorEvent>) -> Result<()> {
        if self.guard("write_error") {
            return Ok(());
        }
        self.sink.lock().await.write(err.into().into()).await
    }

    /// Flush the gated queue, mark terminal, run cleanup. Idempotent: a
    /// second call is a no-op.
    pub async fn complete(&self) -> Result<()> {
        if self.completed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut gate = self.gate.lock().await;
            self.drain_locked(&mut gate).await?;
        }
        self.sink.lock().await.finish().await?;
        if let Some(handle) = self.lifetime_handle.lock().take() {
            handle.abort();
        }
        Ok(())
    }

    /// Invoked by the lifetime timer if `complete()` is never called.
    /// Writes a terminal error frame (best-effort) before forcing cleanup.
    async fn force_cleanup(&self) {
        if self.is_completed() {
            return;
        }
        let _ = self
            .write_error(ErrorEvent::new("Stream terminated: Connection lifetime exceeded"))
            .await;
        let _ = self.complete().await;
    }

    async fn drain_locked(&self, gate: &mut GateState) -> Result<()> {
        if gate.queue.is_empty() {
            return Ok(());
        }
        let sink = self.sink.lock().await;
        while let Some(event) = gate.queue.pop_front() {
            match event {
                QueuedEvent::Operation(op) => {
                    sink.write(Frame::DataOperation {
                        id: Some(Uuid::new_v4().to_string()),
                        data: op,
                    })
                    .await?;
                }
                QueuedEvent::Summary(sum) => {
                    sink.write(Frame::DataSummary {
                        id: Some(Uuid::new_v4().to_string()),
                        data: sum,
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }
}

impl HasSessionId for StreamHelper {
    fn set_session_id(&self, session_id: String) {
        *self.session_id.lock() = Some(session_id);
    }
}
