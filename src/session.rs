//! Graph Session (C6) — §4.5.
//!
//! Owns a request's append-only event log, runs the status-update
//! generator, and holds a back-reference to the request's [`StreamHelper`]
//! (§9 "Cyclic references between Session and Stream Helper": the Session
//! holds the Helper, the registry owns neither). Grounded on
//! `orchestrator::api::ws::pool::ConnectionPool`/`timeout::ClientTimeout`
//! for the atomics-and-`DashMap`-free single-owner bookkeeping style, with
//! the periodic timer modeled after the same crate's WebSocket heartbeat
//! loop.

use crate::collaborators::{
    format_activities, ArtifactPersistence, ConversationHistoryProvider, Scope, StatusComponentSchema,
    SummariserModel, SummaryPrompt, NO_RELEVANT_UPDATES,
};
use crate::config::StreamCoreConfig;
use crate::error::Result;
use crate::event::{Event, EventData};
use crate::frame::SummaryEvent;
use crate::stream_helper::StreamHelper;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::Instrument;

/// Per-session status-update configuration (§3 `StatusUpdateConfig`).
#[derive(Debug, Clone, Default)]
pub struct StatusUpdateConfig {
    pub enabled: bool,
    pub num_events: Option<usize>,
    pub time_in_seconds: Option<u64>,
    pub prompt: Option<String>,
    pub status_components: Option<Vec<StatusComponentSchema>>,
}

impl StatusUpdateConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether this configuration names structured cases (§4.5 "Structured"
    /// mode) rather than free text ("Unstructured" mode).
    pub fn is_structured(&self) -> bool {
        self.status_components
            .as_ref()
            .is_some_and(|components| !components.is_empty())
    }
}

/// The per-request context described in §3 "Session". Created before the
/// first agent step; `cleanup()` runs exactly once, at `complete()` or
/// forced cleanup.
pub struct GraphSession {
    session_id: String,
    graph_id: String,
    scope: Scope,
    conversation_id: String,

    events: Mutex<Vec<Event>>,
    status_config: Mutex<StatusUpdateConfig>,
    summary_ring: Mutex<VecDeque<String>>,

    ended: AtomicBool,
    generating_update: AtomicBool,
    last_event_count: AtomicUsize,
    last_update_time: Mutex<Option<Instant>>,

    started_at: chrono::DateTime<chrono::Utc>,
    config: StreamCoreConfig,

    stream_helper: Arc<StreamHelper>,
    summariser: Arc<dyn SummariserModel>,
    history: Arc<dyn ConversationHistoryProvider>,
    artifacts: Arc<dyn ArtifactPersistence>,

    periodic_timer: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    cleanup_notify: Arc<Notify>,
}

impl GraphSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        graph_id: impl Into<String>,
        scope: Scope,
        conversation_id: impl Into<String>,
        stream_helper: Arc<StreamHelper>,
        summariser: Arc<dyn SummariserModel>,
        history: Arc<dyn ConversationHistoryProvider>,
        artifacts: Arc<dyn ArtifactPersistence>,
        config: StreamCoreConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            graph_id: graph_id.into(),
            scope,
            conversation_id: conversation_id.into(),
            events: Mutex::new(Vec::new()),
            status_config: Mutex::new(StatusUpdateConfig::disabled()),
            summary_ring: Mutex::new(VecDeque::new()),
            ended: AtomicBool::new(false),
            generating_update: AtomicBool::new(false),
            last_event_count: AtomicUsize::new(0),
            last_update_time: Mutex::new(None),
            started_at: chrono::Utc::now(),
            config,
            stream_helper,
            summariser,
            history,
            artifacts,
            periodic_timer: parking_lot::Mutex::new(None),
            cleanup_notify: Arc::new(Notify::new()),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// A read-only snapshot of the event log, for diagnostics/tests.
    pub async fn events_snapshot(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Store the status-update configuration and arm the `time-in-seconds`
    /// periodic trigger if configured (§4.5 point 2). The `num-events`
    /// trigger needs no timer — it's evaluated inline by `record_event`.
    pub async fn initialize_status_updates(self: &Arc<Self>, config: StatusUpdateConfig) {
        let time_trigger = config.time_in_seconds;
        *self.status_config.lock().await = config;

        if let Some(seconds) = time_trigger {
            self.arm_periodic_timer(Duration::from_secs(seconds));
        }
    }

    fn arm_periodic_timer(self: &Arc<Self>, period: Duration) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                if session.is_ended() {
                    break;
                }
                session.maybe_trigger_status_update(TriggerReason::Time).await;
            }
        });
        *self.periodic_timer.lock() = Some(handle);
    }

    /// Append an event to the log (§4.5 point 3) and evaluate status-update
    /// triggers. A no-op once the session has ended (§3 invariant).
    pub async fn record_event(self: &Arc<Self>, agent_id: impl Into<String>, data: EventData) {
        if self.is_ended() {
            return;
        }

        let pending_artifact = match &data {
            EventData::ArtifactSaved {
                artifact_id,
                tool_name,
                summary,
                pending_generation: true,
                ..
            } => Some((artifact_id.clone(), tool_name.clone(), summary.clone())),
            _ => None,
        };

        let event = Event::new(agent_id, data);
        {
            let mut events = self.events.lock().await;
            events.push(event);
        }

        if let Some((artifact_id, tool_name, summary)) = pending_artifact {
            self.spawn_artifact_post_processing(artifact_id, tool_name, summary);
        }

        self.maybe_trigger_status_update(TriggerReason::EventCount).await;
    }

    /// Fire-and-forget post-processing for a just-saved artifact (§4.5 point
    /// 3, §7 category 4): generate a name/description via the summariser,
    /// falling back to a deterministic pair derived from the artifact id and
    /// tool name on failure. Never propagates errors to the caller.
    fn spawn_artifact_post_processing(
        self: &Arc<Self>,
        artifact_id: String,
        tool_name: Option<String>,
        summary: String,
    ) {
        let summariser = Arc::clone(&self.summariser);
        let artifacts = Arc::clone(&self.artifacts);
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            let generated = summariser
                .generate_artifact_metadata(&artifact_id, tool_name.as_deref(), &summary)
                .await;

            let (name, description) = match generated {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(
                        session.id = %session_id,
                        artifact.id = %artifact_id,
                        error = %e,
                        "artifact metadata generation failed, using fallback"
                    );
                    fallback_artifact_metadata(&artifact_id, tool_name.as_deref())
                }
            };

            if let Err(e) = artifacts.persist_metadata(&artifact_id, name, description).await {
                tracing::warn!(
                    session.id = %session_id,
                    artifact.id = %artifact_id,
                    error = %e,
                    "failed to persist artifact metadata"
                );
            }
        });
    }

    /// Evaluate the trigger named by `reason` and, if it fires, spawn the
    /// generator as its own task (§9 "a cancellable task bound to the
    /// Session's lifetime, not as an event-loop callback").
    async fn maybe_trigger_status_update(self: &Arc<Self>, reason: TriggerReason) {
        if self.is_ended() {
            return;
        }
        if self.stream_helper.is_text_streaming().await {
            return;
        }
        if self.generating_update.load(Ordering::SeqCst) {
            return;
        }

        let config = self.status_config.lock().await.clone();
        if !config.enabled {
            return;
        }

        let should_fire = match reason {
            TriggerReason::EventCount => {
                let Some(num_events) = config.num_events else {
                    return;
                };
                let total = self.events.lock().await.len();
                let last = self.last_event_count.load(Ordering::SeqCst);
                total.saturating_sub(last) >= num_events
            }
            TriggerReason::Time => config.time_in_seconds.is_some(),
        };

        if !should_fire {
            return;
        }

        if self
            .generating_update
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.run_status_update(config).await;
            session.generating_update.store(false, Ordering::SeqCst);
        });
    }

    /// The status-update generator body (§4.5). Races the summariser call
    /// against `cleanup_notify` so a Session `cleanup()` can terminate an
    /// in-flight LLM call (§9 Design Notes).
    async fn run_status_update(self: &Arc<Self>, config: StatusUpdateConfig) {
        if self.stream_helper.is_text_streaming().await || self.is_ended() {
            return;
        }

        let new_events = {
            let events = self.events.lock().await;
            let last = self.last_event_count.load(Ordering::SeqCst);
            events[last.min(events.len())..].to_vec()
        };
        let activities = format_activities(&new_events);

        let history = match self
            .history
            .recent_history(&self.scope, &self.conversation_id, 20)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(session.id = %self.session_id, error = %e, "conversation history fetch failed");
                Vec::new()
            }
        };

        let previous_summaries: Vec<String> = self.summary_ring.lock().await.iter().cloned().collect();
        let prompt = SummaryPrompt {
            activities: &activities,
            conversation_history: &history,
            previous_summaries: &previous_summaries,
            prompt_addendum: config.prompt.as_deref(),
        };

        let span = tracing::info_span!(
            "status_update_generation",
            session.id = %self.session_id,
            events.count = new_events.len(),
            model = self.summariser.model_name(),
        );
        let started = Instant::now();

        let is_structured = config.is_structured();
        let components = config.status_components.clone().unwrap_or_default();
        let summaries = async {
            if is_structured {
                self.run_structured_update(prompt, &components).await
            } else {
                self.run_unstructured_update(prompt).await
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| {
            tracing::info!(elapsed.s = started.elapsed().as_secs_f64(), "status update generation finished");
        });

        if summaries.is_empty() || self.is_ended() {
            return;
        }

        for summary in &summaries {
            if let Err(e) = self.stream_helper.write_summary(summary.clone()).await {
                tracing::warn!(session.id = %self.session_id, error = %e, "failed to write status summary");
            }
        }

        let mut ring = self.summary_ring.lock().await;
        for summary in &summaries {
            let serialized = serde_json::to_string(summary).unwrap_or_default();
            if ring.len() >= self.config.summary_ring_capacity {
                ring.pop_front();
            }
            ring.push_back(serialized);
        }
        drop(ring);

        self.last_event_count.store(
            self.events.lock().await.len(),
            Ordering::SeqCst,
        );
        *self.last_update_time.lock().await = Some(Instant::now());
    }

    async fn run_unstructured_update(self: &Arc<Self>, prompt: SummaryPrompt<'_>) -> Vec<SummaryEvent> {
        let call = self.summariser.generate_summary(prompt);
        tokio::select! {
            result = call => match result {
                Ok(text) if !text.trim().is_empty() => vec![SummaryEvent::new(text)],
                Ok(_) => Vec::new(),
                Err(e) => {
                    tracing::warn!(session.id = %self.session_id, error = %e, "unstructured status update failed");
                    Vec::new()
                }
            },
            _ = self.cleanup_notify.notified() => {
                tracing::warn!(session.id = %self.session_id, "status update cancelled by session cleanup");
                Vec::new()
            }
        }
    }

    async fn run_structured_update(
        self: &Arc<Self>,
        prompt: SummaryPrompt<'_>,
        components: &[StatusComponentSchema],
    ) -> Vec<SummaryEvent> {
        let call = self.summariser.generate_structured_update(prompt, components);
        let generated = tokio::select! {
            result = call => match result {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(session.id = %self.session_id, error = %e, "structured status update failed");
                    return Vec::new();
                }
            },
            _ = self.cleanup_notify.notified() => {
                tracing::warn!(session.id = %self.session_id, "status update cancelled by session cleanup");
                return Vec::new();
            }
        };

        if generated
            .get(NO_RELEVANT_UPDATES)
            .is_some_and(|v| v.as_bool().unwrap_or(true))
        {
            return Vec::new();
        }

        let mut out = Vec::new();
        for component in components {
            let Some(value) = generated.get(&component.name) else {
                continue;
            };
            let Some(case) = value.as_object() else {
                continue;
            };
            if case.is_empty() {
                continue;
            }
            let label = case
                .get(&component.label_property)
                .and_then(|v| v.as_str())
                .unwrap_or(&component.name)
                .to_string();
            let mut details = case.clone();
            details.remove(&component.label_property);
            out.push(SummaryEvent::new(label).with_details(serde_json::Value::Object(details)));
        }
        out
    }

    /// Idempotent. Sets `ended`, cancels the periodic timer, wakes any
    /// in-flight generator, and drops the previous-summary ring (§4.5
    /// "Cleanup").
    pub async fn cleanup(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.periodic_timer.lock().take() {
            handle.abort();
        }
        self.cleanup_notify.notify_waiters();
        self.summary_ring.lock().await.clear();
    }
}

#[derive(Debug, Clone, Copy)]
enum TriggerReason {
    EventCount,
    Time,
}

/// Deterministic fallback name/description for an artifact whose LLM-backed
/// metadata generation failed (§7 category 4).
fn fallback_artifact_metadata(artifact_id: &str, tool_name: Option<&str>) -> (String, String) {
    match tool_name {
        Some(tool) => (
            format!("{tool} output"),
            format!("Artifact {artifact_id} produced by {tool}."),
        ),
        None => (
            format!("Artifact {artifact_id}"),
            format!("Artifact {artifact_id}."),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ConversationTurn;
    use crate::sink::CapturingSink;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    struct StubSummariser {
        calls: StdAtomicUsize,
    }

    #[async_trait]
    impl SummariserModel for StubSummariser {
        fn model_name(&self) -> &str {
            "stub-model"
        }

        async fn generate_summary(&self, prompt: SummaryPrompt<'_>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("did {} things", prompt.activities.len()))
        }

        async fn generate_structured_update(
            &self,
            _prompt: SummaryPrompt<'_>,
            _components: &[StatusComponentSchema],
        ) -> Result<serde_json::Map<String, serde_json::Value>> {
            Ok(serde_json::Map::new())
        }

        async fn generate_artifact_metadata(
            &self,
            _artifact_id: &str,
            _tool_name: Option<&str>,
            _summary: &str,
        ) -> Result<(String, String)> {
            Ok(("generated name".into(), "generated description".into()))
        }
    }

    struct StubHistory;

    #[async_trait]
    impl ConversationHistoryProvider for StubHistory {
        async fn recent_history(
            &self,
            _scope: &Scope,
            _conversation_id: &str,
            _limit: usize,
        ) -> Result<Vec<ConversationTurn>> {
            Ok(Vec::new())
        }
    }

    struct StubArtifacts {
        persisted: tokio::sync::Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ArtifactPersistence for StubArtifacts {
        async fn persist_metadata(&self, artifact_id: &str, name: String, description: String) -> Result<()> {
            self.persisted
                .lock()
                .await
                .push((artifact_id.to_string(), name, description));
            Ok(())
        }
    }

    fn test_session() -> (Arc<GraphSession>, Arc<CapturingSink>, Arc<StubArtifacts>) {
        let sink = Arc::new(CapturingSink::new());
        let config = StreamCoreConfig::default();
        let helper = StreamHelper::new(sink.clone(), &config);
        let artifacts = Arc::new(StubArtifacts {
            persisted: tokio::sync::Mutex::new(Vec::new()),
        });
        let session = GraphSession::new(
            "sess-1",
            "graph-1",
            Scope::new("tenant", "project"),
            "conv-1",
            helper,
            Arc::new(StubSummariser {
                calls: StdAtomicUsize::new(0),
            }),
            Arc::new(StubHistory),
            artifacts.clone(),
            config,
        );
        (session, sink, artifacts)
    }

    #[tokio::test]
    async fn record_event_appends_to_log() {
        let (session, _sink, _artifacts) = test_session();
        session
            .record_event(
                "agent-1",
                EventData::Transfer {
                    from_agent: "a".into(),
                    to_agent: "b".into(),
                },
            )
            .await;
        assert_eq!(session.events_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_and_stops_recording() {
        let (session, _sink, _artifacts) = test_session();
        session.cleanup().await;
        session.cleanup().await;
        assert!(session.is_ended());

        session
            .record_event(
                "agent-1",
                EventData::Transfer {
                    from_agent: "a".into(),
                    to_agent: "b".into(),
                },
            )
            .await;
        assert_eq!(session.events_snapshot().await.len(), 0);
    }

    #[tokio::test]
    async fn event_count_trigger_fires_status_update() {
        let (session, sink, _artifacts) = test_session();
        session
            .initialize_status_updates(StatusUpdateConfig {
                enabled: true,
                num_events: Some(1),
                time_in_seconds: None,
                prompt: None,
                status_components: None,
            })
            .await;

        session
            .record_event(
                "agent-1",
                EventData::Transfer {
                    from_agent: "a".into(),
                    to_agent: "b".into(),
                },
            )
            .await;

        // The generator runs on its own spawned task; give it a chance to run.
        for _ in 0..50 {
            if !sink.frames().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let frames = sink.frames();
        assert!(!frames.is_empty());
        assert!(matches!(frames[0], crate::frame::Frame::DataSummary { .. }));
    }

    #[tokio::test]
    async fn artifact_post_processing_persists_fallback_on_failure() {
        let (artifact_id, fallback) = (
            "a1".to_string(),
            fallback_artifact_metadata("a1", Some("search")),
        );
        assert_eq!(fallback.0, "search output");
        assert!(fallback.1.contains(&artifact_id));
    }

    #[tokio::test]
    async fn pending_artifact_spawns_metadata_persistence() {
        let (session, _sink, artifacts) = test_session();
        session
            .record_event(
                "agent-1",
                EventData::ArtifactSaved {
                    artifact_id: "a1".into(),
                    artifact_type: "code".into(),
                    tool_name: Some("search".into()),
                    summary: "results".into(),
                    pending_generation: true,
                },
            )
            .await;

        for _ in 0..50 {
            if !artifacts.persisted.lock().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let persisted = artifacts.persisted.lock().await;
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].1, "generated name");
    }
}
