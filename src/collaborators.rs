//! External collaborator interfaces consumed by [`crate::session::GraphSession`].
//!
//! Per §1, the stream-core does not define agent prompts, perform tool I/O,
//! or own graph topology; the status-update generator (§4.5) still needs a
//! summariser model, a conversation-history source, and an artifact store.
//! Those are modeled as `async_trait` collaborator traits the same way
//! `langgraph_core::llm::ChatModel` lets `orchestrator`'s executor stay
//! provider-agnostic (`executor/llm_executor.rs` holds an `Arc<dyn
//! ChatModel>`, never a concrete client) — callers inject an implementation
//! at session construction instead of this crate depending on any one LLM
//! provider or storage backend.

use crate::error::Result;
use crate::event::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Tenant/project scope under which a session's conversation history is
/// looked up (§4.5: "a `(tenant, project, conversation)` triple").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub tenant: String,
    pub project: String,
}

impl Scope {
    pub fn new(tenant: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            project: project.into(),
        }
    }
}

/// One turn of prior conversation, as returned by a
/// [`ConversationHistoryProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// Fetches recent conversation history for a session's status-update
/// generator (§4.5 "Fetches recent conversation history via an external
/// collaborator interface"). Storage of conversations is explicitly out of
/// this crate's scope (§1) — this trait is the seam.
#[async_trait]
pub trait ConversationHistoryProvider: Send + Sync {
    async fn recent_history(
        &self,
        scope: &Scope,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>>;
}

/// A named structured schema steering one case of a status update (§3
/// `StatusUpdateConfig.status-components`). `label_property` names the
/// property within a generated case object that supplies `SummaryEvent.label`
/// (§4.5 structured mode: "`label` is taken from the component's `label`
/// property").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusComponentSchema {
    pub name: String,
    #[serde(default = "default_label_property")]
    pub label_property: String,
    pub schema: serde_json::Value,
}

fn default_label_property() -> String {
    "label".to_string()
}

impl StatusComponentSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            label_property: default_label_property(),
            schema,
        }
    }

    pub fn with_label_property(mut self, property: impl Into<String>) -> Self {
        self.label_property = property.into();
        self
    }
}

/// Reserved case name a structured status-update generation may return when
/// nothing worth reporting happened (§4.5).
pub const NO_RELEVANT_UPDATES: &str = "no_relevant_updates";

/// Everything the summariser model needs to produce one status update.
pub struct SummaryPrompt<'a> {
    pub activities: &'a [String],
    pub conversation_history: &'a [ConversationTurn],
    pub previous_summaries: &'a [String],
    pub prompt_addendum: Option<&'a str>,
}

/// The LLM collaborator behind the status-update generator and artifact
/// post-processing (§4.5, §4.3's artifact naming step). Modeled the way
/// `langgraph_core::llm::ChatModel` is: a minimal async trait a caller
/// implements for whichever provider they use, never a concrete client this
/// crate depends on.
#[async_trait]
pub trait SummariserModel: Send + Sync {
    /// Name reported in the tracing span attached to every call (§4.5:
    /// "`{session.id, events.count, elapsed.s, model}`").
    fn model_name(&self) -> &str;

    /// Unstructured mode: produce free text for a single `SummaryEvent.label`.
    async fn generate_summary(&self, prompt: SummaryPrompt<'_>) -> Result<String>;

    /// Structured mode: produce an object whose keys are exactly the
    /// configured component names plus the reserved
    /// [`NO_RELEVANT_UPDATES`] case. A non-reserved key maps to the case's
    /// generated fields (including the label property); an absent or
    /// explicitly-null key means that case produced nothing this cycle.
    async fn generate_structured_update(
        &self,
        prompt: SummaryPrompt<'_>,
        components: &[StatusComponentSchema],
    ) -> Result<serde_json::Map<String, serde_json::Value>>;

    /// Artifact post-processing (§4.5 `recordEvent`): generate a `(name,
    /// description)` pair for a just-saved artifact. Failures are handled by
    /// the caller falling back to a deterministic name/description (§7
    /// category 4) — this method is allowed to return `Err`.
    async fn generate_artifact_metadata(
        &self,
        artifact_id: &str,
        tool_name: Option<&str>,
        summary: &str,
    ) -> Result<(String, String)>;
}

/// Persists generated artifact metadata (§4.5 `recordEvent`: "generate
/// name+description ... then persist"). Persistent storage of artifacts is
/// out of this crate's scope (§1) — this trait is the seam.
#[async_trait]
pub trait ArtifactPersistence: Send + Sync {
    async fn persist_metadata(&self, artifact_id: &str, name: String, description: String) -> Result<()>;
}

/// Render the compact "user-visible activities" list the status-update
/// generator feeds to the summariser (§4.5), formatting each event and
/// dropping the ones `Event::format_activity` excludes.
pub fn format_activities(events: &[Event]) -> Vec<String> {
    events.iter().filter_map(Event::format_activity).collect()
}
