//! Session event log types (§3 "Event").
//!
//! Modeled as a real tagged enum rather than a loosely-typed map, following
//! `RealtimeEvent` in `api/ws/events.rs`: one variant per `kind`, carrying
//! exactly the fields that kind needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an `agent_generate` event represents user-visible generation or
/// internal bookkeeping work (e.g. generating an artifact's name and
/// description). Internal generations are excluded from status-update
/// activity formatting per §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationKind {
    /// Output the end user will see.
    UserFacing,
    /// Bookkeeping generation (e.g. artifact name/description) that should
    /// not show up in status-update activity summaries.
    Internal,
}

/// The tagged payload carried by an [`Event`]. One variant per `kind` named
/// in §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum EventData {
    /// An agent produced output.
    #[serde(rename = "agent_generate")]
    AgentGenerate {
        agent_id: String,
        generation_kind: GenerationKind,
    },

    /// Control was handed off between agents.
    #[serde(rename = "transfer")]
    Transfer { from_agent: String, to_agent: String },

    /// A delegation was dispatched to a sub-agent.
    #[serde(rename = "delegation_sent")]
    DelegationSent {
        delegation_id: String,
        to_agent: String,
    },

    /// A previously-sent delegation returned a result.
    #[serde(rename = "delegation_returned")]
    DelegationReturned {
        delegation_id: String,
        result: String,
    },

    /// An artifact was saved, possibly still awaiting name/description
    /// generation.
    #[serde(rename = "artifact_saved")]
    ArtifactSaved {
        artifact_id: String,
        artifact_type: String,
        tool_name: Option<String>,
        summary: String,
        pending_generation: bool,
    },

    /// A tool finished executing.
    #[serde(rename = "tool_execution")]
    ToolExecution {
        tool_name: String,
        args: serde_json::Value,
        result: String,
    },
}

impl EventData {
    /// The short discriminant string used in tracing fields and activity
    /// formatting.
    pub fn kind_name(&self) -> &'static str {
        match self {
            EventData::AgentGenerate { .. } => "agent_generate",
            EventData::Transfer { .. } => "transfer",
            EventData::DelegationSent { .. } => "delegation_sent",
            EventData::DelegationReturned { .. } => "delegation_returned",
            EventData::ArtifactSaved { .. } => "artifact_saved",
            EventData::ToolExecution { .. } => "tool_execution",
        }
    }
}

/// An immutable entry in a [`crate::session::GraphSession`]'s event log.
///
/// Events are append-only; once pushed onto a session's log, an `Event`'s
/// index never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub data: EventData,
}

impl Event {
    pub fn new(agent_id: impl Into<String>, data: EventData) -> Self {
        Self {
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            data,
        }
    }

    /// Render a compact, human-readable activity line for this event, used
    /// by the status-update generator (§4.5) to build the "user-visible
    /// activities" passed to the summariser model.
    ///
    /// Returns `None` for events that should be excluded — currently only
    /// internal-purpose `agent_generate` events (name/description
    /// bookkeeping).
    pub fn format_activity(&self) -> Option<String> {
        match &self.data {
            EventData::AgentGenerate {
                generation_kind: GenerationKind::Internal,
                ..
            } => None,
            EventData::AgentGenerate { agent_id, .. } => {
                Some(format!("{agent_id} generated a response"))
            }
            EventData::Transfer { from_agent, to_agent } => {
                Some(format!("transferred from {from_agent} to {to_agent}"))
            }
            EventData::DelegationSent {
                delegation_id,
                to_agent,
            } => Some(format!("delegated {delegation_id} to {to_agent}")),
            EventData::DelegationReturned {
                delegation_id,
                result,
            } => Some(format!(
                "delegation {delegation_id} returned: {}",
                truncate(result, 160)
            )),
            EventData::ArtifactSaved {
                artifact_id,
                artifact_type,
                summary,
                ..
            } => Some(format!(
                "saved {artifact_type} artifact {artifact_id}: {summary}"
            )),
            EventData::ToolExecution {
                tool_name,
                args,
                result,
            } => Some(format!(
                "ran tool {tool_name}({args}) -> {}",
                truncate(result, 160)
            )),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &s[..cut])
    }
}
