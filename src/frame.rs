//! Wire-agnostic frame and payload types (§3 "StreamPart"/"OperationEvent"/
//! "SummaryEvent", §6 "Frame shapes").
//!
//! These types describe *what* goes on the wire; `sink::SinkWriter`
//! implementations decide *how* (native data-stream frames, the SSE
//! envelope, or in-memory capture for non-streaming callers).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The unit produced by the Artifact Parser (C3) and consumed by the
/// Incremental Stream Parser (C4) on its way to the Stream Helper (C5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamPart {
    /// A run of plain text.
    Text(String),
    /// A typed data payload: a structured component or an artifact.
    Data {
        kind: DataPartKind,
        id: String,
        payload: serde_json::Value,
    },
}

/// The two kinds of data payload a [`StreamPart`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPartKind {
    Component,
    Artifact,
}

/// Severity of an [`ErrorEvent`]/`error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Error,
    Warning,
    Info,
}

/// An error surfaced on the wire. Distinct from [`crate::error::StreamCoreError`],
/// which never itself crosses the wire — this is the user-facing shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    pub severity: ErrorSeverity,
    pub agent: Option<String>,
    pub code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: ErrorSeverity::Error,
            agent: None,
            code: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// Agent-lifecycle signalling sent on the wire (§3 "OperationEvent").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationEvent {
    AgentInitializing {
        session_id: String,
        graph_id: String,
    },
    Completion {
        agent: String,
        iteration: u32,
    },
    Error {
        message: String,
        agent: Option<String>,
        severity: ErrorSeverity,
        code: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Arbitrary pass-through data-operation, for agent-defined signals the
    /// core doesn't model directly. `operation_type` carries the
    /// caller-supplied `{type, details}` shape's `type` value; it is kept
    /// under its own key rather than `type` so it doesn't collide with the
    /// enum's own internal tag (which would already occupy `"type":
    /// "custom"` on the wire).
    Custom {
        operation_type: String,
        details: serde_json::Value,
    },
}

/// A progress/status update (§3 "SummaryEvent").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEvent {
    pub label: String,
    pub details: Option<serde_json::Value>,
}

impl SummaryEvent {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A single structured-component payload (§6 `data-component` frame).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentPayload {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(flatten)]
    pub props: serde_json::Map<String, serde_json::Value>,
}

/// The payload of a `data-artifact` frame (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPayload {
    pub artifact_id: String,
    pub task_id: String,
    pub name: String,
    pub description: String,
    pub parts: Vec<StreamPart>,
    pub metadata: serde_json::Value,
}

/// A single outbound wire frame. Field-exact per §6's frame table; a
/// [`crate::sink::SinkWriter`] implementation is responsible for encoding
/// these into whatever the transport actually carries (native JSON-lines,
/// an SSE envelope, or an in-memory `Vec<Frame>` for capture).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "kebab-case")]
pub enum Frame {
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    DataComponent {
        id: String,
        data: ComponentPayload,
    },
    DataArtifact {
        data: ArtifactPayload,
    },
    DataOperation {
        id: Option<String>,
        data: OperationEvent,
    },
    DataSummary {
        id: Option<String>,
        data: SummaryEvent,
    },
    Error {
        message: String,
        severity: ErrorSeverity,
        code: Option<String>,
        agent: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl From<&str> for ErrorEvent {
    fn from(message: &str) -> Self {
        ErrorEvent::new(message)
    }
}

impl From<String> for ErrorEvent {
    fn from(message: String) -> Self {
        ErrorEvent::new(message)
    }
}

impl From<ErrorEvent> for Frame {
    fn from(e: ErrorEvent) -> Self {
        Frame::Error {
            message: e.message,
            severity: e.severity,
            code: e.code,
            agent: e.agent,
            timestamp: e.timestamp,
        }
    }
}
