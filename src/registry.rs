//! Stream Registry (C7) — §4.6.
//!
//! A process-wide `session-id → StreamHelper` map. Grounded on
//! `orchestrator::api::ws::pool::ConnectionPool`: a `DashMap`-backed
//! registry needing no locks beyond what the concurrent map already
//! provides, safe under concurrent lookup from a status-update task and
//! concurrent unregister from the request handler (§9 "Global mutable
//! state").

use crate::stream_helper::{HasSessionId, StreamHelper};
use dashmap::DashMap;
use std::sync::Arc;

/// The only shared mutable state in the stream-core (§5, §9). Owns neither
/// the `Session` nor the `StreamHelper` it indexes — both are owned by the
/// request task; the registry is purely a lookup table keyed by session id.
pub struct StreamRegistry {
    sessions: DashMap<String, Arc<StreamHelper>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register `helper` under `session_id`, informing it of its own id via
    /// the `HasSessionId` capability (§9 "Dynamic dispatch over writer
    /// shapes": "an optional capability check (polymorphic over
    /// `{setSessionId}`)").
    pub fn register(&self, session_id: impl Into<String>, helper: Arc<StreamHelper>) -> Arc<StreamHelper> {
        let session_id = session_id.into();
        helper.set_session_id(session_id.clone());
        self.sessions.insert(session_id, helper.clone());
        helper
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<StreamHelper>> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn unregister(&self, session_id: &str) -> Option<Arc<StreamHelper>> {
        self.sessions.remove(session_id).map(|(_, helper)| helper)
    }

    /// Number of currently-registered sessions, for diagnostics.
    pub fn size(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
