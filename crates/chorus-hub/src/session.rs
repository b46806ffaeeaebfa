//! # Session Tracker
//!
//! Ephemeral per-connection bookkeeping, distinct from the durable registry.
//! One record per live registration; rebuilt from scratch every process run
//! and discarded immediately on disconnect or eviction. This is cache, not
//! source of truth.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

// =============================================================================
// Session Record
// =============================================================================

/// Transport-level view of one registered connection.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Stable speaker identity.
    pub speaker_id: String,
    /// Transport peer address.
    pub address: String,
    /// Capability tags from registration.
    pub capabilities: Vec<String>,
    /// Epoch seconds when this session registered.
    pub connected_at: i64,
    /// Epoch seconds of the last protocol interaction on this session.
    pub last_activity: i64,
}

impl SessionRecord {
    pub fn new(speaker_id: impl Into<String>, address: impl Into<String>, capabilities: Vec<String>) -> Self {
        let now = Utc::now().timestamp();
        SessionRecord {
            speaker_id: speaker_id.into(),
            address: address.into(),
            capabilities,
            connected_at: now,
            last_activity: now,
        }
    }

    /// Seconds of inactivity relative to `now`.
    pub fn idle_secs(&self, now: i64) -> i64 {
        now - self.last_activity
    }
}

// =============================================================================
// Session Tracker
// =============================================================================

/// In-memory map of live sessions. Clones share the inner state.
#[derive(Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) the session record for a speaker.
    pub async fn insert(&self, record: SessionRecord) {
        let speaker_id = record.speaker_id.clone();
        self.sessions.write().await.insert(speaker_id.clone(), record);
        debug!(%speaker_id, "Session tracked");
    }

    /// Refreshes activity on a session. Unknown ids are silently ignored.
    pub async fn touch(&self, speaker_id: &str) {
        if let Some(record) = self.sessions.write().await.get_mut(speaker_id) {
            record.last_activity = record.last_activity.max(Utc::now().timestamp());
        }
    }

    pub async fn get(&self, speaker_id: &str) -> Option<SessionRecord> {
        self.sessions.read().await.get(speaker_id).cloned()
    }

    /// Whether the speaker currently has a live session.
    pub async fn contains(&self, speaker_id: &str) -> bool {
        self.sessions.read().await.contains_key(speaker_id)
    }

    pub async fn remove(&self, speaker_id: &str) -> Option<SessionRecord> {
        let removed = self.sessions.write().await.remove(speaker_id);
        if removed.is_some() {
            debug!(%speaker_id, "Session discarded");
        }
        removed
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
