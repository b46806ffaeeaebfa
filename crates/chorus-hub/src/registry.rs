//! # Speaker Registry
//!
//! Durable table of known speakers. Owns snapshot persistence and the
//! inactivity eviction sweep.
//!
//! ## Registry Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Speaker Registry                                 │
//! │                                                                         │
//! │  register ──► overwrite entry, fresh session id ──► save ──► emit      │
//! │              "connected"                                                │
//! │                                                                         │
//! │  touch ────► last_seen = now (silent no-op for unknown ids, which      │
//! │              race with eviction)                                        │
//! │                                                                         │
//! │  sweep ────► every entry idle > 3600s removed via the remove path,     │
//! │              batch logged once, evicted speakers returned so the       │
//! │              caller can emit per-speaker "disconnected" events          │
//! │                                                                         │
//! │  save ─────► full table + updated_at + instance id, best-effort:       │
//! │              failures are logged, memory stays authoritative            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use chorus_core::events::EVENT_CONNECTED;
use chorus_core::{session_id, Speaker, SpeakerStats};

use crate::ports::{EventBus, RegistryStore};

/// Idle seconds after which the sweep evicts a speaker.
pub const INACTIVITY_TIMEOUT_SECS: i64 = 3600;

// =============================================================================
// Snapshot
// =============================================================================

/// Persisted registry state.
///
/// Speaker records are stored as raw JSON values so a single malformed
/// record can be skipped on load without losing the rest of the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub speakers: Vec<serde_json::Value>,
    /// Epoch seconds of the last save.
    pub updated_at: i64,
    /// Identity of the owning hub instance.
    pub instance_id: String,
}

// =============================================================================
// Registration Input
// =============================================================================

/// Registration data for one speaker, as received from the wire.
#[derive(Debug, Clone)]
pub struct NewSpeaker {
    pub speaker_id: String,
    pub name: String,
    pub speaker_type: String,
    pub firmware_version: String,
    pub capabilities: Vec<String>,
    pub address: String,
    pub settings: HashMap<String, String>,
}

// =============================================================================
// Speaker Registry
// =============================================================================

/// Durable speaker table. Clones share the inner state.
#[derive(Clone)]
pub struct SpeakerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// All known speakers, indexed by speaker_id.
    speakers: RwLock<HashMap<String, Speaker>>,
    /// Snapshot storage.
    store: Arc<dyn RegistryStore>,
    /// Host event bus.
    bus: Arc<dyn EventBus>,
    /// Identity written into every snapshot.
    instance_id: String,
    /// Soft capacity; exceeding it logs a warning, registration never rejects.
    max_speakers: usize,
    /// Millisecond component of the last issued session id. Forced strictly
    /// increasing so same-instant reconnects still get distinct session ids.
    last_session_ms: AtomicI64,
    /// Set by `touch`; flushed by `checkpoint`.
    dirty: AtomicBool,
}

impl SpeakerRegistry {
    pub fn new(
        instance_id: impl Into<String>,
        max_speakers: usize,
        store: Arc<dyn RegistryStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        SpeakerRegistry {
            inner: Arc::new(RegistryInner {
                speakers: RwLock::new(HashMap::new()),
                store,
                bus,
                instance_id: instance_id.into(),
                max_speakers,
                last_session_ms: AtomicI64::new(0),
                dirty: AtomicBool::new(false),
            }),
        }
    }

    /// Loads the persisted snapshot, skipping malformed records one by one
    /// rather than failing the whole load.
    pub async fn load(&self) {
        let snapshot = match self.inner.store.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No registry snapshot to load");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load registry snapshot");
                return;
            }
        };

        let mut speakers = self.inner.speakers.write().await;
        let mut skipped = 0usize;

        for raw in snapshot.speakers {
            match serde_json::from_value::<Speaker>(raw) {
                Ok(speaker) => {
                    speakers.insert(speaker.speaker_id.clone(), speaker);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(error = %e, "Skipping malformed speaker record");
                }
            }
        }

        info!(
            loaded = speakers.len(),
            skipped, "Loaded speakers from snapshot"
        );
    }

    /// Registers a speaker, overwriting any prior entry for the same id,
    /// and returns the fresh session id. Never rejects.
    pub async fn register(&self, new: NewSpeaker) -> String {
        let ts_ms = self.next_session_ms(Utc::now().timestamp_millis());
        let now_secs = ts_ms / 1000;
        let session = session_id(&new.speaker_id, ts_ms);

        let speaker = Speaker {
            speaker_id: new.speaker_id.clone(),
            name: new.name.clone(),
            speaker_type: new.speaker_type.clone(),
            firmware_version: new.firmware_version.clone(),
            capabilities: new.capabilities.clone(),
            session_id: session.clone(),
            address: new.address.clone(),
            connected_at: now_secs,
            last_seen: now_secs,
            settings: new.settings,
        };

        let total = {
            let mut speakers = self.inner.speakers.write().await;
            speakers.insert(new.speaker_id.clone(), speaker);
            speakers.len()
        };

        info!(
            speaker_id = %new.speaker_id,
            name = %new.name,
            address = %new.address,
            "Speaker registered"
        );

        if total > self.inner.max_speakers {
            // Soft limit: observed, not enforced.
            warn!(
                total,
                max_speakers = self.inner.max_speakers,
                "Registered speakers exceed the configured limit"
            );
        }

        self.inner.bus.emit(
            EVENT_CONNECTED,
            serde_json::json!({
                "speaker_id": new.speaker_id,
                "speaker_name": new.name,
                "speaker_type": new.speaker_type,
                "firmware_version": new.firmware_version,
                "capabilities": new.capabilities,
                "session_id": session,
                "address": new.address,
                "timestamp": ts_ms,
            }),
        );

        self.save().await;
        session
    }

    /// Refreshes `last_seen` for a known speaker. Unknown ids are silently
    /// ignored: activity signals race with eviction.
    pub async fn touch(&self, speaker_id: &str) {
        let mut speakers = self.inner.speakers.write().await;
        if let Some(speaker) = speakers.get_mut(speaker_id) {
            speaker.last_seen = speaker.last_seen.max(Utc::now().timestamp());
            self.inner.dirty.store(true, Ordering::Relaxed);
        }
    }

    pub async fn get(&self, speaker_id: &str) -> Option<Speaker> {
        self.inner.speakers.read().await.get(speaker_id).cloned()
    }

    pub async fn list(&self) -> Vec<Speaker> {
        self.inner.speakers.read().await.values().cloned().collect()
    }

    /// Speakers seen within the last `max_idle_secs`.
    pub async fn active(&self, max_idle_secs: i64) -> Vec<Speaker> {
        let now = Utc::now().timestamp();
        self.inner
            .speakers
            .read()
            .await
            .values()
            .filter(|s| s.is_active(now, max_idle_secs))
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.speakers.read().await.len()
    }

    /// Removes a speaker and persists. Emits no notification; evicting
    /// callers emit their own "disconnected".
    pub async fn remove(&self, speaker_id: &str) -> Option<Speaker> {
        let removed = self.inner.speakers.write().await.remove(speaker_id);
        if let Some(ref speaker) = removed {
            info!(speaker_id = %speaker.speaker_id, name = %speaker.name, "Speaker removed");
            self.save().await;
        }
        removed
    }

    /// Removes all speakers and persists the empty table.
    pub async fn clear(&self) {
        self.inner.speakers.write().await.clear();
        self.save().await;
        info!("All speakers cleared");
    }

    /// Aggregate statistics over the current table.
    pub async fn stats(&self) -> SpeakerStats {
        let now = Utc::now().timestamp();
        let speakers = self.inner.speakers.read().await;
        SpeakerStats::compute(speakers.values(), now)
    }

    /// Evicts every speaker idle beyond [`INACTIVITY_TIMEOUT_SECS`] and
    /// returns the evicted records. The batch is logged as one event and
    /// the table is persisted once.
    pub async fn sweep_inactive(&self) -> Vec<Speaker> {
        let now = Utc::now().timestamp();
        let evicted: Vec<Speaker> = {
            let mut speakers = self.inner.speakers.write().await;
            let stale: Vec<String> = speakers
                .values()
                .filter(|s| s.idle_secs(now) > INACTIVITY_TIMEOUT_SECS)
                .map(|s| s.speaker_id.clone())
                .collect();

            stale
                .iter()
                .filter_map(|id| speakers.remove(id))
                .collect()
        };

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted inactive speakers");
            self.save().await;
        }

        evicted
    }

    /// Flushes activity updates accumulated since the last save.
    pub async fn checkpoint(&self) {
        if self.inner.dirty.swap(false, Ordering::Relaxed) {
            self.save().await;
        }
    }

    /// Serializes and saves the full table. Best-effort: failures are
    /// logged and the in-memory table stays authoritative.
    pub async fn save(&self) {
        let snapshot = {
            let speakers = self.inner.speakers.read().await;
            let records = speakers
                .values()
                .filter_map(|s| match serde_json::to_value(s) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(speaker_id = %s.speaker_id, error = %e, "Failed to serialize speaker");
                        None
                    }
                })
                .collect();

            RegistrySnapshot {
                speakers: records,
                updated_at: Utc::now().timestamp(),
                instance_id: self.inner.instance_id.clone(),
            }
        };

        self.inner.dirty.store(false, Ordering::Relaxed);

        if let Err(e) = self.inner.store.save(&snapshot).await {
            warn!(error = %e, "Failed to save registry snapshot");
        }
    }

    /// Next session-id timestamp: wall clock, forced strictly increasing.
    fn next_session_ms(&self, now_ms: i64) -> i64 {
        let mut current = self.inner.last_session_ms.load(Ordering::Relaxed);
        loop {
            let next = now_ms.max(current + 1);
            match self.inner.last_session_ms.compare_exchange(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
