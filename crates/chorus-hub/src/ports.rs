//! # Outbound Ports
//!
//! Narrow interfaces the hub depends on but never implements itself: the
//! host event bus, the entity/state host, and the snapshot store. The core
//! stays host-agnostic; a real automation platform supplies adapters, the
//! binary and the tests use the in-process implementations below.
//!
//! ## Port Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Outbound Ports                                 │
//! │                                                                         │
//! │  EventBus        emit(name, payload)      fire-and-forget, sync        │
//! │  StateHost       entities, service calls, state-change subscription    │
//! │  RegistryStore   save/load of the speaker snapshot                     │
//! │                                                                         │
//! │  In-process implementations:                                           │
//! │  • NoOpEventBus / TracingEventBus / RecordingEventBus                  │
//! │  • InMemoryStateHost (entity table + broadcast channel)                │
//! │  • MemoryStore / JsonFileStore                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use chorus_core::EntityState;

use crate::error::{HubError, HubResult};
use crate::registry::RegistrySnapshot;

/// Capacity of the state-change broadcast channel.
const STATE_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Event Bus
// =============================================================================

/// Fire-and-forget event sink. The hub emits bare event-name suffixes
/// ("connected", "tts_response", ...); implementations apply any configured
/// prefix before handing the event to the host.
pub trait EventBus: Send + Sync {
    fn emit(&self, event: &str, payload: serde_json::Value);
}

/// Discards every event. Default for tests.
pub struct NoOpEventBus;

impl EventBus for NoOpEventBus {
    fn emit(&self, _event: &str, _payload: serde_json::Value) {}
}

/// Logs every event through tracing. Used by the standalone binary, where
/// no host platform is attached.
pub struct TracingEventBus {
    prefix: String,
}

impl TracingEventBus {
    pub fn new(prefix: impl Into<String>) -> Self {
        TracingEventBus {
            prefix: prefix.into(),
        }
    }
}

impl EventBus for TracingEventBus {
    fn emit(&self, event: &str, payload: serde_json::Value) {
        info!(event = %format!("{}{event}", self.prefix), %payload, "Event emitted");
    }
}

/// Captures emitted events for inspection. Test helper.
#[derive(Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events emitted so far, in order.
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().expect("event log poisoned").clone()
    }

    /// Event names only, in order.
    pub fn names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }
}

impl EventBus for RecordingEventBus {
    fn emit(&self, event: &str, payload: serde_json::Value) {
        self.events
            .lock()
            .expect("event log poisoned")
            .push((event.to_string(), payload));
    }
}

// =============================================================================
// State Host
// =============================================================================

/// The automation platform's entity/state surface, as consumed by the hub.
///
/// `subscribe_changes` hands out a broadcast receiver owned by the caller;
/// dropping the receiver is the unsubscription, so stream loops release
/// their subscription on every exit path by scope alone.
#[async_trait]
pub trait StateHost: Send + Sync {
    /// Snapshot of all known entities.
    async fn list_entities(&self) -> Vec<EntityState>;

    /// A single entity, if known.
    async fn entity(&self, entity_id: &str) -> Option<EntityState>;

    /// Invokes `<domain>.<service>` with the given service data.
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
    ) -> HubResult<()>;

    /// Subscribes to entity state changes.
    fn subscribe_changes(&self) -> broadcast::Receiver<EntityState>;
}

/// Entity table + broadcast channel. Backs the standalone binary and every
/// test that needs a live state host.
pub struct InMemoryStateHost {
    entities: RwLock<HashMap<String, EntityState>>,
    changes_tx: broadcast::Sender<EntityState>,
}

impl InMemoryStateHost {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        InMemoryStateHost {
            entities: RwLock::new(HashMap::new()),
            changes_tx,
        }
    }

    /// Inserts or replaces an entity and broadcasts the change.
    pub async fn set_entity(&self, entity: EntityState) {
        self.entities
            .write()
            .await
            .insert(entity.entity_id.clone(), entity.clone());
        let _ = self.changes_tx.send(entity);
    }

    /// Updates just the state value of an existing entity.
    pub async fn set_state(&self, entity_id: &str, state: impl Into<String>) -> HubResult<()> {
        let updated = {
            let mut entities = self.entities.write().await;
            let entry = entities
                .get_mut(entity_id)
                .ok_or_else(|| HubError::UnknownEntity(entity_id.to_string()))?;
            entry.state = state.into();
            entry.clone()
        };
        let _ = self.changes_tx.send(updated);
        Ok(())
    }
}

impl Default for InMemoryStateHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateHost for InMemoryStateHost {
    async fn list_entities(&self) -> Vec<EntityState> {
        self.entities.read().await.values().cloned().collect()
    }

    async fn entity(&self, entity_id: &str) -> Option<EntityState> {
        self.entities.read().await.get(entity_id).cloned()
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
    ) -> HubResult<()> {
        let entity_id = data
            .get("entity_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HubError::ServiceCallFailed("missing entity_id".into()))?
            .to_string();

        match service {
            "turn_on" => self.set_state(&entity_id, "on").await,
            "turn_off" => self.set_state(&entity_id, "off").await,
            "toggle" => {
                let current = self
                    .entity(&entity_id)
                    .await
                    .ok_or_else(|| HubError::UnknownEntity(entity_id.clone()))?;
                let next = if current.state == "on" { "off" } else { "on" };
                self.set_state(&entity_id, next).await
            }
            other => {
                // Accepted but not simulated; a real host adapter executes these.
                debug!(domain, service = other, %entity_id, "Service call ignored by in-memory host");
                Ok(())
            }
        }
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<EntityState> {
        self.changes_tx.subscribe()
    }
}

// =============================================================================
// Registry Store
// =============================================================================

/// Durable blob storage for the registry snapshot, keyed by the owning
/// hub instance. Saves are best-effort: the registry logs failures and
/// keeps its in-memory table authoritative.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn save(&self, snapshot: &RegistrySnapshot) -> HubResult<()>;
    async fn load(&self) -> HubResult<Option<RegistrySnapshot>>;
}

/// Keeps the snapshot in memory. Test helper.
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<RegistrySnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn save(&self, snapshot: &RegistrySnapshot) -> HubResult<()> {
        *self.snapshot.lock().expect("snapshot lock poisoned") = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> HubResult<Option<RegistrySnapshot>> {
        Ok(self.snapshot.lock().expect("snapshot lock poisoned").clone())
    }
}

/// Persists the snapshot as pretty-printed JSON on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    async fn save(&self, snapshot: &RegistrySnapshot) -> HubResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HubError::SnapshotSaveFailed(e.to_string()))?;
        }

        let raw = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| HubError::SnapshotSaveFailed(e.to_string()))?;

        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| HubError::SnapshotSaveFailed(format!("{}: {e}", self.path.display())))
    }

    async fn load(&self) -> HubResult<Option<RegistrySnapshot>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HubError::SnapshotLoadFailed(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| HubError::SnapshotLoadFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_host_broadcasts_changes() {
        let host = InMemoryStateHost::new();
        let mut rx = host.subscribe_changes();

        host.set_entity(EntityState::new("light.kitchen", "off")).await;
        let change = rx.recv().await.expect("change broadcast");
        assert_eq!(change.entity_id, "light.kitchen");
        assert_eq!(change.state, "off");
    }

    #[tokio::test]
    async fn test_in_memory_host_toggle() {
        let host = InMemoryStateHost::new();
        host.set_entity(EntityState::new("switch.fan", "off")).await;

        host.call_service("switch", "toggle", serde_json::json!({"entity_id": "switch.fan"}))
            .await
            .expect("toggle");
        assert_eq!(host.entity("switch.fan").await.map(|e| e.state), Some("on".into()));

        host.call_service("switch", "toggle", serde_json::json!({"entity_id": "switch.fan"}))
            .await
            .expect("toggle back");
        assert_eq!(host.entity("switch.fan").await.map(|e| e.state), Some("off".into()));
    }

    #[tokio::test]
    async fn test_service_call_on_unknown_entity_fails() {
        let host = InMemoryStateHost::new();
        let result = host
            .call_service("light", "turn_on", serde_json::json!({"entity_id": "light.ghost"}))
            .await;
        assert!(matches!(result, Err(HubError::UnknownEntity(_))));
    }

    #[tokio::test]
    async fn test_json_file_store_round_trip() {
        let path = std::env::temp_dir().join(format!("chorus-store-{}.json", uuid::Uuid::new_v4()));
        let store = JsonFileStore::new(&path);

        assert!(store.load().await.expect("load missing").is_none());

        let snapshot = RegistrySnapshot {
            speakers: vec![serde_json::json!({"speaker_id": "kitchen-1"})],
            updated_at: 1_700_000_000,
            instance_id: "hub-test".into(),
        };
        store.save(&snapshot).await.expect("save");

        let loaded = store.load().await.expect("load").expect("present");
        assert_eq!(loaded.instance_id, "hub-test");
        assert_eq!(loaded.speakers.len(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_recording_bus_keeps_order() {
        let bus = RecordingEventBus::new();
        bus.emit("connected", serde_json::json!({"speaker_id": "a"}));
        bus.emit("disconnected", serde_json::json!({"speaker_id": "a"}));
        assert_eq!(bus.names(), vec!["connected", "disconnected"]);
    }
}
