//! # Domain Types
//!
//! Core domain types used throughout the Chorus Speaker Hub.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Speaker      │   │  SpeakerStats   │   │   EntityState   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  speaker_id     │   │  total          │   │  entity_id      │       │
//! │  │  session_id     │   │  active         │   │  state          │       │
//! │  │  capabilities   │   │  average_uptime │   │  attributes     │       │
//! │  │  last_seen      │   │  by_type/-cap   │   │  friendly_name  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │   TtsCommand    │   │   TtsOutcome    │                             │
//! │  │  ─────────────  │   │  ─────────────  │                             │
//! │  │  text, voice    │   │  success        │                             │
//! │  │  message_id     │   │  message        │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every speaker has:
//! - `speaker_id`: stable device identity, unique registry key
//! - `session_id`: one live registration, regenerated on every reconnect

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Idle window (seconds) after which a speaker no longer counts as active.
pub const ACTIVE_THRESHOLD_SECS: i64 = 300;

// =============================================================================
// Speaker
// =============================================================================

/// A registered speaker device.
///
/// Persisted as part of the registry snapshot; all timestamps are epoch
/// seconds supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    /// Stable external identifier - unique registry key.
    pub speaker_id: String,

    /// Human-readable device name (e.g., "Kitchen Speaker").
    pub name: String,

    /// Device model/family reported at registration.
    pub speaker_type: String,

    /// Firmware version reported at registration.
    pub firmware_version: String,

    /// Capability tags (e.g., "tts", "voice_commands").
    pub capabilities: Vec<String>,

    /// Identifier of the current registration; changes on every reconnect.
    pub session_id: String,

    /// Transport peer address at registration time.
    pub address: String,

    /// Epoch seconds of this session's registration.
    pub connected_at: i64,

    /// Epoch seconds of the most recent protocol interaction.
    /// Monotonically non-decreasing while connected.
    pub last_seen: i64,

    /// Opaque key-value settings supplied by the device.
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl Speaker {
    /// Seconds of inactivity relative to `now`.
    pub fn idle_secs(&self, now: i64) -> i64 {
        now - self.last_seen
    }

    /// Seconds since this session registered, relative to `now`.
    pub fn uptime_secs(&self, now: i64) -> i64 {
        now - self.connected_at
    }

    /// Whether the speaker has been seen within `max_idle_secs`.
    pub fn is_active(&self, now: i64, max_idle_secs: i64) -> bool {
        self.idle_secs(now) <= max_idle_secs
    }

    /// Whether the device advertised a capability at registration.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

// =============================================================================
// Speaker Stats
// =============================================================================

/// Aggregate registry statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerStats {
    /// Total registered speakers.
    pub total_speakers: usize,

    /// Speakers seen within the last [`ACTIVE_THRESHOLD_SECS`].
    pub active_speakers: usize,

    /// Mean uptime in seconds. Uptime is summed over active speakers only
    /// and divided by the total speaker count; 0.0 for an empty registry.
    pub average_uptime: f64,

    /// Speaker counts keyed by `speaker_type`.
    pub by_type: HashMap<String, usize>,

    /// Speaker counts keyed by capability tag.
    pub by_capability: HashMap<String, usize>,
}

impl SpeakerStats {
    /// Computes stats over a set of speakers at time `now` (epoch seconds).
    pub fn compute<'a, I>(speakers: I, now: i64) -> Self
    where
        I: IntoIterator<Item = &'a Speaker>,
    {
        let mut stats = SpeakerStats::default();
        let mut total_uptime: i64 = 0;

        for speaker in speakers {
            stats.total_speakers += 1;

            if speaker.is_active(now, ACTIVE_THRESHOLD_SECS) {
                stats.active_speakers += 1;
                total_uptime += speaker.uptime_secs(now);
            }

            *stats
                .by_type
                .entry(speaker.speaker_type.clone())
                .or_default() += 1;

            for capability in &speaker.capabilities {
                *stats.by_capability.entry(capability.clone()).or_default() += 1;
            }
        }

        if stats.total_speakers > 0 {
            stats.average_uptime = total_uptime as f64 / stats.total_speakers as f64;
        }

        stats
    }
}

// =============================================================================
// Entity State
// =============================================================================

/// A host entity's state as seen by the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    /// Entity identifier in `<domain>.<object_id>` form.
    pub entity_id: String,

    /// Current state value.
    pub state: String,

    /// Attribute map; values are arbitrary JSON.
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        EntityState {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: serde_json::Map::new(),
        }
    }

    /// Adds an attribute, builder-style.
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// The `friendly_name` attribute, falling back to the entity id.
    pub fn friendly_name(&self) -> String {
        self.attributes
            .get("friendly_name")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.entity_id)
            .to_string()
    }

    /// Whether the entity id starts with any of the given prefixes.
    /// An empty prefix list matches everything.
    pub fn matches_filters(&self, filters: &[String]) -> bool {
        filters.is_empty() || filters.iter().any(|p| self.entity_id.starts_with(p.as_str()))
    }
}

/// Wire representation of an attribute value: strings pass through, every
/// other JSON value is serialized to its compact JSON text. Device firmware
/// only understands string attribute values.
pub fn attribute_wire_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// TTS Command / Outcome
// =============================================================================

/// A TTS command queued for delivery to one speaker.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsCommand {
    pub speaker_id: String,
    pub text: String,
    pub language: String,
    pub voice: String,
    pub volume: i32,
    pub priority: bool,
    /// Correlation handle; matches the eventual [`TtsOutcome`].
    pub message_id: String,
    /// Epoch millis at enqueue time.
    pub timestamp_ms: i64,
}

/// The device's acknowledgement of a delivered TTS command.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsOutcome {
    pub success: bool,
    pub message: String,
}

// =============================================================================
// Tests
// =============================================================================
