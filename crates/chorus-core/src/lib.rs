//! # chorus-core: Domain Types for the Chorus Speaker Hub
//!
//! Pure domain model shared by the hub engine and its tooling. This crate
//! performs no I/O: callers supply timestamps, and every function here is a
//! plain computation over its inputs.
//!
//! ## Module Organization
//! - [`types`] - Speaker records, stats, entity states, TTS command/outcome
//! - [`ids`] - Session-id and message-id derivation
//! - [`commands`] - Static domain → supported-commands table
//! - [`events`] - Event-bus name constants

pub mod commands;
pub mod events;
pub mod ids;
pub mod types;

pub use commands::{domain_of, supported_commands_for_domain};
pub use ids::{event_id, keepalive_id, session_id, tts_message_id};
pub use types::{
    attribute_wire_value, EntityState, Speaker, SpeakerStats, TtsCommand, TtsOutcome,
    ACTIVE_THRESHOLD_SECS,
};
