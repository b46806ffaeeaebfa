//! # Identifier Derivation
//!
//! Session, message, and event identifiers. All functions take the caller's
//! clock as input so the crate stays free of side effects; the hub passes
//! wall-clock values, tests pass fixed ones.

use uuid::Uuid;

/// Derives a session id for one registration attempt.
///
/// The millisecond timestamp component must be strictly increasing across
/// registrations of the same speaker (the registry enforces this), which
/// keeps session ids unique even for same-instant reconnects.
pub fn session_id(speaker_id: &str, timestamp_ms: i64) -> String {
    format!("{speaker_id}_{timestamp_ms}")
}

/// Generates a globally unique TTS correlation id.
///
/// Format: `tts_<epoch-secs>_<8 hex chars>`. The coarse timestamp keeps ids
/// grep-able in device logs; the random suffix carries the uniqueness.
pub fn tts_message_id(now_secs: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("tts_{now_secs}_{}", &suffix[..8])
}

/// Message id tagged onto empty keep-alive TTS frames.
pub fn keepalive_id(now_secs: i64) -> String {
    format!("keepalive_{now_secs}")
}

/// Event id attached to command responses.
pub fn event_id(now_secs: i64) -> String {
    format!("cmd_{now_secs}")
}
