//! # Event Names
//!
//! Bare event-name suffixes emitted to the host event bus. The configured
//! event prefix is applied by the bus implementation, not here, so the core
//! stays host-agnostic.

/// A speaker completed registration.
pub const EVENT_CONNECTED: &str = "connected";

/// A speaker was evicted or disconnected.
pub const EVENT_DISCONNECTED: &str = "disconnected";

/// A speaker acknowledged a pushed TTS command.
pub const EVENT_TTS_RESPONSE: &str = "tts_response";

/// A speaker asked the hub to voice text (device-initiated TTS).
pub const EVENT_TTS_REQUEST: &str = "tts_request";

/// A speaker issued a generic command against a host entity.
pub const EVENT_COMMAND: &str = "command";

/// The hub enqueued a TTS command toward a speaker.
pub const EVENT_TTS_COMMAND_SENT: &str = "tts_command_sent";

/// Hub lifecycle markers.
pub const EVENT_CONNECTOR_STARTED: &str = "connector_started";
pub const EVENT_CONNECTOR_STOPPED: &str = "connector_stopped";

/// Reply to a collaborator connection probe.
pub const EVENT_TEST_RESPONSE: &str = "test_response";
