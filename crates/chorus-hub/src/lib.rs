//! # chorus-hub: Speaker Session & Streaming Engine
//!
//! This crate implements the hub side of the Chorus speaker protocol:
//! registration, per-speaker server-push streams, TTS correlation, liveness
//! tracking, and inactivity eviction.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Hub Architecture                                │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    HubServer (server.rs)                         │  │
//! │  │                                                                  │  │
//! │  │  Binds tonic, spawns the reaper, owns the shared HubState,       │  │
//! │  │  hands a HubHandle to the embedding host                         │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │SpeakerRegistry │  │ SessionTracker │  │    TtsDispatcher       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Durable table, │  │ Ephemeral per- │  │ Per-speaker queues +   │    │
//! │  │ snapshot save/ │  │ connection     │  │ pending-ack slots,     │    │
//! │  │ load, eviction │  │ bookkeeping    │  │ 30s correlation wait   │    │
//! │  │ sweep          │  │                │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │              SpeakerService (service.rs, tonic)                  │  │
//! │  │                                                                  │  │
//! │  │  RegisterSpeaker, StreamDeviceStates, StreamTtsCommands,         │  │
//! │  │  SendTtsResponse, SendTextForSpeech, SendSpeakerCommand,         │  │
//! │  │  GetAvailableDevices, KeepAlive                                  │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  OUTBOUND PORTS (ports.rs):                                            │
//! │  • EventBus       - fire-and-forget host events                        │
//! │  • StateHost      - entities, service calls, change subscription      │
//! │  • RegistryStore  - snapshot persistence                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - TOML + env configuration
//! - [`error`] - Hub error types
//! - [`ports`] - Outbound ports and in-process implementations
//! - [`registry`] - Durable speaker table with eviction sweep
//! - [`session`] - Ephemeral session records
//! - [`dispatch`] - TTS queues and acknowledgement correlation
//! - [`service`] - tonic service implementation
//! - [`server`] - Lifecycle wrapper and collaborator surface
//! - [`proto`] - Generated gRPC stubs from proto/chorus_speaker.proto
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chorus_hub::{HubConfig, HubServer, JsonFileStore, InMemoryStateHost, TracingEventBus};
//!
//! let config = HubConfig::load_or_default(None)?;
//! let store = Arc::new(JsonFileStore::new(config.storage.resolve_snapshot_path()));
//! let bus = Arc::new(TracingEventBus::new(config.events.prefix.clone()));
//! let server = HubServer::new(config, store, Arc::new(InMemoryStateHost::new()), bus);
//!
//! let handle = server.start().await?;
//! let spoken = handle.send_tts("kitchen-1", "hello", Default::default()).await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ports;
pub mod proto;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::HubConfig;
pub use dispatch::{TtsDispatcher, TtsOptions, TTS_ACK_TIMEOUT};
pub use error::{HubError, HubResult};
pub use ports::{
    EventBus, InMemoryStateHost, JsonFileStore, MemoryStore, NoOpEventBus, RecordingEventBus,
    RegistryStore, StateHost, TracingEventBus,
};
pub use registry::{NewSpeaker, RegistrySnapshot, SpeakerRegistry, INACTIVITY_TIMEOUT_SECS};
pub use server::{HubHandle, HubServer, HubState};
pub use service::SpeakerServiceImpl;
pub use session::{SessionRecord, SessionTracker};
