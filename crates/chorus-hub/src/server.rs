//! # Hub Server Lifecycle
//!
//! Owns the shared hub state, the tonic listener, and the background reaper.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         HubServer Lifecycle                             │
//! │                                                                         │
//! │  start()                                                                │
//! │    1. load persisted registry snapshot                                 │
//! │    2. bind the gRPC listener (fail fast on a taken port)               │
//! │    3. spawn the tonic server with graceful shutdown                    │
//! │    4. spawn the 60s reaper (evict idle speakers, flush checkpoints)    │
//! │    5. emit "connector_started"                                         │
//! │                                                                         │
//! │  HubHandle (returned to the embedding host)                            │
//! │    send_tts / get_speaker / get_all_speakers / get_active_speakers /   │
//! │    get_speaker_stats / clear / test_connection / shutdown              │
//! │                                                                         │
//! │  shutdown()                                                             │
//! │    stop flag ──► stream loops drain out within one poll interval       │
//! │    watch signal ──► tonic + reaper exit                                │
//! │    final snapshot save, emit "connector_stopped"                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::interval;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use chorus_core::events::{
    EVENT_CONNECTOR_STARTED, EVENT_CONNECTOR_STOPPED, EVENT_DISCONNECTED, EVENT_TEST_RESPONSE,
};
use chorus_core::{Speaker, SpeakerStats};

use crate::config::HubConfig;
use crate::dispatch::{TtsDispatcher, TtsOptions};
use crate::error::{HubError, HubResult};
use crate::ports::{EventBus, RegistryStore, StateHost};
use crate::proto::speaker_service_server::SpeakerServiceServer;
use crate::registry::SpeakerRegistry;
use crate::service::SpeakerServiceImpl;
use crate::session::SessionTracker;

/// Cadence of the eviction/checkpoint sweep.
const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Identity written into registry snapshots.
const INSTANCE_ID: &str = "chorus-hub";

// =============================================================================
// Hub State
// =============================================================================

/// State shared by every handler, stream loop, and background task.
pub struct HubState {
    pub(crate) config: HubConfig,
    pub(crate) registry: SpeakerRegistry,
    pub(crate) sessions: SessionTracker,
    pub(crate) dispatcher: TtsDispatcher,
    pub(crate) host: Arc<dyn StateHost>,
    pub(crate) bus: Arc<dyn EventBus>,
    running: AtomicBool,
}

impl HubState {
    pub fn new(
        config: HubConfig,
        store: Arc<dyn RegistryStore>,
        host: Arc<dyn StateHost>,
        bus: Arc<dyn EventBus>,
    ) -> Arc<Self> {
        let registry = SpeakerRegistry::new(
            INSTANCE_ID,
            config.limits.max_speakers,
            store,
            bus.clone(),
        );

        Arc::new(HubState {
            config,
            registry,
            sessions: SessionTracker::new(),
            dispatcher: TtsDispatcher::new(bus.clone()),
            host,
            bus,
            running: AtomicBool::new(true),
        })
    }

    /// Stream loops poll this each iteration and drain out once it drops.
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Refreshes both the durable and the session-level activity clocks.
    pub(crate) async fn touch(&self, speaker_id: &str) {
        self.registry.touch(speaker_id).await;
        self.sessions.touch(speaker_id).await;
    }
}

// =============================================================================
// Hub Server
// =============================================================================

/// The speaker hub: builds the shared state and runs the gRPC front end.
pub struct HubServer {
    state: Arc<HubState>,
}

impl HubServer {
    pub fn new(
        config: HubConfig,
        store: Arc<dyn RegistryStore>,
        host: Arc<dyn StateHost>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        HubServer {
            state: HubState::new(config, store, host, bus),
        }
    }

    /// Starts the hub and returns a handle for the embedding host.
    pub async fn start(self) -> HubResult<HubHandle> {
        let state = self.state;

        state.registry.load().await;

        let bind_addr = state.config.server.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| HubError::BindFailed(format!("{bind_addr}: {e}")))?;

        info!(addr = %bind_addr, "Speaker hub listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // gRPC server task
        let service = SpeakerServiceServer::new(SpeakerServiceImpl::new(state.clone()));
        let mut server_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let result = Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    let _ = server_shutdown.changed().await;
                    info!("gRPC server shutting down");
                })
                .await;

            if let Err(e) = result {
                error!(error = %e, "gRPC server terminated abnormally");
            }
        });

        // Reaper task
        tokio::spawn(run_reaper(state.clone(), shutdown_rx));

        state.bus.emit(
            EVENT_CONNECTOR_STARTED,
            serde_json::json!({
                "grpc_port": state.config.server.grpc_port,
                "event_prefix": state.config.events.prefix,
                "timestamp": Utc::now().timestamp_millis(),
            }),
        );

        Ok(HubHandle {
            state,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }
}

// =============================================================================
// Hub Handle
// =============================================================================

/// Collaborator-facing surface of a running hub.
#[derive(Clone)]
pub struct HubHandle {
    state: Arc<HubState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl HubHandle {
    /// Sends TTS text to a speaker and waits for its acknowledgement
    /// (at most 30 seconds). Returns the device-reported success flag.
    pub async fn send_tts(&self, speaker_id: &str, text: &str, options: TtsOptions) -> bool {
        self.state.dispatcher.send(speaker_id, text, options).await
    }

    pub async fn get_speaker(&self, speaker_id: &str) -> Option<Speaker> {
        self.state.registry.get(speaker_id).await
    }

    pub async fn get_all_speakers(&self) -> Vec<Speaker> {
        self.state.registry.list().await
    }

    /// Speakers seen within the last `max_idle_secs`.
    pub async fn get_active_speakers(&self, max_idle_secs: i64) -> Vec<Speaker> {
        self.state.registry.active(max_idle_secs).await
    }

    pub async fn get_speaker_stats(&self) -> SpeakerStats {
        self.state.registry.stats().await
    }

    /// Removes every registered speaker and persists the empty table.
    pub async fn clear(&self) {
        self.state.registry.clear().await;
    }

    /// Emits a "test_response" event so the host can verify the wiring.
    pub async fn test_connection(&self) {
        self.state.bus.emit(
            EVENT_TEST_RESPONSE,
            serde_json::json!({
                "success": true,
                "speaker_count": self.state.registry.count().await,
                "timestamp": Utc::now().timestamp_millis(),
            }),
        );
    }

    /// Stops the hub: stream loops drain, tonic and the reaper exit, the
    /// registry is saved one last time.
    pub async fn shutdown(&self) {
        info!("Shutting down speaker hub");
        self.state.stop();
        let _ = self.shutdown_tx.send(true);

        self.state.registry.save().await;

        self.state.bus.emit(
            EVENT_CONNECTOR_STOPPED,
            serde_json::json!({
                "timestamp": Utc::now().timestamp_millis(),
            }),
        );
    }
}

// =============================================================================
// Reaper
// =============================================================================

/// Periodic sweep: evicts speakers idle for over an hour and flushes the
/// activity checkpoint.
async fn run_reaper(state: Arc<HubState>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(REAPER_INTERVAL);
    // interval fires immediately; the first sweep should wait a full period
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }

        if !state.is_running() {
            break;
        }

        evict_idle_speakers(&state).await;
        state.registry.checkpoint().await;
    }

    info!("Reaper stopped");
}

/// Evicts every speaker idle beyond the registry threshold, discarding its
/// session and TTS queue and emitting one "disconnected" per speaker.
pub(crate) async fn evict_idle_speakers(state: &Arc<HubState>) -> Vec<Speaker> {
    let evicted = state.registry.sweep_inactive().await;
    let now_ms = Utc::now().timestamp_millis();

    for speaker in &evicted {
        state.sessions.remove(&speaker.speaker_id).await;
        state.dispatcher.drop_queue(&speaker.speaker_id);

        state.bus.emit(
            EVENT_DISCONNECTED,
            serde_json::json!({
                "speaker_id": speaker.speaker_id,
                "speaker_name": speaker.name,
                "reason": "inactivity_timeout",
                "timestamp": now_ms,
            }),
        );
    }

    evicted
}

// =============================================================================
// Tests
// =============================================================================
