//! # Speaker gRPC Service
//!
//! Implements the wire protocol spoken by speaker firmware: registration,
//! the two server-push streams, TTS acknowledgements, device-initiated TTS,
//! generic commands, device listing, and keep-alive.
//!
//! ## Stream Loops
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Server-Push Stream Loops                            │
//! │                                                                         │
//! │  StreamDeviceStates                 StreamTtsCommands                   │
//! │  ──────────────────                 ─────────────────                   │
//! │  optional initial snapshot          register fresh queue (replaces     │
//! │  subscribe host changes             any prior one for this speaker)    │
//! │  poll 0.5s ──► push matching        poll 1.0s ──► push non-empty       │
//! │  idle ≥30s ──► empty DeviceState    idle ≥30s ──► empty keep-alive     │
//! │  every push touches activity        every push touches activity        │
//! │  exit: client gone / shutdown       exit: client gone / shutdown       │
//! │  subscription dropped by scope      queue released iff still ours      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handler faults never escape as crashes: downstream failures become
//! failed responses, stream-task errors end the stream and are logged.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Instant};
use tokio_stream::{wrappers::ReceiverStream, Stream};
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use chorus_core::events::{EVENT_COMMAND, EVENT_TTS_REQUEST, EVENT_TTS_RESPONSE};
use chorus_core::types::ACTIVE_THRESHOLD_SECS;
use chorus_core::{
    attribute_wire_value, domain_of, event_id, keepalive_id, supported_commands_for_domain,
    tts_message_id, EntityState, TtsCommand, TtsOutcome,
};

use crate::proto::speaker_service_server::SpeakerService;
use crate::proto::{
    CommandResponse, DeviceInfo, DeviceList, DeviceListRequest, DeviceState, PingRequest,
    PingResponse, RegistrationResponse, SpeakTextRequest, SpeakTextResponse, SpeakerCommand,
    SpeakerRegistration, StateStreamRequest, TtsAck, TtsRequest, TtsStreamRequest,
};
use crate::registry::NewSpeaker;
use crate::server::HubState;
use crate::session::SessionRecord;

/// Version string reported in registration responses.
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Idle time before a stream emits a keep-alive frame.
const STREAM_HEARTBEAT: Duration = Duration::from_secs(30);

/// Poll interval of the device-state stream loop.
const STATE_POLL: Duration = Duration::from_millis(500);

/// Poll interval of the TTS stream loop.
const TTS_POLL: Duration = Duration::from_secs(1);

/// Outbound buffer of each server-push stream.
const STREAM_BUFFER: usize = 64;

// =============================================================================
// Service
// =============================================================================

/// tonic implementation of the speaker service.
pub struct SpeakerServiceImpl {
    state: Arc<HubState>,
}

impl SpeakerServiceImpl {
    pub fn new(state: Arc<HubState>) -> Self {
        SpeakerServiceImpl { state }
    }

    /// Rejects callers without a live session.
    async fn require_session(&self, speaker_id: &str) -> Result<(), Status> {
        if self.state.sessions.contains(speaker_id).await {
            Ok(())
        } else {
            Err(Status::unauthenticated("speaker is not registered"))
        }
    }
}

#[tonic::async_trait]
impl SpeakerService for SpeakerServiceImpl {
    async fn register_speaker(
        &self,
        request: Request<SpeakerRegistration>,
    ) -> Result<Response<RegistrationResponse>, Status> {
        let address = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let req = request.into_inner();

        let session_id = self
            .state
            .registry
            .register(NewSpeaker {
                speaker_id: req.speaker_id.clone(),
                name: req.speaker_name.clone(),
                speaker_type: req.speaker_type.clone(),
                firmware_version: req.firmware_version.clone(),
                capabilities: req.capabilities.clone(),
                address: address.clone(),
                settings: req.settings,
            })
            .await;

        self.state
            .sessions
            .insert(SessionRecord::new(
                req.speaker_id.clone(),
                address,
                req.capabilities,
            ))
            .await;

        let mut server_settings = HashMap::new();
        server_settings.insert(
            "grpc_port".to_string(),
            self.state.config.server.grpc_port.to_string(),
        );
        server_settings.insert(
            "event_prefix".to_string(),
            self.state.config.events.prefix.clone(),
        );

        Ok(Response::new(RegistrationResponse {
            success: true,
            message: format!("Speaker '{}' registered successfully", req.speaker_name),
            server_version: SERVER_VERSION.to_string(),
            session_id,
            server_settings,
        }))
    }

    type StreamDeviceStatesStream =
        Pin<Box<dyn Stream<Item = Result<DeviceState, Status>> + Send>>;

    async fn stream_device_states(
        &self,
        request: Request<StateStreamRequest>,
    ) -> Result<Response<Self::StreamDeviceStatesStream>, Status> {
        let req = request.into_inner();
        self.require_session(&req.speaker_id).await?;
        self.state.touch(&req.speaker_id).await;

        info!(speaker_id = %req.speaker_id, filters = ?req.entity_filters, "Device state stream opened");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(run_state_stream(self.state.clone(), req, tx));

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    type StreamTtsCommandsStream =
        Pin<Box<dyn Stream<Item = Result<SpeakTextRequest, Status>> + Send>>;

    async fn stream_tts_commands(
        &self,
        request: Request<TtsStreamRequest>,
    ) -> Result<Response<Self::StreamTtsCommandsStream>, Status> {
        let req = request.into_inner();
        let speaker_id = req.speaker_id;
        self.require_session(&speaker_id).await?;

        if let Some(speaker) = self.state.registry.get(&speaker_id).await {
            if !speaker.has_capability("tts") {
                warn!(%speaker_id, "Speaker opened a TTS stream without the tts capability");
            }
        }

        info!(%speaker_id, "TTS command stream opened");

        let (queue_tx, queue_rx) = self.state.dispatcher.register_queue(&speaker_id);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(run_tts_stream(
            self.state.clone(),
            speaker_id,
            queue_tx,
            queue_rx,
            tx,
        ));

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn send_tts_response(
        &self,
        request: Request<SpeakTextResponse>,
    ) -> Result<Response<TtsAck>, Status> {
        let req = request.into_inner();
        self.state.touch(&req.speaker_id).await;

        info!(
            speaker_id = %req.speaker_id,
            message_id = %req.message_id,
            success = req.success,
            "TTS response from speaker"
        );

        self.state.bus.emit(
            EVENT_TTS_RESPONSE,
            serde_json::json!({
                "speaker_id": req.speaker_id,
                "message_id": req.message_id,
                "success": req.success,
                "message": req.message,
                "timestamp": req.timestamp,
                "received_at": Utc::now().timestamp_millis(),
            }),
        );

        // Late or duplicate responses find no slot; they are accepted silently.
        self.state.dispatcher.resolve(
            &req.message_id,
            TtsOutcome {
                success: req.success,
                message: req.message,
            },
        );

        Ok(Response::new(TtsAck {
            success: true,
            message_id: req.message_id,
            timestamp: Utc::now().timestamp_millis(),
        }))
    }

    async fn send_text_for_speech(
        &self,
        request: Request<TtsRequest>,
    ) -> Result<Response<TtsAck>, Status> {
        let req = request.into_inner();
        self.state.touch(&req.speaker_id).await;

        let now = Utc::now();
        let message_id = tts_message_id(now.timestamp());
        let voice = if req.voice.is_empty() {
            "default".to_string()
        } else {
            req.voice
        };

        info!(speaker_id = %req.speaker_id, %message_id, "TTS request from speaker");

        self.state.bus.emit(
            EVENT_TTS_REQUEST,
            serde_json::json!({
                "speaker_id": req.speaker_id,
                "text": req.text,
                "language": req.language,
                "voice": voice,
                "volume": req.volume,
                "priority": req.priority,
                "message_id": message_id,
                "direction": "from_speaker",
                "timestamp": now.timestamp_millis(),
            }),
        );

        Ok(Response::new(TtsAck {
            success: true,
            message_id,
            timestamp: now.timestamp_millis(),
        }))
    }

    async fn send_speaker_command(
        &self,
        request: Request<SpeakerCommand>,
    ) -> Result<Response<CommandResponse>, Status> {
        let req = request.into_inner();
        self.state.touch(&req.speaker_id).await;

        let now = Utc::now();
        let timestamp = if req.timestamp != 0 {
            req.timestamp
        } else {
            now.timestamp_millis()
        };

        info!(
            speaker_id = %req.speaker_id,
            command_type = %req.command_type,
            entity_id = %req.entity_id,
            "Command from speaker"
        );

        self.state.bus.emit(
            EVENT_COMMAND,
            serde_json::json!({
                "speaker_id": req.speaker_id,
                "command_type": req.command_type,
                "entity_id": req.entity_id,
                "parameters": req.parameters,
                "voice_command": req.voice_command,
                "timestamp": timestamp,
            }),
        );

        let (success, result_state) = match req.command_type.as_str() {
            "turn_on" | "turn_off" | "toggle" => {
                let domain = domain_of(&req.entity_id).to_string();
                let mut data = serde_json::Map::new();
                data.insert(
                    "entity_id".to_string(),
                    serde_json::Value::String(req.entity_id.clone()),
                );
                for (key, value) in &req.parameters {
                    data.insert(key.clone(), serde_json::Value::String(value.clone()));
                }

                match self
                    .state
                    .host
                    .call_service(&domain, &req.command_type, serde_json::Value::Object(data))
                    .await
                {
                    Ok(()) => {
                        let result = self
                            .state
                            .host
                            .entity(&req.entity_id)
                            .await
                            .map(|e| e.state)
                            .unwrap_or_default();
                        (true, result)
                    }
                    Err(e) => {
                        error!(entity_id = %req.entity_id, error = %e, "Service call failed");
                        (false, String::new())
                    }
                }
            }
            // Event-only command types: the emission is the execution.
            _ => (true, String::new()),
        };

        Ok(Response::new(CommandResponse {
            success,
            event_id: event_id(now.timestamp()),
            result_state,
            message: format!("Command '{}' processed", req.command_type),
        }))
    }

    async fn get_available_devices(
        &self,
        request: Request<DeviceListRequest>,
    ) -> Result<Response<DeviceList>, Status> {
        let req = request.into_inner();
        self.state.touch(&req.speaker_id).await;

        debug!(speaker_id = %req.speaker_id, domains = ?req.domains, "Device list requested");

        let devices: Vec<DeviceInfo> = self
            .state
            .host
            .list_entities()
            .await
            .into_iter()
            .filter(|entity| {
                req.domains.is_empty()
                    || req
                        .domains
                        .iter()
                        .any(|d| d == domain_of(&entity.entity_id))
            })
            .map(|entity| {
                let domain = domain_of(&entity.entity_id).to_string();
                DeviceInfo {
                    friendly_name: entity.friendly_name(),
                    current_state: entity.state.clone(),
                    supported_commands: supported_commands_for_domain(&domain)
                        .iter()
                        .map(|c| c.to_string())
                        .collect(),
                    attributes: entity
                        .attributes
                        .iter()
                        .map(|(key, value)| (key.clone(), attribute_wire_value(value)))
                        .collect(),
                    domain,
                    entity_id: entity.entity_id,
                }
            })
            .collect();

        Ok(Response::new(DeviceList {
            total_count: devices.len() as i32,
            devices,
        }))
    }

    async fn keep_alive(
        &self,
        request: Request<PingRequest>,
    ) -> Result<Response<PingResponse>, Status> {
        let req = request.into_inner();
        let alive = self.state.sessions.contains(&req.speaker_id).await;

        let status_message = if alive {
            // Idle measured before the touch below refreshes it.
            let idle = {
                let now = Utc::now().timestamp();
                self.state
                    .sessions
                    .get(&req.speaker_id)
                    .await
                    .map(|record| record.idle_secs(now))
                    .unwrap_or(0)
            };
            self.state.touch(&req.speaker_id).await;

            match self.state.registry.get(&req.speaker_id).await {
                Some(speaker) => {
                    let uptime = format_uptime(speaker.uptime_secs(Utc::now().timestamp()));
                    if idle > ACTIVE_THRESHOLD_SECS {
                        format!("Speaker is alive (uptime: {uptime}) but has shown no recent activity")
                    } else {
                        format!("Speaker is alive and healthy (uptime: {uptime})")
                    }
                }
                None => "Speaker session is active".to_string(),
            }
        } else {
            "Speaker is not registered".to_string()
        };

        Ok(Response::new(PingResponse {
            alive,
            server_time: Utc::now().timestamp_millis(),
            status_message,
        }))
    }
}

// =============================================================================
// Stream Loops
// =============================================================================

/// Device-state stream loop. The broadcast receiver is owned by this
/// function, so the subscription is released on every exit path.
async fn run_state_stream(
    state: Arc<HubState>,
    req: StateStreamRequest,
    tx: mpsc::Sender<Result<DeviceState, Status>>,
) {
    let speaker_id = req.speaker_id;

    // Subscribe before the snapshot so changes racing the snapshot are kept.
    let mut changes = state.host.subscribe_changes();

    if req.send_initial_state {
        for entity in state.host.list_entities().await {
            if !entity.matches_filters(&req.entity_filters) {
                continue;
            }
            if tx.send(Ok(entity_to_proto(&entity))).await.is_err() {
                info!(%speaker_id, "Device state stream closed during snapshot");
                return;
            }
            state.touch(&speaker_id).await;
        }
    }

    let mut last_keepalive = Instant::now();

    while state.is_running() {
        let received = tokio::select! {
            // Client cancelled or disconnected; exit without waiting a poll
            _ = tx.closed() => break,
            received = timeout(STATE_POLL, changes.recv()) => received,
        };

        match received {
            Ok(Ok(entity)) => {
                if !entity.matches_filters(&req.entity_filters) {
                    continue;
                }
                if tx.send(Ok(entity_to_proto(&entity))).await.is_err() {
                    break;
                }
                state.touch(&speaker_id).await;
            }
            Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                warn!(%speaker_id, missed, "Device state stream lagged behind host changes");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_) => {
                if last_keepalive.elapsed() >= STREAM_HEARTBEAT {
                    // Empty frame keeps the connection alive.
                    if tx.send(Ok(DeviceState::default())).await.is_err() {
                        break;
                    }
                    state.touch(&speaker_id).await;
                    last_keepalive = Instant::now();
                }
            }
        }
    }

    info!(%speaker_id, "Device state stream ended");
}

/// TTS stream loop. On exit the queue registration is released only if it
/// is still this loop's queue; a reconnect may already have replaced it.
async fn run_tts_stream(
    state: Arc<HubState>,
    speaker_id: String,
    queue_tx: mpsc::UnboundedSender<TtsCommand>,
    mut queue_rx: mpsc::UnboundedReceiver<TtsCommand>,
    tx: mpsc::Sender<Result<SpeakTextRequest, Status>>,
) {
    let mut last_keepalive = Instant::now();

    while state.is_running() {
        let received = tokio::select! {
            // Client cancelled or disconnected; exit without waiting a poll
            _ = tx.closed() => break,
            received = timeout(TTS_POLL, queue_rx.recv()) => received,
        };

        match received {
            Ok(Some(command)) => {
                if command.text.is_empty() {
                    continue;
                }
                info!(%speaker_id, message_id = %command.message_id, "Delivering TTS command");
                if tx.send(Ok(tts_command_to_proto(command))).await.is_err() {
                    break;
                }
                state.touch(&speaker_id).await;
            }
            Ok(None) => break,
            Err(_) => {
                if last_keepalive.elapsed() >= STREAM_HEARTBEAT {
                    let now = Utc::now();
                    let keepalive = SpeakTextRequest {
                        speaker_id: speaker_id.clone(),
                        message_id: keepalive_id(now.timestamp()),
                        timestamp: now.timestamp_millis(),
                        ..Default::default()
                    };
                    if tx.send(Ok(keepalive)).await.is_err() {
                        break;
                    }
                    last_keepalive = Instant::now();
                }
            }
        }
    }

    state.dispatcher.release_queue(&speaker_id, &queue_tx);
    info!(%speaker_id, "TTS command stream ended");
}

// =============================================================================
// Wire Conversions
// =============================================================================

fn entity_to_proto(entity: &EntityState) -> DeviceState {
    let now_ms = Utc::now().timestamp_millis();
    DeviceState {
        entity_id: entity.entity_id.clone(),
        state: entity.state.clone(),
        attributes: entity
            .attributes
            .iter()
            .map(|(key, value)| (key.clone(), attribute_wire_value(value)))
            .collect(),
        friendly_name: entity.friendly_name(),
        domain: domain_of(&entity.entity_id).to_string(),
        last_changed: now_ms,
        last_updated: now_ms,
    }
}

fn tts_command_to_proto(command: TtsCommand) -> SpeakTextRequest {
    SpeakTextRequest {
        speaker_id: command.speaker_id,
        text: command.text,
        language: command.language,
        voice: command.voice,
        volume: command.volume,
        priority: command.priority,
        message_id: command.message_id,
        timestamp: command.timestamp_ms,
    }
}

/// `3725` -> `"1h 2m 5s"`.
fn format_uptime(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    use crate::config::HubConfig;
    use crate::dispatch::TtsOptions;
    use crate::ports::{InMemoryStateHost, MemoryStore, RecordingEventBus};

    struct TestHub {
        service: SpeakerServiceImpl,
        state: Arc<HubState>,
        host: Arc<InMemoryStateHost>,
        bus: Arc<RecordingEventBus>,
    }

    fn test_hub() -> TestHub {
        let host = Arc::new(InMemoryStateHost::new());
        let bus = Arc::new(RecordingEventBus::new());
        let state = HubState::new(
            HubConfig::default(),
            Arc::new(MemoryStore::new()),
            host.clone(),
            bus.clone(),
        );
        TestHub {
            service: SpeakerServiceImpl::new(state.clone()),
            state,
            host,
            bus,
        }
    }

    fn registration(speaker_id: &str) -> SpeakerRegistration {
        SpeakerRegistration {
            speaker_id: speaker_id.to_string(),
            speaker_name: format!("Speaker {speaker_id}"),
            speaker_type: "mini".to_string(),
            firmware_version: "1.2.0".to_string(),
            capabilities: vec!["tts".to_string()],
            settings: HashMap::new(),
        }
    }

    async fn register(hub: &TestHub, speaker_id: &str) -> RegistrationResponse {
        hub.service
            .register_speaker(Request::new(registration(speaker_id)))
            .await
            .expect("registration succeeds")
            .into_inner()
    }

    #[tokio::test]
    async fn test_register_creates_session_and_registry_entry() {
        let hub = test_hub();
        let response = register(&hub, "kitchen-1").await;

        assert!(response.success);
        assert!(!response.session_id.is_empty());
        assert_eq!(response.server_version, SERVER_VERSION);
        assert_eq!(
            response.server_settings.get("event_prefix"),
            Some(&"chorus_speaker_".to_string())
        );

        assert!(hub.state.sessions.contains("kitchen-1").await);
        let speaker = hub.state.registry.get("kitchen-1").await.expect("registered");
        // No transport behind the test request
        assert_eq!(speaker.address, "unknown");
        assert_eq!(hub.bus.names(), vec!["connected"]);
    }

    #[tokio::test]
    async fn test_streams_reject_unregistered_speaker() {
        let hub = test_hub();

        let states = hub
            .service
            .stream_device_states(Request::new(StateStreamRequest {
                speaker_id: "ghost".into(),
                entity_filters: vec![],
                send_initial_state: true,
            }))
            .await;
        match states {
            Err(status) => assert_eq!(status.code(), tonic::Code::Unauthenticated),
            Ok(_) => panic!("unregistered speaker must be rejected"),
        }

        let tts = hub
            .service
            .stream_tts_commands(Request::new(TtsStreamRequest {
                speaker_id: "ghost".into(),
            }))
            .await;
        match tts {
            Err(status) => assert_eq!(status.code(), tonic::Code::Unauthenticated),
            Ok(_) => panic!("unregistered speaker must be rejected"),
        }
    }

    #[tokio::test]
    async fn test_initial_state_respects_prefix_filters() {
        let hub = test_hub();
        hub.host
            .set_entity(
                EntityState::new("light.kitchen", "on")
                    .with_attribute("friendly_name", serde_json::json!("Kitchen Light"))
                    .with_attribute("brightness", serde_json::json!(128)),
            )
            .await;
        hub.host.set_entity(EntityState::new("switch.fan", "off")).await;

        register(&hub, "kitchen-1").await;

        let mut stream = hub
            .service
            .stream_device_states(Request::new(StateStreamRequest {
                speaker_id: "kitchen-1".into(),
                entity_filters: vec!["light.".into()],
                send_initial_state: true,
            }))
            .await
            .expect("stream opens")
            .into_inner();

        let first = stream
            .next()
            .await
            .expect("one initial state")
            .expect("ok item");
        assert_eq!(first.entity_id, "light.kitchen");
        assert_eq!(first.domain, "light");
        assert_eq!(first.friendly_name, "Kitchen Light");
        // Non-string attributes arrive as JSON text
        assert_eq!(first.attributes.get("brightness"), Some(&"128".to_string()));

        // switch.fan was filtered out; nothing else is pending right away
        let nothing = timeout(Duration::from_millis(100), stream.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_state_changes_are_pushed_live() {
        let hub = test_hub();
        hub.host.set_entity(EntityState::new("light.kitchen", "off")).await;
        register(&hub, "kitchen-1").await;

        let mut stream = hub
            .service
            .stream_device_states(Request::new(StateStreamRequest {
                speaker_id: "kitchen-1".into(),
                entity_filters: vec![],
                send_initial_state: true,
            }))
            .await
            .expect("stream opens")
            .into_inner();

        // Consuming the snapshot guarantees the loop's subscription is live.
        let initial = stream.next().await.expect("snapshot item").expect("ok");
        assert_eq!(initial.state, "off");

        hub.host.set_state("light.kitchen", "on").await.expect("known entity");

        let change = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("change arrives")
            .expect("stream open")
            .expect("ok item");
        assert_eq!(change.entity_id, "light.kitchen");
        assert_eq!(change.state, "on");
    }

    #[tokio::test]
    async fn test_tts_end_to_end_round_trip() {
        let hub = test_hub();
        register(&hub, "kitchen-1").await;

        let mut stream = hub
            .service
            .stream_tts_commands(Request::new(TtsStreamRequest {
                speaker_id: "kitchen-1".into(),
            }))
            .await
            .expect("stream opens")
            .into_inner();

        let dispatcher = hub.state.dispatcher.clone();
        let send_task = tokio::spawn(async move {
            dispatcher
                .send(
                    "kitchen-1",
                    "hello",
                    TtsOptions {
                        volume: 50,
                        ..Default::default()
                    },
                )
                .await
        });

        let command = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("command arrives")
            .expect("stream open")
            .expect("ok item");
        assert_eq!(command.text, "hello");
        assert_eq!(command.volume, 50);
        assert!(!command.message_id.is_empty());

        let ack = hub
            .service
            .send_tts_response(Request::new(SpeakTextResponse {
                speaker_id: "kitchen-1".into(),
                message_id: command.message_id,
                success: true,
                message: "spoken".into(),
                timestamp: Utc::now().timestamp_millis(),
            }))
            .await
            .expect("ack")
            .into_inner();
        assert!(ack.success);

        assert!(send_task.await.expect("send task"));
        assert_eq!(hub.state.dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_tts_response_is_accepted() {
        let hub = test_hub();
        register(&hub, "kitchen-1").await;

        let ack = hub
            .service
            .send_tts_response(Request::new(SpeakTextResponse {
                speaker_id: "kitchen-1".into(),
                message_id: "tts_0_deadbeef".into(),
                success: true,
                message: String::new(),
                timestamp: 0,
            }))
            .await
            .expect("ack")
            .into_inner();
        assert!(ack.success);
    }

    #[tokio::test]
    async fn test_send_text_for_speech_emits_request_event() {
        let hub = test_hub();
        register(&hub, "kitchen-1").await;

        let ack = hub
            .service
            .send_text_for_speech(Request::new(TtsRequest {
                speaker_id: "kitchen-1".into(),
                text: "play jazz".into(),
                language: "en".into(),
                voice: String::new(),
                volume: 40,
                priority: false,
            }))
            .await
            .expect("ack")
            .into_inner();

        assert!(ack.success);
        assert!(ack.message_id.starts_with("tts_"));

        let events = hub.bus.events();
        let (name, payload) = events.last().expect("event emitted");
        assert_eq!(name, "tts_request");
        assert_eq!(payload["voice"], "default");
        assert_eq!(payload["direction"], "from_speaker");
    }

    #[tokio::test]
    async fn test_toggle_command_executes_and_reports_state() {
        let hub = test_hub();
        hub.host.set_entity(EntityState::new("switch.fan", "off")).await;
        register(&hub, "kitchen-1").await;

        let response = hub
            .service
            .send_speaker_command(Request::new(SpeakerCommand {
                speaker_id: "kitchen-1".into(),
                command_type: "toggle".into(),
                entity_id: "switch.fan".into(),
                parameters: HashMap::new(),
                voice_command: "toggle the fan".into(),
                timestamp: 0,
            }))
            .await
            .expect("response")
            .into_inner();

        assert!(response.success);
        assert_eq!(response.result_state, "on");
        assert!(response.event_id.starts_with("cmd_"));
        assert!(hub.bus.names().contains(&"command".to_string()));
    }

    #[tokio::test]
    async fn test_command_against_unknown_entity_fails_softly() {
        let hub = test_hub();
        register(&hub, "kitchen-1").await;

        let response = hub
            .service
            .send_speaker_command(Request::new(SpeakerCommand {
                speaker_id: "kitchen-1".into(),
                command_type: "turn_on".into(),
                entity_id: "light.ghost".into(),
                parameters: HashMap::new(),
                voice_command: String::new(),
                timestamp: 0,
            }))
            .await
            .expect("response")
            .into_inner();

        assert!(!response.success);
        assert!(response.result_state.is_empty());
    }

    #[tokio::test]
    async fn test_event_only_command_succeeds_by_emission() {
        let hub = test_hub();
        register(&hub, "kitchen-1").await;

        let response = hub
            .service
            .send_speaker_command(Request::new(SpeakerCommand {
                speaker_id: "kitchen-1".into(),
                command_type: "announce".into(),
                entity_id: String::new(),
                parameters: HashMap::new(),
                voice_command: String::new(),
                timestamp: 0,
            }))
            .await
            .expect("response")
            .into_inner();

        assert!(response.success);
        assert!(response.result_state.is_empty());
        assert!(hub.bus.names().contains(&"command".to_string()));
    }

    #[tokio::test]
    async fn test_device_list_domain_filter_and_commands() {
        let hub = test_hub();
        hub.host
            .set_entity(
                EntityState::new("light.kitchen", "on")
                    .with_attribute("brightness", serde_json::json!(200)),
            )
            .await;
        hub.host.set_entity(EntityState::new("switch.fan", "off")).await;
        register(&hub, "kitchen-1").await;

        let list = hub
            .service
            .get_available_devices(Request::new(DeviceListRequest {
                speaker_id: "kitchen-1".into(),
                domains: vec!["light".into()],
            }))
            .await
            .expect("list")
            .into_inner();

        assert_eq!(list.total_count, 1);
        assert_eq!(list.devices.len(), 1);
        let device = &list.devices[0];
        assert_eq!(device.entity_id, "light.kitchen");
        assert!(device
            .supported_commands
            .contains(&"set_brightness".to_string()));
        assert_eq!(device.attributes.get("brightness"), Some(&"200".to_string()));
    }

    #[tokio::test]
    async fn test_keep_alive_unknown_speaker() {
        let hub = test_hub();

        let pong = hub
            .service
            .keep_alive(Request::new(PingRequest {
                speaker_id: "ghost".into(),
            }))
            .await
            .expect("pong")
            .into_inner();

        assert!(!pong.alive);
        assert!(pong.status_message.contains("not registered"));
        assert_eq!(hub.state.registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_keep_alive_known_speaker_reports_uptime() {
        let hub = test_hub();
        register(&hub, "kitchen-1").await;

        let pong = hub
            .service
            .keep_alive(Request::new(PingRequest {
                speaker_id: "kitchen-1".into(),
            }))
            .await
            .expect("pong")
            .into_inner();

        assert!(pong.alive);
        assert!(pong.status_message.contains("uptime"));
        assert!(pong.server_time > 0);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0h 0m 0s");
        assert_eq!(format_uptime(3725), "1h 2m 5s");
        assert_eq!(format_uptime(-5), "0h 0m 0s");
    }
}
