//! # TTS Dispatch & Correlation
//!
//! Bridges the hub-side caller (who wants a synchronous yes/no answer) and
//! the push-based TTS stream (the server cannot call the device directly).
//! The generated message id is the only handle tying the two interactions
//! together.
//!
//! ## Correlation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TTS Correlation Flow                             │
//! │                                                                         │
//! │  send_tts("kitchen-1", "hello")                                        │
//! │     │  1. look up the speaker's active queue (none -> false)           │
//! │     │  2. generate message id, park a oneshot slot under it            │
//! │     │  3. enqueue the command onto the stream queue                    │
//! │     │  4. emit "tts_command_sent"                                      │
//! │     └─ 5. await the slot, at most 30s ──────────────┐                  │
//! │                                                     │                  │
//! │  StreamTtsCommands loop ──► device speaks ──► SendTtsResponse          │
//! │                                                     │                  │
//! │                        resolve(message_id) ─────────┘                  │
//! │                        (slot removed, completed exactly once)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reconnects replace a speaker's queue wholesale; commands still sitting in
//! the replaced queue are lost. That is accepted behavior: the device just
//! re-opened its stream and whatever was queued predates the reconnect.
//! Queue cleanup is identity-guarded so a stale stream loop can never
//! delete its successor's registration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use chorus_core::events::EVENT_TTS_COMMAND_SENT;
use chorus_core::{tts_message_id, TtsCommand, TtsOutcome};

use crate::error::{HubError, HubResult};
use crate::ports::EventBus;

/// How long `send` waits for the device's acknowledgement.
pub const TTS_ACK_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// TTS Options
// =============================================================================

/// Optional delivery parameters for one TTS command.
#[derive(Debug, Clone)]
pub struct TtsOptions {
    pub language: String,
    pub voice: String,
    pub volume: i32,
    pub priority: bool,
}

impl Default for TtsOptions {
    fn default() -> Self {
        TtsOptions {
            language: "ru".to_string(),
            voice: "default".to_string(),
            volume: 80,
            priority: false,
        }
    }
}

// =============================================================================
// TTS Dispatcher
// =============================================================================

/// Per-speaker TTS queues plus the pending-acknowledgement table.
/// Clones share the inner state.
#[derive(Clone)]
pub struct TtsDispatcher {
    inner: Arc<DispatchInner>,
}

struct DispatchInner {
    /// The single active queue per speaker_id. Replaced on reconnect.
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<TtsCommand>>>,
    /// In-flight commands awaiting acknowledgement, keyed by message id.
    pending: Mutex<HashMap<String, oneshot::Sender<TtsOutcome>>>,
    /// Host event bus.
    bus: Arc<dyn EventBus>,
}

impl TtsDispatcher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        TtsDispatcher {
            inner: Arc::new(DispatchInner {
                queues: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                bus,
            }),
        }
    }

    /// Creates a fresh queue and registers it as *the* queue for this
    /// speaker, replacing any prior one. Returns the sender (for the
    /// identity-guarded release) and the receiver the stream loop drains.
    pub fn register_queue(
        &self,
        speaker_id: &str,
    ) -> (
        mpsc::UnboundedSender<TtsCommand>,
        mpsc::UnboundedReceiver<TtsCommand>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let replaced = self
            .inner
            .queues
            .lock()
            .expect("queue table poisoned")
            .insert(speaker_id.to_string(), tx.clone());

        if replaced.is_some() {
            info!(%speaker_id, "TTS queue replaced by reconnect");
        } else {
            debug!(%speaker_id, "TTS queue registered");
        }

        (tx, rx)
    }

    /// Removes the speaker's queue registration, but only if it is still
    /// the exact queue the caller owns. A stream loop that lost a reconnect
    /// race must not delete its successor's queue.
    pub fn release_queue(&self, speaker_id: &str, queue: &mpsc::UnboundedSender<TtsCommand>) {
        let mut queues = self.inner.queues.lock().expect("queue table poisoned");
        match queues.get(speaker_id) {
            Some(current) if current.same_channel(queue) => {
                queues.remove(speaker_id);
                debug!(%speaker_id, "TTS queue released");
            }
            Some(_) => {
                debug!(%speaker_id, "TTS queue already replaced, leaving successor in place");
            }
            None => {}
        }
    }

    /// Unconditionally drops the speaker's queue registration (eviction path).
    pub fn drop_queue(&self, speaker_id: &str) {
        self.inner
            .queues
            .lock()
            .expect("queue table poisoned")
            .remove(speaker_id);
    }

    /// Whether a live queue is registered for this speaker.
    pub fn has_queue(&self, speaker_id: &str) -> bool {
        self.inner
            .queues
            .lock()
            .expect("queue table poisoned")
            .contains_key(speaker_id)
    }

    /// Number of in-flight commands awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().expect("pending table poisoned").len()
    }

    /// Sends a TTS command to a speaker and waits for its acknowledgement.
    ///
    /// Returns the device-reported success flag. Delivery failures (no
    /// active stream, queue closed mid-send, no acknowledgement within
    /// [`TTS_ACK_TIMEOUT`]) are logged and reported as `false`.
    pub async fn send(&self, speaker_id: &str, text: &str, options: TtsOptions) -> bool {
        match self.try_send(speaker_id, text, options).await {
            Ok(outcome) => {
                if !outcome.success {
                    warn!(%speaker_id, message = %outcome.message, "Speaker reported TTS failure");
                }
                outcome.success
            }
            Err(HubError::AckTimeout(secs)) => {
                warn!(%speaker_id, secs, "Timed out waiting for TTS acknowledgement");
                false
            }
            Err(e) => {
                error!(%speaker_id, error = %e, "TTS command not delivered");
                false
            }
        }
    }

    /// Delivery itself; cleanup of stale registrations and pending slots
    /// happens here so `send` only has to translate errors.
    async fn try_send(
        &self,
        speaker_id: &str,
        text: &str,
        options: TtsOptions,
    ) -> HubResult<TtsOutcome> {
        let queue = self
            .inner
            .queues
            .lock()
            .expect("queue table poisoned")
            .get(speaker_id)
            .cloned()
            .ok_or_else(|| HubError::NoActiveStream(speaker_id.to_string()))?;

        let now = Utc::now();
        let message_id = tts_message_id(now.timestamp());

        let (slot_tx, slot_rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending table poisoned")
            .insert(message_id.clone(), slot_tx);

        let command = TtsCommand {
            speaker_id: speaker_id.to_string(),
            text: text.to_string(),
            language: options.language.clone(),
            voice: options.voice.clone(),
            volume: options.volume,
            priority: options.priority,
            message_id: message_id.clone(),
            timestamp_ms: now.timestamp_millis(),
        };
        let timestamp_ms = command.timestamp_ms;

        if queue.send(command).is_err() {
            // The stream loop is gone. Remove the stale registration unless
            // a reconnect already installed a successor.
            {
                let mut queues = self.inner.queues.lock().expect("queue table poisoned");
                if queues
                    .get(speaker_id)
                    .is_some_and(|current| current.same_channel(&queue))
                {
                    queues.remove(speaker_id);
                }
            }
            self.inner
                .pending
                .lock()
                .expect("pending table poisoned")
                .remove(&message_id);

            return Err(HubError::QueueClosed(speaker_id.to_string()));
        }

        self.inner.bus.emit(
            EVENT_TTS_COMMAND_SENT,
            serde_json::json!({
                "speaker_id": speaker_id,
                "text": text,
                "language": options.language,
                "volume": options.volume,
                "message_id": message_id,
                "timestamp": timestamp_ms,
            }),
        );

        info!(%speaker_id, %message_id, "TTS command enqueued");

        match timeout(TTS_ACK_TIMEOUT, slot_rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            // Slot sender vanished without resolving; nothing left to clean.
            Ok(Err(_)) => Err(HubError::QueueClosed(speaker_id.to_string())),
            Err(_) => {
                self.inner
                    .pending
                    .lock()
                    .expect("pending table poisoned")
                    .remove(&message_id);
                Err(HubError::AckTimeout(TTS_ACK_TIMEOUT.as_secs()))
            }
        }
    }

    /// Resolves the pending slot for a message id, if one exists. The slot
    /// is removed before completion, so a second resolution for the same id
    /// is a no-op returning `false`.
    pub fn resolve(&self, message_id: &str, outcome: TtsOutcome) -> bool {
        let slot = self
            .inner
            .pending
            .lock()
            .expect("pending table poisoned")
            .remove(message_id);

        match slot {
            Some(slot) => {
                // The waiter may have timed out between removal and now;
                // a failed send just means nobody is listening anymore.
                let _ = slot.send(outcome);
                true
            }
            None => {
                debug!(%message_id, "No pending TTS request for response");
                false
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{NoOpEventBus, RecordingEventBus};

    fn dispatcher() -> TtsDispatcher {
        TtsDispatcher::new(Arc::new(NoOpEventBus))
    }

    #[tokio::test]
    async fn test_send_without_stream_fails_fast() {
        let dispatcher = dispatcher();
        assert!(!dispatcher.send("kitchen-1", "hello", TtsOptions::default()).await);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_round_trip_resolves_success() {
        let dispatcher = dispatcher();
        let (_tx, mut rx) = dispatcher.register_queue("kitchen-1");

        let responder = dispatcher.clone();
        let consumer = tokio::spawn(async move {
            let command = rx.recv().await.expect("command delivered");
            assert_eq!(command.text, "hello");
            assert_eq!(command.volume, 50);
            assert!(!command.message_id.is_empty());
            responder.resolve(
                &command.message_id,
                TtsOutcome {
                    success: true,
                    message: "spoken".into(),
                },
            );
        });

        let options = TtsOptions {
            volume: 50,
            ..Default::default()
        };
        assert!(dispatcher.send("kitchen-1", "hello", options).await);
        assert_eq!(dispatcher.pending_count(), 0);
        consumer.await.expect("consumer task");
    }

    #[tokio::test]
    async fn test_device_reported_failure_propagates() {
        let dispatcher = dispatcher();
        let (_tx, mut rx) = dispatcher.register_queue("kitchen-1");

        let responder = dispatcher.clone();
        tokio::spawn(async move {
            let command = rx.recv().await.expect("command delivered");
            responder.resolve(
                &command.message_id,
                TtsOutcome {
                    success: false,
                    message: "busy".into(),
                },
            );
        });

        assert!(!dispatcher.send("kitchen-1", "hello", TtsOptions::default()).await);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_pending_entry() {
        let dispatcher = dispatcher();
        // Queue exists but nobody ever replies.
        let (_tx, _rx) = dispatcher.register_queue("kitchen-1");

        assert!(!dispatcher.send("kitchen-1", "hello", TtsOptions::default()).await);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_removes_stale_registration() {
        let dispatcher = dispatcher();
        let (_tx, rx) = dispatcher.register_queue("kitchen-1");
        drop(rx);

        assert!(!dispatcher.send("kitchen-1", "hello", TtsOptions::default()).await);
        assert!(!dispatcher.has_queue("kitchen-1"));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_race_keeps_successor_queue() {
        let dispatcher = dispatcher();

        // Old stream loop's queue...
        let (old_tx, old_rx) = dispatcher.register_queue("kitchen-1");
        // ...replaced by a reconnect before the old loop finished draining.
        let (_new_tx, mut new_rx) = dispatcher.register_queue("kitchen-1");

        // The old loop exits and runs its cleanup; the guard must leave the
        // successor's registration alone.
        drop(old_rx);
        dispatcher.release_queue("kitchen-1", &old_tx);
        assert!(dispatcher.has_queue("kitchen-1"));

        let responder = dispatcher.clone();
        tokio::spawn(async move {
            let command = new_rx.recv().await.expect("command on new queue");
            responder.resolve(
                &command.message_id,
                TtsOutcome {
                    success: true,
                    message: String::new(),
                },
            );
        });

        assert!(dispatcher.send("kitchen-1", "still here", TtsOptions::default()).await);
    }

    #[tokio::test]
    async fn test_double_resolve_is_noop() {
        let dispatcher = dispatcher();
        let (_tx, mut rx) = dispatcher.register_queue("kitchen-1");

        let sender = dispatcher.clone();
        let send_task = tokio::spawn(async move {
            sender.send("kitchen-1", "hello", TtsOptions::default()).await
        });

        let command = rx.recv().await.expect("command delivered");
        let outcome = TtsOutcome {
            success: true,
            message: String::new(),
        };
        assert!(dispatcher.resolve(&command.message_id, outcome.clone()));
        assert!(!dispatcher.resolve(&command.message_id, outcome));

        assert!(send_task.await.expect("send task"));
    }

    #[tokio::test]
    async fn test_send_emits_command_sent_event() {
        let bus = Arc::new(RecordingEventBus::new());
        let dispatcher = TtsDispatcher::new(bus.clone());
        let (_tx, mut rx) = dispatcher.register_queue("kitchen-1");

        let responder = dispatcher.clone();
        tokio::spawn(async move {
            let command = rx.recv().await.expect("command delivered");
            responder.resolve(
                &command.message_id,
                TtsOutcome {
                    success: true,
                    message: String::new(),
                },
            );
        });

        dispatcher.send("kitchen-1", "hello", TtsOptions::default()).await;

        let events = bus.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "tts_command_sent");
        assert_eq!(events[0].1["speaker_id"], "kitchen-1");
        assert_eq!(events[0].1["text"], "hello");
    }
}
