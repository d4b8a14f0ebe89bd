//! The relay event loop.
//!
//! One task owns the [`Session`] and applies [`RelayEvent`]s strictly in
//! arrival order. Socket readers, the model connect task and reconnect timers
//! only post events; writes go out through the connection guard.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::{
    EVENT_BUFFER_SIZE, NOTIFICATION_BUFFER_SIZE, RelayEvent, RelayHandle, RelayNotification,
};
use super::reconnect::ReconnectPolicy;
use super::session::{Credential, ModelLink, PendingReconnect, Session};
use crate::core::connection::{self as guard, DEFAULT_CLOSE_TIMEOUT, Leg, PeerHandle, PeerId};
use crate::core::functions::FunctionRegistry;
use crate::core::realtime::{
    ClientEvent, FunctionCall, ModelConnection, ModelConnector, ServerEvent,
    decode_observer_command, decode_server_event, merge_session_config,
};
use crate::core::telephony::{TelephonyEvent, TelephonyOutbound, decode_telephony_event};

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub reconnect: ReconnectPolicy,
    /// Bound on each graceful peer close
    pub close_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

pub struct RelayOrchestrator {
    session: Session,
    functions: Arc<FunctionRegistry>,
    connector: Arc<dyn ModelConnector>,
    settings: RelaySettings,
    handle: RelayHandle,
    events: mpsc::Receiver<RelayEvent>,
    next_attempt: u64,
    next_generation: u64,
}

impl RelayOrchestrator {
    pub fn new(
        functions: Arc<FunctionRegistry>,
        connector: Arc<dyn ModelConnector>,
        settings: RelaySettings,
    ) -> (Self, RelayHandle) {
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER_SIZE);
        let handle = RelayHandle::new(events_tx, notifications);

        let orchestrator = Self {
            session: Session::default(),
            functions,
            connector,
            settings,
            handle: handle.clone(),
            events,
            next_attempt: 0,
            next_generation: 0,
        };

        (orchestrator, handle)
    }

    /// Run the event loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("Relay event loop started");
        while self.process_next().await {}
        info!("Relay event loop stopped");
    }

    /// Wait for the next event and apply it. Returns `false` once the event
    /// queue is closed.
    pub async fn process_next(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayNotification> {
        self.handle.subscribe()
    }

    pub async fn handle_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::TelephonyConnected { peer, credential } => {
                self.on_telephony_connected(peer, credential)
            }
            RelayEvent::ObserverConnected { peer } => self.on_observer_connected(peer),
            RelayEvent::Frame { leg, peer_id, text } => match leg {
                Leg::Telephony => self.on_telephony_frame(peer_id, &text),
                Leg::Model => self.on_model_frame(peer_id, text).await,
                Leg::Observer => self.on_observer_frame(peer_id, &text),
            },
            RelayEvent::Disconnected {
                leg,
                peer_id,
                reason,
            } => self.on_disconnected(leg, peer_id, reason),
            RelayEvent::ModelOpened { attempt, peer } => self.on_model_opened(attempt, peer),
            RelayEvent::ModelConnectFailed { attempt, error } => {
                self.on_model_connect_failed(attempt, error)
            }
            RelayEvent::ReconnectDue { generation } => self.on_reconnect_due(generation),
        }
    }

    // =========================================================================
    // Telephony
    // =========================================================================

    fn on_telephony_connected(&mut self, peer: PeerHandle, credential: Credential) {
        if self.session.telephony.is_some() || !self.session.model.is_absent() {
            info!(call_id = ?self.session.call_id, "Superseding active call");
            let peers = self.session.end_call();
            self.close_detached(peers);
        }

        let peer_id = peer.id();
        let call_id = self.session.begin_call(peer, credential);
        info!(%call_id, %peer_id, "Telephony connected");
        self.handle.notify(RelayNotification::LegConnected {
            leg: Leg::Telephony,
            peer_id,
        });
    }

    fn on_telephony_frame(&mut self, peer_id: PeerId, text: &str) {
        if !self.session.telephony_is(peer_id) {
            debug!(%peer_id, "Ignoring frame from stale telephony peer");
            return;
        }

        let event = match decode_telephony_event(text) {
            Ok(event) => event,
            Err(e) => {
                self.discard(Leg::Telephony, e.to_string());
                return;
            }
        };

        match event {
            TelephonyEvent::Start { stream_sid } => {
                info!(%stream_sid, "Media stream started");
                self.session.stream_id = Some(stream_sid.clone());
                self.session.playback.reset();
                self.handle.notify(RelayNotification::SessionStarted {
                    stream_id: stream_sid,
                });
                self.try_connect_model();
            }
            TelephonyEvent::Media {
                timestamp_ms,
                payload,
            } => {
                self.session.playback.record_media(timestamp_ms);
                guard::send(
                    self.session.model(),
                    &ClientEvent::InputAudioBufferAppend { audio: payload },
                );
            }
            TelephonyEvent::Close => {
                info!("Caller hung up");
                self.close_all();
            }
            TelephonyEvent::Ignored { event } => {
                debug!(%event, "Ignoring telephony event");
            }
        }
    }

    // =========================================================================
    // Model
    // =========================================================================

    fn try_connect_model(&mut self) {
        if !self.session.model.is_absent() {
            debug!("Model leg already present");
            return;
        }
        if !guard::is_open(self.session.telephony()) || self.session.stream_id.is_none() {
            debug!("No active media stream, not connecting model");
            return;
        }
        let Some(credential) = self.session.credential.clone().filter(|c| !c.is_empty()) else {
            warn!("No model credential available, not connecting model");
            return;
        };

        self.session.cancel_reconnect();
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.session.model = ModelLink::Connecting { attempt };

        debug!(attempt, "Connecting to model");
        tokio::spawn(connect_model(
            self.connector.clone(),
            credential,
            attempt,
            self.handle.clone(),
        ));
    }

    fn on_model_opened(&mut self, attempt: u64, peer: PeerHandle) {
        match &self.session.model {
            ModelLink::Connecting { attempt: current } if *current == attempt => {}
            _ => {
                debug!(attempt, peer_id = %peer.id(), "Closing model leg opened for a superseded attempt");
                self.close_detached(vec![peer]);
                return;
            }
        }

        let peer_id = peer.id();
        self.session.reconnect_attempts = 0;

        let config = merge_session_config(self.session.saved_config.as_ref());
        guard::send(Some(&peer), &ClientEvent::SessionUpdate { session: config });
        self.session.model = ModelLink::Open(peer);

        info!(%peer_id, "Model leg open");
        self.handle
            .notify(RelayNotification::ModelConnected { peer_id });
    }

    fn on_model_connect_failed(&mut self, attempt: u64, error: String) {
        if !matches!(self.session.model, ModelLink::Connecting { attempt: current } if current == attempt)
        {
            debug!(attempt, "Ignoring failure of superseded model connect");
            return;
        }

        warn!(attempt, "Model connection failed: {}", error);
        self.on_model_lost();
    }

    async fn on_model_frame(&mut self, peer_id: PeerId, text: String) {
        if self.session.model_if(peer_id).is_none() {
            debug!(%peer_id, "Ignoring frame from stale model peer");
            return;
        }

        let event = match decode_server_event(&text) {
            Ok(event) => event,
            Err(e) => {
                self.discard(Leg::Model, e.to_string());
                return;
            }
        };

        guard::send_text(self.session.observer(), &text);

        match event {
            ServerEvent::SpeechStarted { .. } => self.truncate(),
            ServerEvent::AudioDelta { item_id, delta, .. } => {
                self.relay_audio(item_id.as_deref(), delta)
            }
            ServerEvent::OutputItemDone { item, .. } => match item.function_call() {
                Some(call) => self.run_function_call(call).await,
                None if item.item_type == "function_call" => {
                    warn!("Function call item without call_id or name, ignoring");
                }
                None => {}
            },
            ServerEvent::Error { error } => {
                warn!(
                    code = ?error.code,
                    "Model reported error: {}",
                    error.message.as_deref().unwrap_or("unknown")
                );
            }
            ServerEvent::Unrecognized { event_type, reason } => {
                warn!(%event_type, "Unexpected model event shape: {}", reason);
            }
            ServerEvent::Other => {}
        }
    }

    fn relay_audio(&mut self, item_id: Option<&str>, delta: String) {
        let Some(stream_sid) = self.session.stream_id.clone() else {
            return;
        };
        if !guard::is_open(self.session.telephony()) {
            return;
        }

        self.session.playback.record_audio_delta(item_id);

        let telephony = self.session.telephony();
        guard::send(telephony, &TelephonyOutbound::media(&stream_sid, delta));
        guard::send(telephony, &TelephonyOutbound::mark(&stream_sid));
    }

    fn truncate(&mut self) {
        let Some(truncation) = self.session.playback.truncate() else {
            return;
        };

        debug!(
            item_id = %truncation.item_id,
            audio_end_ms = truncation.audio_end_ms,
            "Caller interrupted playback"
        );

        guard::send(
            self.session.model(),
            &ClientEvent::ConversationItemTruncate {
                item_id: truncation.item_id.clone(),
                content_index: 0,
                audio_end_ms: truncation.audio_end_ms,
            },
        );
        if let Some(stream_sid) = self.session.stream_id.as_deref() {
            guard::send(self.session.telephony(), &TelephonyOutbound::clear(stream_sid));
        }

        self.handle.notify(RelayNotification::Truncated {
            item_id: truncation.item_id,
            audio_end_ms: truncation.audio_end_ms,
        });
    }

    async fn run_function_call(&mut self, call: FunctionCall) {
        info!(function = %call.name, call_id = %call.call_id, "Model requested function call");

        let output = self.functions.dispatch(&call.name, &call.arguments).await;

        let Some(model) = self.session.model() else {
            debug!(function = %call.name, "Model leg gone, discarding function output");
            return;
        };
        guard::send(
            Some(model),
            &ClientEvent::function_call_output(call.call_id.clone(), output),
        );
        guard::send(Some(model), &ClientEvent::ResponseCreate);

        self.handle
            .notify(RelayNotification::FunctionCallCompleted {
                name: call.name,
                call_id: call.call_id,
            });
    }

    /// The model leg closed or failed to open.
    fn on_model_lost(&mut self) {
        self.session.model = ModelLink::Absent;

        let call_active = guard::is_open(self.session.telephony())
            && self.session.stream_id.is_some()
            && self.session.credential.is_some();
        if !call_active {
            debug!("Model leg lost with no active call");
            self.maybe_reset();
            return;
        }

        let attempts = self.session.reconnect_attempts;
        let policy = &self.settings.reconnect;
        if policy.should_retry(attempts) {
            let delay = policy.delay_for(attempts);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            self.session.reconnect_attempts = attempts + 1;
            self.schedule_reconnect(delay);

            warn!(
                attempt = attempts + 1,
                delay_ms, "Model leg lost, scheduling reconnect"
            );
            self.handle
                .notify(RelayNotification::ModelReconnectScheduled {
                    attempt: attempts + 1,
                    delay_ms,
                });
        } else {
            error!(attempts, "Model leg lost, reconnect attempts exhausted");
            self.handle
                .notify(RelayNotification::ModelAbandoned { attempts });
            self.maybe_reset();
        }
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.session.cancel_reconnect();
        self.next_generation += 1;
        let generation = self.next_generation;

        let handle = self.handle.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.post(RelayEvent::ReconnectDue { generation }).await;
        });

        self.session.pending_reconnect = Some(PendingReconnect {
            generation,
            timer: timer.abort_handle(),
        });
    }

    fn on_reconnect_due(&mut self, generation: u64) {
        let pending = self.session.pending_reconnect.as_ref().map(|p| p.generation);
        if pending != Some(generation) {
            debug!(generation, "Ignoring cancelled reconnect timer");
            return;
        }
        self.session.pending_reconnect = None;

        info!(
            attempt = self.session.reconnect_attempts,
            "Reconnecting to model"
        );
        self.try_connect_model();
    }

    // =========================================================================
    // Observer
    // =========================================================================

    fn on_observer_connected(&mut self, peer: PeerHandle) {
        let peer_id = peer.id();
        if let Some(previous) = self.session.observer.replace(peer) {
            info!(previous = %previous.id(), "Replacing observer");
            self.close_detached(vec![previous]);
        }

        info!(%peer_id, "Observer connected");
        self.handle.notify(RelayNotification::LegConnected {
            leg: Leg::Observer,
            peer_id,
        });
    }

    fn on_observer_frame(&mut self, peer_id: PeerId, text: &str) {
        if !self.session.observer_is(peer_id) {
            debug!(%peer_id, "Ignoring frame from stale observer");
            return;
        }

        let command = match decode_observer_command(text) {
            Ok(command) => command,
            Err(e) => {
                self.discard(Leg::Observer, e.to_string());
                return;
            }
        };

        guard::send_text(self.session.model(), text);

        if let Some(session) = command.session_update {
            debug!("Saved session configuration updated");
            self.session.saved_config = Some(session);
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    fn on_disconnected(&mut self, leg: Leg, peer_id: PeerId, reason: Option<String>) {
        match leg {
            Leg::Telephony => {
                if !self.session.telephony_is(peer_id) {
                    return;
                }
                info!(%peer_id, reason = ?reason, "Telephony disconnected");
                let peers = self.session.end_call();
                self.close_detached(peers);
            }
            Leg::Observer => {
                if !self.session.observer_is(peer_id) {
                    return;
                }
                info!(%peer_id, reason = ?reason, "Observer disconnected");
                self.session.observer = None;
            }
            Leg::Model => {
                if self.session.model_if(peer_id).is_none() {
                    return;
                }
                warn!(%peer_id, reason = ?reason, "Model disconnected");
                self.handle
                    .notify(RelayNotification::LegDisconnected { leg, peer_id });
                self.on_model_lost();
                return;
            }
        }

        self.handle
            .notify(RelayNotification::LegDisconnected { leg, peer_id });
        self.maybe_reset();
    }

    /// Close every leg and clear the session.
    fn close_all(&mut self) {
        let peers = self.session.reset();
        self.close_detached(peers);
        info!("Session reset");
        self.handle.notify(RelayNotification::SessionReset);
    }

    /// Clear the session once no leg remains.
    fn maybe_reset(&mut self) {
        if !self.session.has_legs() {
            self.close_all();
        }
    }

    fn close_detached(&self, peers: Vec<PeerHandle>) {
        for peer in peers {
            debug!(leg = %peer.leg(), peer_id = %peer.id(), "Closing peer");
            tokio::spawn(guard::graceful_close(peer, self.settings.close_timeout));
        }
    }

    fn discard(&self, leg: Leg, reason: String) {
        warn!(%leg, "Discarding malformed frame: {}", reason);
        self.handle
            .notify(RelayNotification::FrameDiscarded { leg, reason });
    }
}

/// Open a model leg and pump its frames into the event loop.
async fn connect_model(
    connector: Arc<dyn ModelConnector>,
    credential: Credential,
    attempt: u64,
    relay: RelayHandle,
) {
    let ModelConnection { peer, mut inbound } = match connector.connect(&credential).await {
        Ok(connection) => connection,
        Err(e) => {
            let _ = relay
                .post(RelayEvent::ModelConnectFailed {
                    attempt,
                    error: e.to_string(),
                })
                .await;
            return;
        }
    };

    let peer_id = peer.id();
    if relay
        .post(RelayEvent::ModelOpened {
            attempt,
            peer: peer.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    let mut reason = None;
    while let Some(frame) = guard::next_inbound(&peer, &mut inbound).await {
        match frame {
            Ok(text) => {
                if relay.frame(Leg::Model, peer_id, text).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                reason = Some(e.to_string());
                break;
            }
        }
    }

    peer.mark_closed();
    let _ = relay.disconnected(Leg::Model, peer_id, reason).await;
}
