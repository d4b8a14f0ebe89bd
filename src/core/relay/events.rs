use tokio::sync::{broadcast, mpsc};

use crate::core::connection::{Leg, PeerHandle, PeerId};
use crate::core::relay::session::Credential;
use crate::errors::relay_error::{RelayError, RelayResult};

/// Capacity of the orchestrator's inbound event queue
pub const EVENT_BUFFER_SIZE: usize = 1024;

/// Capacity of the notification broadcast channel
pub const NOTIFICATION_BUFFER_SIZE: usize = 256;

/// Input to the orchestrator.
///
/// Socket readers and timers never touch the session; they post one of these
/// and the orchestrator applies it in arrival order.
#[derive(Debug)]
pub enum RelayEvent {
    /// A telephony connection was accepted
    TelephonyConnected {
        peer: PeerHandle,
        credential: Credential,
    },

    /// An observer connection was accepted
    ObserverConnected { peer: PeerHandle },

    /// A text frame arrived on a leg
    Frame {
        leg: Leg,
        peer_id: PeerId,
        text: String,
    },

    /// A leg's inbound stream ended
    Disconnected {
        leg: Leg,
        peer_id: PeerId,
        reason: Option<String>,
    },

    /// A model connect attempt completed
    ModelOpened { attempt: u64, peer: PeerHandle },

    /// A model connect attempt failed
    ModelConnectFailed { attempt: u64, error: String },

    /// A scheduled reconnect timer fired
    ReconnectDue { generation: u64 },
}

/// Observable state changes, broadcast to any subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayNotification {
    LegConnected {
        leg: Leg,
        peer_id: PeerId,
    },
    LegDisconnected {
        leg: Leg,
        peer_id: PeerId,
    },
    SessionStarted {
        stream_id: String,
    },
    ModelConnected {
        peer_id: PeerId,
    },
    ModelReconnectScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    ModelAbandoned {
        attempts: u32,
    },
    Truncated {
        item_id: String,
        audio_end_ms: u64,
    },
    FunctionCallCompleted {
        name: String,
        call_id: String,
    },
    FrameDiscarded {
        leg: Leg,
        reason: String,
    },
    SessionReset,
}

/// Sending side of the orchestrator, shared by socket handlers.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    events: mpsc::Sender<RelayEvent>,
    notifications: broadcast::Sender<RelayNotification>,
}

impl RelayHandle {
    pub(crate) fn new(
        events: mpsc::Sender<RelayEvent>,
        notifications: broadcast::Sender<RelayNotification>,
    ) -> Self {
        Self {
            events,
            notifications,
        }
    }

    pub async fn connect_telephony(
        &self,
        peer: PeerHandle,
        credential: Credential,
    ) -> RelayResult<()> {
        self.post(RelayEvent::TelephonyConnected { peer, credential })
            .await
    }

    pub async fn connect_observer(&self, peer: PeerHandle) -> RelayResult<()> {
        self.post(RelayEvent::ObserverConnected { peer }).await
    }

    pub async fn frame(&self, leg: Leg, peer_id: PeerId, text: String) -> RelayResult<()> {
        self.post(RelayEvent::Frame { leg, peer_id, text }).await
    }

    pub async fn disconnected(
        &self,
        leg: Leg,
        peer_id: PeerId,
        reason: Option<String>,
    ) -> RelayResult<()> {
        self.post(RelayEvent::Disconnected {
            leg,
            peer_id,
            reason,
        })
        .await
    }

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayNotification> {
        self.notifications.subscribe()
    }

    pub(crate) async fn post(&self, event: RelayEvent) -> RelayResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| RelayError::ChannelClosed)
    }

    pub(crate) fn notify(&self, notification: RelayNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }
}
