//! Per-call state owned by the orchestrator.

use std::fmt;

use serde_json::Value;
use tokio::task::AbortHandle;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::connection::{PeerHandle, PeerId};

// =============================================================================
// Credential
// =============================================================================

/// Model API key. Zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// =============================================================================
// Playback tracking
// =============================================================================

/// Assistant item currently being played to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUtterance {
    pub item_id: String,
    /// Media offset at which the first chunk of this item was relayed
    pub playback_start_ms: u64,
}

/// Truncation to apply after caller barge-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub item_id: String,
    pub audio_end_ms: u64,
}

/// Tracks how much assistant audio the caller has heard.
///
/// The active item id and its start offset are held together, so either both
/// are known or neither is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackTracker {
    latest_media_ms: u64,
    active: Option<ActiveUtterance>,
}

impl PlaybackTracker {
    /// Record the offset of the latest caller audio chunk.
    pub fn record_media(&mut self, timestamp_ms: u64) {
        self.latest_media_ms = timestamp_ms;
    }

    /// Record an assistant audio chunk being relayed to the caller.
    ///
    /// The first chunk of an utterance fixes its start offset. Later chunks
    /// update the item id.
    pub fn record_audio_delta(&mut self, item_id: Option<&str>) {
        let Some(item_id) = item_id else {
            return;
        };

        if let Some(active) = self.active.as_mut() {
            if active.item_id != item_id {
                active.item_id = item_id.to_string();
            }
            return;
        }

        self.active = Some(ActiveUtterance {
            item_id: item_id.to_string(),
            playback_start_ms: self.latest_media_ms,
        });
    }

    /// End the active utterance and report where the caller cut it off.
    ///
    /// Returns `None` when nothing is playing.
    pub fn truncate(&mut self) -> Option<Truncation> {
        let active = self.active.take()?;
        Some(Truncation {
            audio_end_ms: self.latest_media_ms.saturating_sub(active.playback_start_ms),
            item_id: active.item_id,
        })
    }

    pub fn latest_media_ms(&self) -> u64 {
        self.latest_media_ms
    }

    pub fn active(&self) -> Option<&ActiveUtterance> {
        self.active.as_ref()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// Session
// =============================================================================

/// State of the model leg.
#[derive(Debug, Default)]
pub enum ModelLink {
    #[default]
    Absent,
    /// Connect in flight; `attempt` identifies it
    Connecting { attempt: u64 },
    Open(PeerHandle),
}

impl ModelLink {
    pub fn peer(&self) -> Option<&PeerHandle> {
        match self {
            ModelLink::Open(peer) => Some(peer),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ModelLink::Absent)
    }
}

#[derive(Debug)]
pub(crate) struct PendingReconnect {
    pub(crate) generation: u64,
    pub(crate) timer: AbortHandle,
}

/// The single live call.
///
/// All fields are mutated only by the orchestrator task.
#[derive(Debug, Default)]
pub struct Session {
    pub(crate) call_id: Option<Uuid>,
    pub(crate) telephony: Option<PeerHandle>,
    pub(crate) observer: Option<PeerHandle>,
    pub(crate) model: ModelLink,
    pub(crate) stream_id: Option<String>,
    pub(crate) credential: Option<Credential>,
    pub(crate) saved_config: Option<Value>,
    pub(crate) playback: PlaybackTracker,
    pub(crate) reconnect_attempts: u32,
    pub(crate) pending_reconnect: Option<PendingReconnect>,
}

impl Session {
    pub fn call_id(&self) -> Option<Uuid> {
        self.call_id
    }

    pub fn telephony(&self) -> Option<&PeerHandle> {
        self.telephony.as_ref()
    }

    pub fn observer(&self) -> Option<&PeerHandle> {
        self.observer.as_ref()
    }

    pub fn model(&self) -> Option<&PeerHandle> {
        self.model.peer()
    }

    pub fn model_link(&self) -> &ModelLink {
        &self.model
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn saved_config(&self) -> Option<&Value> {
        self.saved_config.as_ref()
    }

    pub fn playback(&self) -> &PlaybackTracker {
        &self.playback
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    /// True when any leg is present or connecting.
    pub fn has_legs(&self) -> bool {
        self.telephony.is_some() || self.observer.is_some() || !self.model.is_absent()
    }

    /// The current model peer if `id` matches it.
    pub(crate) fn model_if(&self, id: PeerId) -> Option<&PeerHandle> {
        self.model.peer().filter(|p| p.id() == id)
    }

    pub(crate) fn telephony_is(&self, id: PeerId) -> bool {
        self.telephony.as_ref().is_some_and(|p| p.id() == id)
    }

    pub(crate) fn observer_is(&self, id: PeerId) -> bool {
        self.observer.as_ref().is_some_and(|p| p.id() == id)
    }

    pub(crate) fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.pending_reconnect.take() {
            pending.timer.abort();
        }
    }

    /// Start a new call on `telephony`.
    pub(crate) fn begin_call(&mut self, telephony: PeerHandle, credential: Credential) -> Uuid {
        let call_id = Uuid::new_v4();
        self.call_id = Some(call_id);
        self.telephony = Some(telephony);
        self.credential = Some(credential);
        call_id
    }

    /// Drop the call state, keeping the observer and saved configuration.
    ///
    /// Returns the telephony and model peers that must be closed.
    pub(crate) fn end_call(&mut self) -> Vec<PeerHandle> {
        self.cancel_reconnect();
        let peers = self
            .telephony
            .take()
            .into_iter()
            .chain(match std::mem::take(&mut self.model) {
                ModelLink::Open(peer) => Some(peer),
                _ => None,
            })
            .collect();

        self.call_id = None;
        self.stream_id = None;
        self.credential = None;
        self.playback.reset();
        self.reconnect_attempts = 0;
        peers
    }

    /// Drop everything. Returns every peer that must be closed.
    pub(crate) fn reset(&mut self) -> Vec<PeerHandle> {
        let mut peers = self.end_call();
        peers.extend(self.observer.take());
        *self = Session::default();
        peers
    }
}
