//! Peer connection handles and the connection guard.
//!
//! Every leg of a call (telephony, model, observer) is represented by a
//! [`PeerHandle`]. Writes never touch the socket directly: they are queued on a
//! bounded channel drained by a dedicated writer task, so the orchestrator can
//! send without awaiting I/O. The guard functions in this module are the only
//! way the relay writes to a peer; they silently refuse when the peer is absent
//! or not open.
//!
//! A peer only reaches [`PeerState::Closed`] once its read side has ended or it
//! has been terminated. Readers pull frames through [`next_inbound`], which
//! stops as soon as the peer is closed, so terminating a peer also releases
//! its socket.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Capacity of each peer's outbound queue
pub const OUTBOUND_BUFFER_SIZE: usize = 1024;

/// Default bound on how long a graceful close may take before the peer is
/// terminated.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(5000);

// =============================================================================
// Identity
// =============================================================================

/// The role a peer plays in a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    Telephony,
    Model,
    Observer,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Telephony => write!(f, "telephony"),
            Leg::Model => write!(f, "model"),
            Leg::Observer => write!(f, "observer"),
        }
    }
}

/// Process-unique peer identifier.
///
/// Events carry the id of the peer that produced them; the orchestrator drops
/// events whose id no longer matches the live peer for that leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        PeerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Open => write!(f, "open"),
            PeerState::Closing => write!(f, "closing"),
            PeerState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Transport-level failure on a peer's socket.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    Send(String),

    #[error("Close failed: {0}")]
    Close(String),
}

/// Write half of a peer's socket.
///
/// Implemented for the axum server socket (telephony, observer) and the
/// tungstenite client socket (model).
#[async_trait]
pub trait PeerTransport: Send + 'static {
    /// Write one text frame
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a close frame and shut the write half down
    async fn close(&mut self) -> Result<(), TransportError>;
}

enum Outbound {
    Text(String),
    Close,
}

// =============================================================================
// Peer handle
// =============================================================================

/// Cloneable handle to one peer connection.
#[derive(Clone)]
pub struct PeerHandle {
    id: PeerId,
    leg: Leg,
    outbound: mpsc::Sender<Outbound>,
    state: Arc<watch::Sender<PeerState>>,
    writer: AbortHandle,
}

impl PeerHandle {
    /// Wrap a transport and spawn its writer task.
    pub fn spawn<T: PeerTransport>(leg: Leg, transport: T) -> Self {
        let id = PeerId::next();
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let (state, _) = watch::channel(PeerState::Open);
        let state = Arc::new(state);

        let task = tokio::spawn(run_writer(transport, rx, leg, id));

        debug!(%leg, peer_id = %id, "Peer writer started");

        Self {
            id,
            leg,
            outbound,
            state,
            writer: task.abort_handle(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn leg(&self) -> Leg {
        self.leg
    }

    pub fn state(&self) -> PeerState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == PeerState::Open
    }

    /// Record that the remote side went away.
    ///
    /// Called by the reader when the inbound stream ends. Also stops any
    /// reader waiting in [`next_inbound`].
    pub fn mark_closed(&self) {
        self.state.send_replace(PeerState::Closed);
    }

    /// Wait until the peer reaches [`PeerState::Closed`].
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == PeerState::Closed).await;
    }

    fn enqueue(&self, text: String) -> bool {
        match self.outbound.try_send(Outbound::Text(text)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(leg = %self.leg, peer_id = %self.id, "Outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(leg = %self.leg, peer_id = %self.id, "Writer stopped, dropping frame");
                self.mark_closed();
                false
            }
        }
    }

    fn begin_closing(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == PeerState::Open {
                *state = PeerState::Closing;
                true
            } else {
                false
            }
        })
    }

    fn terminate(&self) {
        self.writer.abort();
        self.mark_closed();
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("leg", &self.leg)
            .field("state", &self.state())
            .finish()
    }
}

// The writer never marks the peer closed: after sending the close frame the
// peer stays Closing until the reader sees the remote close or it is terminated.
async fn run_writer<T: PeerTransport>(
    mut transport: T,
    mut rx: mpsc::Receiver<Outbound>,
    leg: Leg,
    id: PeerId,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Text(text) => {
                if let Err(e) = transport.send_text(text).await {
                    warn!(%leg, peer_id = %id, "Failed to write frame: {}", e);
                }
            }
            Outbound::Close => {
                if let Err(e) = transport.close().await {
                    debug!(%leg, peer_id = %id, "Close handshake failed: {}", e);
                }
                break;
            }
        }
    }

    debug!(%leg, peer_id = %id, "Peer writer stopped");
}

// =============================================================================
// Connection guard
// =============================================================================

/// True when the peer is present and open.
pub fn is_open(peer: Option<&PeerHandle>) -> bool {
    peer.is_some_and(PeerHandle::is_open)
}

/// Serialize `event` and queue it on `peer`.
///
/// Returns `false` without side effects when the peer is absent or not open.
pub fn send<T: Serialize + ?Sized>(peer: Option<&PeerHandle>, event: &T) -> bool {
    let Some(peer) = peer.filter(|p| p.is_open()) else {
        return false;
    };

    match serde_json::to_string(event) {
        Ok(text) => peer.enqueue(text),
        Err(e) => {
            warn!(leg = %peer.leg(), peer_id = %peer.id(), "Failed to serialize frame: {}", e);
            false
        }
    }
}

/// Queue an already-encoded frame on `peer`, verbatim.
pub fn send_text(peer: Option<&PeerHandle>, text: &str) -> bool {
    match peer.filter(|p| p.is_open()) {
        Some(peer) => peer.enqueue(text.to_owned()),
        None => false,
    }
}

/// Next item from a peer's read side, or `None` once the peer is closed.
pub async fn next_inbound<S>(peer: &PeerHandle, stream: &mut S) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    tokio::select! {
        item = stream.next() => item,
        _ = peer.closed() => None,
    }
}

/// Close a peer, waiting up to `timeout` for the remote side to finish the
/// close handshake.
///
/// Frames already queued are flushed before the close frame. The peer is
/// closed once its reader sees the stream end. A peer that does not get there
/// in time is terminated, which stops both the writer and the reader.
pub async fn graceful_close(peer: PeerHandle, timeout: Duration) {
    if peer.state() == PeerState::Closed {
        return;
    }
    peer.begin_closing();

    let closed = tokio::time::timeout(timeout, async {
        let _ = peer.outbound.send(Outbound::Close).await;
        peer.closed().await;
    })
    .await;

    if closed.is_err() {
        warn!(
            leg = %peer.leg(),
            peer_id = %peer.id(),
            "Peer did not close within {:?}, terminating",
            timeout
        );
        peer.terminate();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_peer_ids_are_unique() {
        let a = PeerId::next();
        let b = PeerId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_leg_display() {
        assert_eq!(Leg::Telephony.to_string(), "telephony");
        assert_eq!(Leg::Model.to_string(), "model");
        assert_eq!(Leg::Observer.to_string(), "observer");
    }

    #[tokio::test]
    async fn test_send_to_absent_peer_is_noop() {
        assert!(!is_open(None));
        assert!(!send(None, &json!({"type": "response.create"})));
        assert!(!send_text(None, "{}"));
    }

    #[tokio::test]
    async fn test_send_delivers_in_order() {
        let (peer, mut rx) = channel_peer(Leg::Telephony);
        assert!(is_open(Some(&peer)));

        assert!(send(Some(&peer), &json!({"n": 1})));
        assert!(send_text(Some(&peer), r#"{"n":2}"#));

        assert_eq!(rx.recv().await.unwrap(), r#"{"n":1}"#);
        assert_eq!(rx.recv().await.unwrap(), r#"{"n":2}"#);
    }

    #[tokio::test]
    async fn test_send_refused_after_close() {
        let (peer, _rx) = channel_peer(Leg::Observer);
        graceful_close(peer.clone(), DEFAULT_CLOSE_TIMEOUT).await;

        assert_eq!(peer.state(), PeerState::Closed);
        assert!(!send(Some(&peer), &json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_graceful_close_flushes_queued_frames() {
        let (peer, mut rx) = channel_peer(Leg::Model);
        send_text(Some(&peer), "first");
        send_text(Some(&peer), "second");

        graceful_close(peer.clone(), DEFAULT_CLOSE_TIMEOUT).await;

        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_close_terminates_after_timeout() {
        let (peer, _rx) = hanging_peer(Leg::Telephony);
        let started = tokio::time::Instant::now();

        graceful_close(peer.clone(), Duration::from_millis(5000)).await;

        assert!(started.elapsed() >= Duration::from_millis(5000));
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[tokio::test]
    async fn test_mark_closed_wakes_waiters() {
        let (peer, _rx) = channel_peer(Leg::Telephony);
        let waiter = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.closed().await })
        };

        peer.mark_closed();
        waiter.await.unwrap();
        assert!(!peer.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_close_stops_reader_after_timeout() {
        let (peer, _rx) = silent_peer(Leg::Model);
        let (_remote, mut inbound) = futures::channel::mpsc::unbounded::<String>();

        let reader = {
            let peer = peer.clone();
            tokio::spawn(async move {
                let mut frames = 0;
                while next_inbound(&peer, &mut inbound).await.is_some() {
                    frames += 1;
                }
                frames
            })
        };

        let closing = tokio::spawn(graceful_close(peer.clone(), Duration::from_millis(5000)));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(peer.state(), PeerState::Closing);
        assert!(!reader.is_finished());

        closing.await.unwrap();
        assert_eq!(peer.state(), PeerState::Closed);
        assert_eq!(reader.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_next_inbound_yields_until_stream_ends() {
        let (peer, _rx) = channel_peer(Leg::Observer);
        let mut inbound = futures::stream::iter(vec!["a", "b"]);

        assert_eq!(next_inbound(&peer, &mut inbound).await, Some("a"));
        assert_eq!(next_inbound(&peer, &mut inbound).await, Some("b"));
        assert_eq!(next_inbound(&peer, &mut inbound).await, None);
        assert!(peer.is_open());
    }
}
