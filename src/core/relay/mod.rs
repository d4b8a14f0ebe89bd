//! Call orchestration.
//!
//! A call has up to three legs: the telephony media stream, the realtime
//! model, and an optional observer. [`RelayOrchestrator`] owns the single
//! [`Session`] and is the only code that mutates it; everything else talks to
//! it through a [`RelayHandle`].

pub mod events;
pub mod orchestrator;
pub mod reconnect;
pub mod session;

pub use events::{RelayEvent, RelayHandle, RelayNotification};
pub use orchestrator::{RelayOrchestrator, RelaySettings};
pub use reconnect::ReconnectPolicy;
pub use session::{Credential, ModelLink, PlaybackTracker, Session, Truncation};
