pub mod connection;
pub mod functions;
pub mod realtime;
pub mod relay;
pub mod telephony;

// Re-export commonly used types for convenience
pub use connection::{Leg, PeerHandle, PeerId, PeerState, PeerTransport};

pub use functions::{
    FunctionDescriptor, FunctionError, FunctionHandler, FunctionRegistry, FunctionSchema,
};

pub use realtime::{ModelConnection, ModelConnector, OpenAIRealtimeConnector};

pub use relay::{
    Credential, ReconnectPolicy, RelayEvent, RelayHandle, RelayNotification, RelayOrchestrator,
    RelaySettings, Session,
};
