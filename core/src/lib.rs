// Weft core library
// Bidirectional named-event messaging over paired reliable/unreliable channels

pub mod correlate;
pub mod dispatch;
pub mod frame;
pub mod middleware;
pub mod parallel;
pub mod rooms;
pub mod socket;
pub mod transport;

// Export core types
pub use correlate::{RequestCorrelator, DEFAULT_CALL_TIMEOUT};
pub use dispatch::{ListenerHandle, ListenerRegistry};
pub use frame::{control, Frame, PeerId};
pub use middleware::{Direction, MiddlewarePipeline};
pub use parallel::{ParallelOp, ParallelOutcome, Strategy};
pub use rooms::RoomRegistry;
pub use socket::{Exclude, Role, ScheduledBroadcast, Socket, SocketConfig};
pub use transport::{memory::MemoryTransport, Channel, Inbound, Transport};

use std::time::Duration;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeftError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("operation '{op}' not permitted for role {role:?}")]
    RoleViolation { role: socket::Role, op: &'static str },

    #[error("call '{event}' timed out after {timeout:?}")]
    CallTimeout { event: String, timeout: Duration },

    #[error("no call handler registered for '{0}'")]
    NoCallHandler(String),

    #[error("room '{0}' does not exist")]
    NoRoom(String),

    #[error("listener for '{event}' failed: {message}")]
    Callback { event: String, message: String },

    #[error("middleware stage {index} rejected '{event}': {message}")]
    Middleware {
        index: usize,
        event: String,
        message: String,
    },

    #[error("unreliable channel not enabled")]
    UnreliableNotEnabled,

    #[error("'{0}' is a reserved event name")]
    ReservedEvent(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;
