//! Wire envelope shared by every channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved wire tags and event names for the call protocol.
pub mod control {
    /// Wire tag of request frames in the call protocol.
    pub const CALL_REQUEST: &str = "call.request";
    /// Wire tag of response frames in the call protocol.
    pub const CALL_RESPONSE: &str = "call.response";
    /// Echo event answered by server-role sockets; backs the latency probe.
    pub const ECHO: &str = "weft.echo";

    /// True when `event` is a control tag that user code may not register
    /// listeners under.
    pub fn is_reserved(event: &str) -> bool {
        event == CALL_REQUEST || event == CALL_RESPONSE
    }
}

/// Opaque identity of a remote peer as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One logical unit of transmission: an event name plus an ordered argument
/// list, or one of the two control frames of the call protocol.
///
/// Control frames are distinct variants rather than reserved event names, so
/// an application event can never collide with the call protocol on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Frame {
    #[serde(rename = "event")]
    Application { event: String, args: Vec<Value> },
    #[serde(rename = "call.request")]
    CallRequest {
        event: String,
        call_id: Uuid,
        args: Vec<Value>,
    },
    #[serde(rename = "call.response")]
    CallResponse { call_id: Uuid, result: Value },
}

impl Frame {
    pub fn event(event: impl Into<String>, args: Vec<Value>) -> Self {
        Frame::Application {
            event: event.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_tags_match_reserved_names() {
        let frame = Frame::CallRequest {
            event: "lookup".into(),
            call_id: Uuid::new_v4(),
            args: vec![json!(1)],
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["kind"], control::CALL_REQUEST);
        assert!(control::is_reserved(control::CALL_REQUEST));
        assert!(control::is_reserved(control::CALL_RESPONSE));
        assert!(!control::is_reserved(control::ECHO));
    }
}
