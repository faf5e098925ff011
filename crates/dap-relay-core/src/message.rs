//! Protocol message types.
//!
//! Payloads (`arguments`, `body`) are carried as opaque JSON values; this
//! layer never interprets debugging semantics.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Per-session sequence number.
pub type Seq = i64;

/// A single protocol message, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Client-to-adapter request (or an adapter-initiated reverse request).
    Request(Request),
    /// Adapter reply to a request.
    Response(Response),
    /// Unsolicited adapter notification.
    Event(Event),
}

impl Message {
    /// Sequence number of the message.
    #[must_use]
    pub const fn seq(&self) -> Seq {
        match self {
            Self::Request(r) => r.seq,
            Self::Response(r) => r.seq,
            Self::Event(e) => e.seq,
        }
    }
}

/// Request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Sequence number chosen by the sender.
    pub seq: Seq,
    /// Command name, e.g. `initialize`.
    pub command: String,
    /// Command arguments.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub arguments: Option<Value>,
}

impl Request {
    /// Create a request.
    #[must_use]
    pub fn new(seq: Seq, command: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            seq,
            command: command.into(),
            arguments,
        }
    }
}

/// Response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Adapter's own sequence number.
    #[serde(default)]
    pub seq: Seq,
    /// `seq` of the request being answered.
    pub request_seq: Seq,
    /// Whether the request succeeded.
    pub success: bool,
    /// Command of the request being answered.
    pub command: String,
    /// Error text for unsuccessful responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Result payload.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Value>,
}

/// Event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Adapter's own sequence number.
    #[serde(default)]
    pub seq: Seq,
    /// Event name, e.g. `stopped`.
    pub event: String,
    /// Event payload.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Value>,
}

/// A payload field that is present is `Some`, even when it is `null`.
/// Absent fields fall back to `None` through `#[serde(default)]`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

impl From<Event> for Message {
    fn from(value: Event) -> Self {
        Self::Event(value)
    }
}
