//! Wire Protocol Types
//!
//! Frames exchanged with participants over their persistent connection. Every
//! frame is a JSON object with a `type` field.

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};

/// Signaling kinds a participant may address to another participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    /// Older clients name candidate exchange `ice`; relayed under that name.
    Ice,
}

impl SignalKind {
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "candidate" => Some(Self::Candidate),
            "ice" => Some(Self::Ice),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::Ice => "ice",
        }
    }
}

/// A participant-to-participant signaling message.
///
/// Everything other than `type`, `to` and `from` is carried in `payload` and
/// re-emitted untouched at the top level of the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(
        default,
        deserialize_with = "participant_ref",
        skip_serializing_if = "Option::is_none"
    )]
    pub to: Option<String>,
    /// Always set by the server; whatever the client sent is discarded.
    #[serde(
        default,
        deserialize_with = "untrusted",
        skip_serializing_if = "Option::is_none"
    )]
    pub from: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Reasons an inbound frame cannot be relayed
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame has no type field")]
    MissingType,
    #[error("unsupported frame type: {0}")]
    UnknownKind(String),
    #[error("malformed signaling frame: {0}")]
    Malformed(#[source] serde_json::Error),
}

impl RelayMessage {
    /// Parse a text frame received from a participant.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::InvalidJson)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?;
        if SignalKind::from_wire(kind).is_none() {
            return Err(FrameError::UnknownKind(kind.to_string()));
        }
        serde_json::from_value(value).map_err(FrameError::Malformed)
    }

    /// The addressed participant, if any. An empty `to` counts as absent.
    pub fn target(&self) -> Option<&str> {
        self.to.as_deref().filter(|to| !to.is_empty())
    }

    /// Stamp the sender id, replacing anything the client supplied.
    pub fn stamped(mut self, sender: &str) -> Self {
        self.from = Some(sender.to_string());
        self
    }
}

/// Accepts string or numeric participant ids; older clients used integers.
fn participant_ref<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id)),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "participant id must be a string or number, got {other}"
        ))),
    }
}

fn untrusted<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer)?;
    Ok(None)
}

/// Frames originated by the server itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// First frame on every connection.
    #[serde(rename = "join")]
    JoinAck {
        success: bool,
        #[serde(rename = "sessionId")]
        session_id: String,
        id: String,
        count: usize,
        participants: Vec<String>,
    },
    /// Someone else joined the session.
    JoinNotification { id: String, count: usize },
    /// Someone left the session; `count` is the remaining member count.
    LeaveNotification { id: String, count: usize },
}

/// Anything the server writes to a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Notice(Notice),
    Signal(RelayMessage),
}

impl Outbound {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Notice> for Outbound {
    fn from(notice: Notice) -> Self {
        Outbound::Notice(notice)
    }
}

impl From<RelayMessage> for Outbound {
    fn from(message: RelayMessage) -> Self {
        Outbound::Signal(message)
    }
}
