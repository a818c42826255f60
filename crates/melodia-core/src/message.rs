use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound chat message delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    /// Stable identifier of the chat thread (direct or group).
    pub conversation_id: String,
    /// Platform-specific id of the author.
    pub sender_id: String,
    /// Message text content (caption for media).
    pub text: String,
    #[serde(default)]
    pub is_group: bool,
    /// Human-readable group label, when known.
    #[serde(default)]
    pub group_name: Option<String>,
    /// Sent by the bot's own account.
    #[serde(default)]
    pub from_self: bool,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// A direct (non-group) message where the sender is the conversation itself.
    pub fn direct(conversation_id: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            sender_id: phone_part(conversation_id).to_string(),
            text: text.to_string(),
            is_group: false,
            group_name: None,
            from_self: false,
            timestamp: Utc::now(),
        }
    }

    /// Phone/user part of the conversation id (`15551234567@s.whatsapp.net` → `15551234567`).
    pub fn phone_number(&self) -> &str {
        phone_part(&self.conversation_id)
    }
}

/// Strip the device suffix and server from an address: `1555:12@host` → `1555`.
pub fn phone_part(address: &str) -> &str {
    let end = address.find([':', '@']).unwrap_or(address.len());
    &address[..end]
}

/// Opaque reference to a sent message that can later be edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub conversation_id: String,
    pub message_id: String,
}

/// How the transport should authenticate a fresh connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Persisted credentials, or a scannable QR challenge when none exist.
    Qr,
    /// Link by pairing code for the given (normalized) phone number.
    PairingCode { phone_number: String },
}

/// Why the transport connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The account was logged out; credentials are no longer valid.
    LoggedOut,
    /// Network-level drop.
    ConnectionLost(String),
    /// Another client took over the session.
    Replaced,
    Other(String),
}

impl CloseReason {
    pub fn is_logout(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::ConnectionLost(e) => write!(f, "connection lost: {e}"),
            Self::Replaced => write!(f, "connection replaced"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

/// Events emitted by a transport instance.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new QR challenge; invalidates every earlier one.
    QrIssued(String),
    /// Authentication finished; `identity` is the account address.
    Opened { identity: String },
    Closed(CloseReason),
    Message(InboundMessage),
}
