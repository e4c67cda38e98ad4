//! Push-channel frames.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! [`ServerEvent`] covers what the server pushes, [`ClientFrame`] what the
//! client emits.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, CorrelationToken, Message, MessageId, MessageStatus, UserId};
use crate::presence::PresenceUpdate;
use crate::typing::{TypingNotice, TypingSignal};

/// Display metadata for the author of a pushed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderSummary {
    /// Author id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Avatar file name.
    #[serde(default)]
    pub profile_photo: Option<String>,
}

/// A message pushed to every session of both participants.
///
/// The copy delivered to the sending session echoes the sender's
/// correlation token in `temp_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// The confirmed message.
    pub message: Message,
    /// Thread it belongs to.
    pub conversation_id: ConversationId,
    /// Author display data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderSummary>,
    /// Correlation token of the optimistic send this confirms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<CorrelationToken>,
}

impl NewMessage {
    /// The message with its conversation id filled in from the envelope.
    #[must_use]
    pub fn into_message(self) -> Message {
        let mut message = self.message;
        message.conversation_id = Some(self.conversation_id);
        message
    }
}

/// Delivery status update for a message the local user sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Affected message.
    pub message_id: MessageId,
    /// New status.
    pub status: MessageStatus,
}

/// The server refused a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRejected {
    /// Correlation token of the refused send, when the server knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<CorrelationToken>,
    /// Server-side reason.
    pub error: String,
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message was posted to a conversation the user takes part in.
    NewMessage(NewMessage),
    /// One of the user's messages moved forward in its lifecycle.
    MessageStatusChanged(StatusUpdate),
    /// A send was refused.
    MessageError(SendRejected),
    /// The other party started typing.
    UserTyping(TypingNotice),
    /// The other party stopped typing.
    UserStoppedTyping(TypingNotice),
    /// A participant went online or offline.
    PresenceChanged(PresenceUpdate),
}

impl ServerEvent {
    /// Wire name of the event, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageStatusChanged(_) => "message_status_changed",
            Self::MessageError(_) => "message_error",
            Self::UserTyping(_) => "user_typing",
            Self::UserStoppedTyping(_) => "user_stopped_typing",
            Self::PresenceChanged(_) => "presence_changed",
        }
    }
}

/// A send request on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target thread.
    pub conversation_id: ConversationId,
    /// The other participant.
    pub receiver_id: UserId,
    /// Trimmed, validated body.
    pub content: String,
    /// Correlation token the server must echo.
    pub temp_id: CorrelationToken,
}

/// Frames emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving a conversation's events.
    JoinConversation {
        /// Conversation to join.
        conversation_id: ConversationId,
    },
    /// Stop receiving a conversation's events.
    LeaveConversation {
        /// Conversation to leave.
        conversation_id: ConversationId,
    },
    /// Post a message.
    SendMessage(OutgoingMessage),
    /// The local user started typing.
    TypingStart(TypingSignal),
    /// The local user stopped typing.
    TypingStop(TypingSignal),
}
