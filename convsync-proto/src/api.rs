//! Request and response bodies of the REST endpoints.
//!
//! The backend wraps every response as `{"success": bool, ...}` and puts a
//! human-readable `error` next to `success: false`.

use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::message::{ConversationId, CorrelationToken, Message, UserId};

/// `GET /conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationsResponse {
    /// Whether the call succeeded.
    pub success: bool,
    /// Conversation summaries, most recent first.
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /conversations/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Whether the call succeeded.
    pub success: bool,
    /// Messages, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /messages/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Target thread.
    pub conversation_id: ConversationId,
    /// The other participant.
    pub receiver_id: UserId,
    /// Message body.
    pub message_content: String,
    /// Always `"text"` for this client.
    pub message_type: String,
    /// Correlation token, echoed in push events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<CorrelationToken>,
}

impl SendMessageRequest {
    /// A plain-text send.
    #[must_use]
    pub fn text(
        conversation_id: ConversationId,
        receiver_id: UserId,
        content: String,
        temp_id: CorrelationToken,
    ) -> Self {
        Self {
            conversation_id,
            receiver_id,
            message_content: content,
            message_type: "text".to_string(),
            temp_id: Some(temp_id),
        }
    }
}

/// Response of `POST /messages/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// Whether the message was stored.
    pub success: bool,
    /// The stored message.
    #[serde(default)]
    pub message: Option<Message>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of the mark-read endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Whether the call succeeded.
    pub success: bool,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
