//! Typing indicator payloads in both directions.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, UserId};

/// Sent by the client when its user starts or stops typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    /// Conversation being typed into.
    pub conversation_id: ConversationId,
    /// The other participant, who should see the indicator.
    pub receiver_id: UserId,
}

/// Pushed by the server when the other party starts or stops typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    /// Who is typing.
    pub user_id: UserId,
    /// Where. Stop notices from the server may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}
