//! Conversation summaries as listed by `GET /conversations`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, UserId, lenient_time};
use crate::presence::PresenceStatus;

/// The other side of a two-party thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Avatar file name, if the user uploaded one.
    #[serde(default)]
    pub profile_photo: Option<String>,
    /// `host`, `guest`, `admin`, ...
    #[serde(default)]
    pub user_type: Option<String>,
    /// Whether they are currently connected.
    #[serde(default, rename = "is_online")]
    pub online: bool,
    /// When they were last seen.
    #[serde(default, deserialize_with = "lenient_time::optional")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Participant {
    /// Current presence.
    #[must_use]
    pub const fn presence(&self) -> PresenceStatus {
        PresenceStatus::from_online(self.online)
    }
}

/// Denormalized preview of the newest message in a thread.
///
/// The server sends `{"content": null, "sender_id": null}` for threads
/// without messages, hence the optional fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LastMessage {
    /// Body of the newest message.
    #[serde(default)]
    pub content: Option<String>,
    /// Its author.
    #[serde(default)]
    pub sender_id: Option<UserId>,
    /// When it was sent.
    #[serde(default, deserialize_with = "lenient_time::optional")]
    pub created_at: Option<DateTime<Utc>>,
}

/// The listing a thread was started from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRef {
    /// Listing id.
    #[serde(deserialize_with = "crate::message::string_or_number")]
    pub id: String,
    /// Listing title.
    pub title: String,
}

/// One entry of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Thread id.
    pub id: ConversationId,
    /// The other participant.
    pub other_participant: Participant,
    /// Preview of the newest message.
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    /// Time of the newest message.
    #[serde(default, deserialize_with = "lenient_time::optional")]
    pub last_message_time: Option<DateTime<Utc>>,
    /// Messages the local user has not read yet.
    #[serde(default)]
    pub unread_count: u32,
    /// Listing context, when the thread is about a listing.
    #[serde(default)]
    pub listing: Option<ListingRef>,
}

impl Conversation {
    /// Text of the newest message, if there is one.
    #[must_use]
    pub fn last_message_text(&self) -> Option<&str> {
        self.last_message.as_ref()?.content.as_deref()
    }
}
