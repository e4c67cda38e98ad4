//! Message types exchanged with the messaging backend.
//!
//! Identifiers arrive from the server either as JSON strings or integers
//! (user and message ids are database integers, conversation ids are
//! composite strings such as `"3_7"`). All of them are normalized to
//! strings on deserialization so the client never has to care.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Maximum message length in characters accepted by the compose box.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Prefix carried by every client-assigned temporary message id.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Accepts a JSON string or integer and yields its string form.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Signed(n) => n.to_string(),
        Raw::Unsigned(n) => n.to_string(),
    })
}

/// Timestamp parsing that tolerates the backend's naive ISO-8601 output.
///
/// The server emits `datetime.isoformat()` values, which carry no offset
/// for naive datetimes; those are taken as UTC.
pub mod lenient_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    /// Parse an RFC 3339 timestamp, or a naive ISO-8601 one as UTC.
    ///
    /// # Errors
    ///
    /// Returns the chrono parse error of the naive attempt when neither
    /// form matches.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|naive| naive.and_utc())
    }

    /// Serde adapter for a required timestamp.
    pub fn required<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Serde adapter for a nullable timestamp.
    pub fn optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| parse(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Server-assigned, stable message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(#[serde(deserialize_with = "string_or_number")] String);

impl MessageId {
    /// Wrap a server id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(#[serde(deserialize_with = "string_or_number")] String);

impl ConversationId {
    /// Wrap a server conversation id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a user (message sender, receiver or conversation participant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(#[serde(deserialize_with = "string_or_number")] String);

impl UserId {
    /// Wrap a server user id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated token correlating an optimistic message with the
/// server's confirmation of it.
///
/// Rendered as `temp_<uuid-v7>`; v7 UUIDs are time-ordered, so tokens
/// generated by one client sort in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Generate a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Wrap a token echoed back by the server.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Return the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token carries the temporary-id prefix.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.0.len() > TEMP_ID_PREFIX.len() && self.0.starts_with(TEMP_ID_PREFIX)
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery lifecycle of a message.
///
/// Progresses `Sending -> Sent -> Delivered -> Read`. `Failed` is terminal
/// and only reachable from `Sending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistically shown, not yet acknowledged.
    Sending,
    /// Accepted by the server.
    Sent,
    /// Delivered to the recipient's client.
    Delivered,
    /// Read by the recipient.
    Read,
    /// Could not be sent; the user may retry.
    Failed,
}

impl MessageStatus {
    /// Position in the forward-only lifecycle. `Failed` sits outside it.
    const fn rank(self) -> Option<u8> {
        match self {
            Self::Sending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Re-applying the current status is not a transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self.rank(), next.rank()) {
            (Some(0), None) => true,
            (Some(current), Some(target)) => target > current,
            _ => false,
        }
    }

    /// Apply `next` if the transition is legal. Returns whether it changed.
    pub const fn advance(&mut self, next: Self) -> bool {
        if self.can_transition_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }

    /// Whether the message has been accepted by the server.
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Read)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

const fn default_status() -> MessageStatus {
    MessageStatus::Sent
}

/// A server-confirmed message as it appears in REST pages and push events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Stable server id.
    pub id: MessageId,
    /// Owning conversation. Message pages omit it; push events carry it
    /// next to the message instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Author.
    pub sender_id: UserId,
    /// Recipient, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    /// Plain-text body.
    pub content: String,
    /// Server creation time.
    #[serde(deserialize_with = "lenient_time::required")]
    pub created_at: DateTime<Utc>,
    /// Delivery status; absent means `sent`.
    #[serde(default = "default_status")]
    pub status: MessageStatus,
    /// When the recipient read it, if they have.
    #[serde(
        default,
        deserialize_with = "lenient_time::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Effective status: a message with `read_at` set is at least `Read`.
    #[must_use]
    pub const fn effective_status(&self) -> MessageStatus {
        if self.read_at.is_some() {
            MessageStatus::Read
        } else {
            self.status
        }
    }
}

/// Error returned when compose content fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty after trimming.
    #[error("message content is empty")]
    Empty,
    /// Content exceeds [`MAX_CONTENT_CHARS`].
    #[error("message too long ({chars} characters, max {max})")]
    TooLong {
        /// Length of the trimmed content in characters.
        chars: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Trim compose input and check it against the length limit.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank input and
/// [`ValidationError::TooLong`] past [`MAX_CONTENT_CHARS`].
pub fn validate_content(raw: &str) -> Result<&str, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let chars = trimmed.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(ValidationError::TooLong {
            chars,
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(trimmed)
}
