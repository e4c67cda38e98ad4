//! Presence types for the other party of a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{UserId, lenient_time};

/// Online/offline state of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Connected to the push channel.
    Online,
    /// Not connected.
    Offline,
}

impl PresenceStatus {
    /// Build from the server's `is_online` flag.
    #[must_use]
    pub const fn from_online(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A presence change pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// The user whose presence changed.
    pub user_id: UserId,
    /// Whether they are now online.
    pub online: bool,
    /// When they were last seen, for offline transitions.
    #[serde(
        default,
        deserialize_with = "lenient_time::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl PresenceUpdate {
    /// The update as a [`PresenceStatus`].
    #[must_use]
    pub const fn status(&self) -> PresenceStatus {
        PresenceStatus::from_online(self.online)
    }
}
