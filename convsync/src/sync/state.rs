//! Plain-data state behind [`super::SyncClient`].
//!
//! Nothing in here awaits or talks to the network; the client locks the
//! state, calls these helpers, and emits change notifications afterwards.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use convsync_proto::conversation::{Conversation, LastMessage, Participant};
use convsync_proto::message::{
    ConversationId, CorrelationToken, Message, MessageId, MessageStatus, UserId,
};

use crate::transport::ConnectionState;

/// Identity of a thread entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Stored by the server.
    Confirmed(MessageId),
    /// Optimistic local entry awaiting its acknowledgement.
    Pending(CorrelationToken),
}

/// One message as shown in the active thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    /// Server id or correlation token.
    pub key: MessageKey,
    /// Author.
    pub sender_id: UserId,
    /// Plain-text body.
    pub content: String,
    /// Server time for confirmed entries, local time for pending ones.
    pub created_at: DateTime<Utc>,
    /// Delivery status.
    pub status: MessageStatus,
    /// Why the send failed, for `Failed` entries.
    pub failure: Option<String>,
}

impl ThreadEntry {
    pub(crate) fn confirmed(message: Message) -> Self {
        let status = message.effective_status();
        Self {
            key: MessageKey::Confirmed(message.id),
            sender_id: message.sender_id,
            content: message.content,
            created_at: message.created_at,
            status,
            failure: None,
        }
    }

    pub(crate) fn pending(token: CorrelationToken, sender_id: UserId, content: String) -> Self {
        Self {
            key: MessageKey::Pending(token),
            sender_id,
            content,
            created_at: Utc::now(),
            status: MessageStatus::Sending,
            failure: None,
        }
    }

    /// Server id, once confirmed.
    #[must_use]
    pub const fn message_id(&self) -> Option<&MessageId> {
        match &self.key {
            MessageKey::Confirmed(id) => Some(id),
            MessageKey::Pending(_) => None,
        }
    }

    /// Correlation token, while unconfirmed.
    #[must_use]
    pub const fn token(&self) -> Option<&CorrelationToken> {
        match &self.key {
            MessageKey::Pending(token) => Some(token),
            MessageKey::Confirmed(_) => None,
        }
    }

    /// Whether the server has not acknowledged this entry.
    #[must_use]
    pub const fn is_unconfirmed(&self) -> bool {
        matches!(self.key, MessageKey::Pending(_))
    }
}

/// Lifecycle of the active thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadPhase {
    /// No conversation selected.
    Idle,
    /// Page fetch in flight.
    Loading,
    /// Page loaded; live events apply.
    Active,
    /// Page fetch failed; `retry_load` re-enters `Loading`.
    Error(String),
}

/// Lifecycle of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListPhase {
    /// Never requested.
    NotLoaded,
    /// Request in flight; previous entries stay visible.
    Loading,
    /// Loaded.
    Ready,
    /// The last request failed; previous entries stay visible.
    Error(String),
}

/// Conversation list tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationFilter {
    /// Every conversation.
    #[default]
    All,
    /// Only conversations with unread messages.
    Unread,
}

/// Copy of the conversation list for renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSnapshot {
    /// List lifecycle.
    pub phase: ListPhase,
    /// Entries, most recent activity first.
    pub conversations: Vec<Conversation>,
    /// The selected conversation.
    pub active: Option<ConversationId>,
}

impl ListSnapshot {
    /// Sum of unread counts.
    #[must_use]
    pub fn total_unread(&self) -> u32 {
        total_unread(&self.conversations)
    }
}

/// Copy of the active thread for renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    /// The selected conversation.
    pub conversation_id: Option<ConversationId>,
    /// Its other participant, as currently known.
    pub participant: Option<Participant>,
    /// Thread lifecycle.
    pub phase: ThreadPhase,
    /// Messages in display order.
    pub entries: Vec<ThreadEntry>,
    /// Whether the other participant is typing.
    pub other_typing: bool,
    /// Push channel health.
    pub connection: ConnectionState,
}

/// Sum of unread counts across `conversations`.
#[must_use]
pub fn total_unread(conversations: &[Conversation]) -> u32 {
    conversations
        .iter()
        .fold(0u32, |sum, c| sum.saturating_add(c.unread_count))
}

/// Entries whose participant name or last-message preview contains `query`
/// (case-insensitive), restricted by `filter`.
#[must_use]
pub fn filter_conversations(
    conversations: &[Conversation],
    query: &str,
    filter: ConversationFilter,
) -> Vec<Conversation> {
    let needle = query.trim().to_lowercase();
    conversations
        .iter()
        .filter(|c| filter == ConversationFilter::All || c.unread_count > 0)
        .filter(|c| {
            needle.is_empty()
                || c.other_participant.name.to_lowercase().contains(&needle)
                || c.last_message_text()
                    .is_some_and(|text| text.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

/// Message ids already accounted for outside the active thread.
///
/// Bounded: the oldest id is forgotten once `capacity` is reached.
#[derive(Debug)]
pub(crate) struct SeenIds {
    ids: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl SeenIds {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record `id`; returns `false` if it was already known.
    pub(crate) fn insert(&mut self, id: &MessageId) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.clone());
        self.order.push_back(id.clone());
        true
    }

    pub(crate) fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Identifies one page request: the conversation and the load generation
/// current when it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoadTicket {
    pub(crate) conversation: ConversationId,
    pub(crate) generation: u64,
}

/// Where an unconfirmed entry currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingSlot {
    /// Index in the active thread.
    Active(usize),
    /// Parked with a conversation that is not on screen.
    Parked(ConversationId, usize),
}

#[derive(Debug)]
pub(crate) struct SyncState {
    pub(crate) conversations: Vec<Conversation>,
    pub(crate) list_phase: ListPhase,
    pub(crate) active: Option<ConversationId>,
    pub(crate) phase: ThreadPhase,
    pub(crate) thread: Vec<ThreadEntry>,
    pub(crate) generation: u64,
    /// Confirmed ids appended to the thread while its page was loading.
    pub(crate) arrived_during_load: HashSet<MessageId>,
    /// Unconfirmed entries of conversations that are not on screen.
    pub(crate) parked: HashMap<ConversationId, Vec<ThreadEntry>>,
    pub(crate) other_typing: bool,
    pub(crate) remote_typing_generation: u64,
    pub(crate) at_bottom: bool,
    pub(crate) connection: ConnectionState,
    pub(crate) seen: SeenIds,
}

impl SyncState {
    pub(crate) fn new(max_seen: usize) -> Self {
        Self {
            conversations: Vec::new(),
            list_phase: ListPhase::NotLoaded,
            active: None,
            phase: ThreadPhase::Idle,
            thread: Vec::new(),
            generation: 0,
            arrived_during_load: HashSet::new(),
            parked: HashMap::new(),
            other_typing: false,
            remote_typing_generation: 0,
            at_bottom: true,
            connection: ConnectionState::Disconnected,
            seen: SeenIds::new(max_seen),
        }
    }

    pub(crate) fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub(crate) fn conversation_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| &c.id == id)
    }

    /// The other participant of the active conversation.
    pub(crate) fn receiver(&self) -> Option<UserId> {
        let active = self.active.as_ref()?;
        self.conversation(active)
            .map(|c| c.other_participant.id.clone())
    }

    /// Replace the list with a freshly fetched one.
    pub(crate) fn install_list(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        self.list_phase = ListPhase::Ready;
    }

    pub(crate) fn is_active(&self, id: &ConversationId) -> bool {
        self.active.as_ref() == Some(id)
    }

    /// Start a new page load for `conversation`, invalidating older ones.
    pub(crate) fn begin_load(&mut self, conversation: ConversationId) -> LoadTicket {
        self.generation += 1;
        self.arrived_during_load.clear();
        LoadTicket {
            conversation,
            generation: self.generation,
        }
    }

    /// Whether a response for `ticket` still applies.
    pub(crate) fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.generation == ticket.generation && self.is_active(&ticket.conversation)
    }

    /// Move the active thread's unconfirmed entries aside and clear it.
    pub(crate) fn park_thread(&mut self) {
        let entries = std::mem::take(&mut self.thread);
        let Some(active) = self.active.clone() else {
            return;
        };
        let unconfirmed: Vec<_> = entries.into_iter().filter(ThreadEntry::is_unconfirmed).collect();
        if !unconfirmed.is_empty() {
            self.parked.entry(active).or_default().extend(unconfirmed);
        }
    }

    /// Replace the active thread with a fetched page.
    ///
    /// Keeps what the page cannot know about: unconfirmed local entries
    /// (after the page, unless a newly seen own message with the same
    /// content is their confirmed counterpart), and confirmed messages that
    /// arrived while the page was in flight. Statuses never move backwards.
    pub(crate) fn apply_page(&mut self, page: Vec<Message>, user: &UserId) {
        let previous = std::mem::take(&mut self.thread);
        let known_status: HashMap<MessageId, MessageStatus> = previous
            .iter()
            .filter_map(|e| e.message_id().map(|id| (id.clone(), e.status)))
            .collect();

        let mut entries = Vec::with_capacity(page.len());
        let mut in_page = HashSet::new();
        // Own messages the client had not seen before; candidates for
        // matching up with unconfirmed entries whose ack was lost.
        let mut unclaimed_own: Vec<String> = Vec::new();
        for message in page {
            if !in_page.insert(message.id.clone()) {
                continue;
            }
            let is_new = !known_status.contains_key(&message.id) && !self.seen.contains(&message.id);
            if is_new && &message.sender_id == user {
                unclaimed_own.push(message.content.clone());
            }
            self.seen.insert(&message.id);
            let mut entry = ThreadEntry::confirmed(message);
            if let Some(prev) = entry.message_id().and_then(|id| known_status.get(id)) {
                entry.status.advance(*prev);
            }
            entries.push(entry);
        }

        let mut unconfirmed = Vec::new();
        for entry in previous {
            match entry.message_id() {
                Some(id) => {
                    if self.arrived_during_load.contains(id) && !in_page.contains(id) {
                        entries.push(entry);
                    }
                }
                None => {
                    if let Some(pos) = unclaimed_own.iter().position(|c| *c == entry.content) {
                        unclaimed_own.swap_remove(pos);
                        tracing::debug!(
                            token = ?entry.token(),
                            "unconfirmed entry superseded by its stored copy"
                        );
                    } else {
                        unconfirmed.push(entry);
                    }
                }
            }
        }
        entries.extend(unconfirmed);

        self.thread = entries;
        self.arrived_during_load.clear();
    }

    pub(crate) fn thread_position(&self, id: &MessageId) -> Option<usize> {
        self.thread.iter().position(|e| e.message_id() == Some(id))
    }

    pub(crate) fn find_pending(&self, token: &CorrelationToken) -> Option<PendingSlot> {
        if let Some(index) = self.thread.iter().position(|e| e.token() == Some(token)) {
            return Some(PendingSlot::Active(index));
        }
        self.parked.iter().find_map(|(conversation, entries)| {
            entries
                .iter()
                .position(|e| e.token() == Some(token))
                .map(|index| PendingSlot::Parked(conversation.clone(), index))
        })
    }

    pub(crate) fn pending_entry_mut(&mut self, slot: &PendingSlot) -> Option<&mut ThreadEntry> {
        match slot {
            PendingSlot::Active(index) => self.thread.get_mut(*index),
            PendingSlot::Parked(conversation, index) => self
                .parked
                .get_mut(conversation)
                .and_then(|entries| entries.get_mut(*index)),
        }
    }

    pub(crate) fn remove_parked(&mut self, conversation: &ConversationId, index: usize) {
        if let Some(entries) = self.parked.get_mut(conversation) {
            if index < entries.len() {
                entries.remove(index);
            }
            if entries.is_empty() {
                self.parked.remove(conversation);
            }
        }
    }

    /// Record `message` as the newest activity of its conversation and
    /// move the entry to the top. Returns `false` for unknown conversations.
    pub(crate) fn touch_conversation(
        &mut self,
        id: &ConversationId,
        message: &Message,
        count_unread: bool,
    ) -> bool {
        let Some(pos) = self.conversations.iter().position(|c| &c.id == id) else {
            return false;
        };
        let mut conversation = self.conversations.remove(pos);
        conversation.last_message = Some(LastMessage {
            content: Some(message.content.clone()),
            sender_id: Some(message.sender_id.clone()),
            created_at: Some(message.created_at),
        });
        conversation.last_message_time = Some(message.created_at);
        if count_unread {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        self.conversations.insert(0, conversation);
        true
    }

    pub(crate) fn list_snapshot(&self) -> ListSnapshot {
        ListSnapshot {
            phase: self.list_phase.clone(),
            conversations: self.conversations.clone(),
            active: self.active.clone(),
        }
    }

    pub(crate) fn thread_snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            conversation_id: self.active.clone(),
            participant: self
                .active
                .as_ref()
                .and_then(|id| self.conversation(id))
                .map(|c| c.other_participant.clone()),
            phase: self.phase.clone(),
            entries: self.thread.clone(),
            other_typing: self.other_typing,
            connection: self.connection,
        }
    }
}
