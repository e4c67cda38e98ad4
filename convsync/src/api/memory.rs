//! In-process [`ConversationApi`] for tests.
//!
//! Holds conversations and message pages in memory, records every call,
//! and lets a test inject latency or failures per endpoint. Latency uses
//! `tokio::time::sleep`, so paused-clock tests control it exactly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use convsync_proto::api::SendMessageRequest;
use convsync_proto::conversation::{Conversation, LastMessage};
use convsync_proto::message::{ConversationId, Message, MessageId, MessageStatus, UserId};

use super::{ApiError, ConversationApi};

/// A request the in-memory backend received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// `GET /conversations`.
    ListConversations,
    /// `GET /conversations/{id}/messages`.
    FetchMessages(ConversationId),
    /// `POST /conversations/{id}/read`.
    MarkConversationRead(ConversationId),
    /// `POST /conversations/read-all`.
    MarkAllRead,
    /// `POST /messages/{id}/read`.
    MarkMessageRead(MessageId),
    /// `POST /messages/send`.
    SendMessage(ConversationId),
}

#[derive(Debug, Default)]
struct Backend {
    /// The local user, author of messages stored via `send_message`.
    user: Option<UserId>,
    conversations: Vec<Conversation>,
    pages: HashMap<ConversationId, Vec<Message>>,
    fetch_latency: HashMap<ConversationId, Duration>,
    list_latency: Duration,
    read_latency: Duration,
    failing_fetches: HashSet<ConversationId>,
    fail_list: bool,
    fail_reads: bool,
    fail_sends: bool,
    calls: Vec<ApiCall>,
    next_id: u64,
}

/// Scriptable in-memory backend.
///
/// Clones share state, so a test keeps one clone to script the backend
/// while the client owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryApi {
    inner: Arc<Mutex<Backend>>,
}

impl InMemoryApi {
    /// An empty backend whose sends are authored by `user`.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        let api = Self::default();
        {
            let mut backend = api.inner.lock();
            backend.user = Some(user);
            backend.next_id = 1000;
        }
        api
    }

    /// Add or replace a conversation summary.
    pub fn upsert_conversation(&self, conversation: Conversation) {
        let mut backend = self.inner.lock();
        if let Some(existing) = backend
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            *existing = conversation;
        } else {
            backend.conversations.push(conversation);
        }
    }

    /// Store a message in a conversation's page and refresh its summary,
    /// as the server does when a message is posted.
    pub fn store_message(&self, conversation: &ConversationId, message: Message) {
        let mut backend = self.inner.lock();
        let is_own = backend.user.as_ref() == Some(&message.sender_id);
        if let Some(summary) = backend
            .conversations
            .iter_mut()
            .find(|c| &c.id == conversation)
        {
            summary.last_message = Some(LastMessage {
                content: Some(message.content.clone()),
                sender_id: Some(message.sender_id.clone()),
                created_at: Some(message.created_at),
            });
            summary.last_message_time = Some(message.created_at);
            if !is_own {
                summary.unread_count += 1;
            }
        }
        backend
            .pages
            .entry(conversation.clone())
            .or_default()
            .push(message);
    }

    /// Delay `fetch_messages` for one conversation.
    pub fn set_fetch_latency(&self, conversation: &ConversationId, latency: Duration) {
        self.inner
            .lock()
            .fetch_latency
            .insert(conversation.clone(), latency);
    }

    /// Delay `list_conversations`.
    pub fn set_list_latency(&self, latency: Duration) {
        self.inner.lock().list_latency = latency;
    }

    /// Delay the mark-read endpoints.
    pub fn set_read_latency(&self, latency: Duration) {
        self.inner.lock().read_latency = latency;
    }

    /// Make `fetch_messages` fail for one conversation.
    pub fn fail_fetch(&self, conversation: &ConversationId, fail: bool) {
        let mut backend = self.inner.lock();
        if fail {
            backend.failing_fetches.insert(conversation.clone());
        } else {
            backend.failing_fetches.remove(conversation);
        }
    }

    /// Make `list_conversations` fail.
    pub fn fail_list(&self, fail: bool) {
        self.inner.lock().fail_list = fail;
    }

    /// Make the mark-read endpoints fail.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    /// Make `send_message` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.lock().fail_sends = fail;
    }

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.inner.lock().calls.clone()
    }

    /// Number of received calls equal to `call`.
    #[must_use]
    pub fn count(&self, call: &ApiCall) -> usize {
        self.inner.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Server-side unread count of a conversation.
    #[must_use]
    pub fn unread_count(&self, conversation: &ConversationId) -> Option<u32> {
        self.inner
            .lock()
            .conversations
            .iter()
            .find(|c| &c.id == conversation)
            .map(|c| c.unread_count)
    }

    fn record(&self, call: ApiCall) {
        self.inner.lock().calls.push(call);
    }
}

impl ConversationApi for InMemoryApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.record(ApiCall::ListConversations);
        let latency = self.inner.lock().list_latency;
        tokio::time::sleep(latency).await;

        let backend = self.inner.lock();
        if backend.fail_list {
            return Err(ApiError::Unavailable("conversation list".into()));
        }
        let mut conversations = backend.conversations.clone();
        conversations.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(conversations)
    }

    async fn fetch_messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, ApiError> {
        self.record(ApiCall::FetchMessages(conversation.clone()));
        let latency = self
            .inner
            .lock()
            .fetch_latency
            .get(conversation)
            .copied()
            .unwrap_or_default();
        tokio::time::sleep(latency).await;

        let backend = self.inner.lock();
        if backend.failing_fetches.contains(conversation) {
            return Err(ApiError::Status {
                status: 500,
                message: format!("cannot load {conversation}"),
            });
        }
        Ok(backend.pages.get(conversation).cloned().unwrap_or_default())
    }

    async fn mark_conversation_read(&self, conversation: &ConversationId) -> Result<(), ApiError> {
        self.record(ApiCall::MarkConversationRead(conversation.clone()));
        let latency = self.inner.lock().read_latency;
        tokio::time::sleep(latency).await;

        let mut backend = self.inner.lock();
        if backend.fail_reads {
            return Err(ApiError::Unavailable("mark read".into()));
        }
        if let Some(summary) = backend
            .conversations
            .iter_mut()
            .find(|c| &c.id == conversation)
        {
            summary.unread_count = 0;
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.record(ApiCall::MarkAllRead);
        let latency = self.inner.lock().read_latency;
        tokio::time::sleep(latency).await;

        let mut backend = self.inner.lock();
        if backend.fail_reads {
            return Err(ApiError::Unavailable("mark all read".into()));
        }
        for summary in &mut backend.conversations {
            summary.unread_count = 0;
        }
        Ok(())
    }

    async fn mark_message_read(&self, message: &MessageId) -> Result<(), ApiError> {
        self.record(ApiCall::MarkMessageRead(message.clone()));
        if self.inner.lock().fail_reads {
            return Err(ApiError::Unavailable("mark message read".into()));
        }
        Ok(())
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message, ApiError> {
        self.record(ApiCall::SendMessage(request.conversation_id.clone()));
        let message = {
            let mut backend = self.inner.lock();
            if backend.fail_sends {
                return Err(ApiError::Rejected("send refused".into()));
            }
            backend.next_id += 1;
            Message {
                id: MessageId::new(backend.next_id.to_string()),
                conversation_id: None,
                sender_id: backend.user.clone().unwrap_or_else(|| UserId::new("0")),
                receiver_id: Some(request.receiver_id.clone()),
                content: request.message_content.clone(),
                created_at: Utc::now(),
                status: MessageStatus::Sent,
                read_at: None,
            }
        };
        self.store_message(&request.conversation_id, message.clone());
        Ok(message)
    }
}
