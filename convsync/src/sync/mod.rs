//! Conversation synchronization core.
//!
//! [`SyncClient`] reconciles three sources of truth for the signed-in
//! user's conversations: the REST backend ([`ConversationApi`]), the
//! real-time channel ([`Transport`]), and the user's own optimistic
//! actions. It owns the conversation list and the active thread as plain
//! data, announces every change on a [`SyncEvent`] channel, and hands out
//! snapshots for renderers.
//!
//! The client is shared through `Arc`. Background work (ack timeouts,
//! typing timers, the fallback poller) holds only `Weak` references, so
//! dropping the last `Arc` ends it.
//!
//! Operations are split by concern:
//! - [`select`]: choosing, loading and closing the active thread
//! - [`send`]: optimistic sends, acknowledgement, failure and retry
//! - [`receive`]: inbound messages, status updates, presence
//! - [`typing`]: outbound typing debounce, inbound typing indicator
//! - [`read`]: read receipts
//! - [`connection`]: connection changes, resync, fallback polling

pub mod connection;
pub mod read;
pub mod receive;
pub mod select;
pub mod send;
pub mod state;
pub mod typing;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use convsync_proto::conversation::Conversation;
use convsync_proto::event::ServerEvent;
use convsync_proto::message::{ConversationId, CorrelationToken, UserId, ValidationError};

use crate::api::{ApiError, ConversationApi};
use crate::config::SyncConfig;
use crate::transport::{ConnectionState, Transport, TransportError, TransportEvent};

use self::state::{ConversationFilter, ListSnapshot, SyncState, ThreadSnapshot};
use self::typing::OutboundTyping;

/// Errors surfaced by [`SyncClient`] operations.
///
/// Most failures never reach the caller as errors: they are folded into
/// state (a `failed` message, a panel error, the connection indicator).
/// These are the ones an operation reports directly.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The real-time channel is gone for good.
    #[error("push channel unavailable: {0}")]
    TransportUnavailable(#[source] TransportError),

    /// A send was refused by the transport; the entry is now `failed`.
    #[error("message {token} could not be sent: {source}")]
    SendFailed {
        /// Token of the failed entry.
        token: CorrelationToken,
        /// Transport error.
        #[source]
        source: TransportError,
    },

    /// A REST load failed; the affected panel is in its error state.
    #[error("load failed: {0}")]
    LoadFailed(#[from] ApiError),

    /// An inbound event could not be routed.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// The conversation is not in the loaded list.
    #[error("conversation {0} not found")]
    NotFound(ConversationId),

    /// Compose content was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No failed message carries this token.
    #[error("no failed message with token {0}")]
    UnknownMessage(CorrelationToken),
}

/// Change notifications emitted by [`SyncClient`].
///
/// Notifications say what changed, not how it looks: renderers pull the
/// current snapshot when they receive one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The conversation list (entries, order, counts, presence, phase)
    /// changed.
    ConversationsChanged,
    /// The active thread changed.
    ThreadChanged {
        /// Whether the view should jump to the newest message.
        scroll_to_bottom: bool,
    },
    /// The other participant of the active conversation started or
    /// stopped typing.
    TypingChanged {
        /// The active conversation.
        conversation_id: ConversationId,
        /// Whether they are typing now.
        typing: bool,
    },
    /// The real-time channel changed state.
    ConnectionChanged(ConnectionState),
    /// A sent message failed and can be retried.
    MessageFailed {
        /// Token of the failed entry.
        token: CorrelationToken,
        /// Why it failed.
        reason: String,
    },
    /// A message arrived in a conversation that is not on screen.
    IncomingMessage {
        /// Where it arrived.
        conversation_id: ConversationId,
        /// Who sent it.
        sender_id: UserId,
        /// Its text.
        content: String,
    },
}

/// Real-time conversation synchronization client.
pub struct SyncClient<T, A> {
    transport: T,
    api: A,
    user_id: UserId,
    config: SyncConfig,
    state: Mutex<SyncState>,
    typing: Mutex<OutboundTyping>,
    poller: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::Sender<SyncEvent>,
}

impl<T, A> SyncClient<T, A>
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    /// Create a client for `user_id` together with its change-notification
    /// receiver.
    ///
    /// Nothing is loaded yet: call [`load_conversations`](Self::load_conversations)
    /// and spawn [`run`](Self::run) to start syncing.
    #[must_use]
    pub fn new(
        transport: T,
        api: A,
        user_id: UserId,
        config: SyncConfig,
    ) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let client = Self {
            transport,
            api,
            user_id,
            state: Mutex::new(SyncState::new(config.max_duplicate_tracking)),
            typing: Mutex::new(OutboundTyping::default()),
            poller: Mutex::new(None),
            events: tx,
            config,
        };
        (client, rx)
    }

    /// The signed-in user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The injected transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Timers and limits in effect.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Copy of the conversation list.
    #[must_use]
    pub fn conversations(&self) -> ListSnapshot {
        self.state.lock().list_snapshot()
    }

    /// Copy of the active thread.
    #[must_use]
    pub fn thread(&self) -> ThreadSnapshot {
        self.state.lock().thread_snapshot()
    }

    /// The selected conversation.
    #[must_use]
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.state.lock().active.clone()
    }

    /// Last known state of the real-time channel.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    /// Sum of unread counts, for a title badge.
    #[must_use]
    pub fn total_unread(&self) -> u32 {
        state::total_unread(&self.state.lock().conversations)
    }

    /// Conversations matching a search query and tab.
    #[must_use]
    pub fn filter_conversations(&self, query: &str, filter: ConversationFilter) -> Vec<Conversation> {
        state::filter_conversations(&self.state.lock().conversations, query, filter)
    }

    /// Tell the client whether the thread view is scrolled to the bottom.
    ///
    /// Incoming messages only request a scroll when it is.
    pub fn set_scrolled_to_bottom(&self, at_bottom: bool) {
        self.state.lock().at_bottom = at_bottom;
    }

    /// Queue a change notification. Dropped if the receiver lags; the next
    /// notification carries the current snapshot anyway.
    fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::trace!(err = %e, "sync event dropped");
        }
    }

    /// Drive the transport's event stream until it closes.
    ///
    /// Per-event failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportUnavailable`] once the transport has
    /// shut down.
    pub async fn run(self: &Arc<Self>) -> Result<(), SyncError> {
        tracing::info!(transport = %self.transport.transport_type(), "sync loop started");
        loop {
            let event = match self.transport.next_event().await {
                Ok(event) => event,
                Err(TransportError::ConnectionClosed) => {
                    tracing::info!("transport closed, sync loop exiting");
                    return Err(SyncError::TransportUnavailable(
                        TransportError::ConnectionClosed,
                    ));
                }
                Err(e) => {
                    tracing::warn!(err = %e, "dropping unreadable transport event");
                    continue;
                }
            };

            if let Err(e) = self.handle_transport_event(event).await {
                tracing::warn!(err = %e, "transport event ignored");
            }
        }
    }

    /// Apply one transport event.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedEvent`] for events that cannot be
    /// routed. State is left untouched in that case.
    pub async fn handle_transport_event(
        self: &Arc<Self>,
        event: TransportEvent,
    ) -> Result<(), SyncError> {
        match event {
            TransportEvent::Connection(state) => {
                self.handle_connection_change(state).await;
                Ok(())
            }
            TransportEvent::Server(event) => self.handle_server_event(event),
            TransportEvent::Conversations(conversations) => {
                self.apply_polled_list(conversations);
                Ok(())
            }
        }
    }

    fn handle_server_event(self: &Arc<Self>, event: ServerEvent) -> Result<(), SyncError> {
        tracing::trace!(event = event.name(), "server event");
        match event {
            ServerEvent::NewMessage(new) => {
                let token = new.temp_id.clone();
                let message = new.into_message();
                if let Some(token) = token {
                    if self.confirm_pending(&token, &message) {
                        return Ok(());
                    }
                }
                self.receive_and_follow_up(message)
            }
            ServerEvent::MessageStatusChanged(update) => {
                self.apply_status(&update.message_id, update.status);
                Ok(())
            }
            ServerEvent::MessageError(rejected) => match rejected.temp_id {
                Some(token) => {
                    if self.fail_pending(&token, &rejected.error) {
                        Ok(())
                    } else {
                        Err(SyncError::MalformedEvent(format!(
                            "message_error for unknown token {token}"
                        )))
                    }
                }
                None => {
                    tracing::warn!(error = %rejected.error, "server refused a send without a token");
                    Ok(())
                }
            },
            ServerEvent::UserTyping(notice) => {
                self.remote_typing_started(&notice);
                Ok(())
            }
            ServerEvent::UserStoppedTyping(notice) => {
                self.remote_typing_stopped(&notice);
                Ok(())
            }
            ServerEvent::PresenceChanged(update) => {
                self.apply_presence(&update);
                Ok(())
            }
        }
    }
}

impl<T, A> Drop for SyncClient<T, A> {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
        self.typing.get_mut().abort_timer();
    }
}
