//! Choosing, loading and closing the active conversation.

use std::sync::Arc;

use convsync_proto::conversation::Conversation;
use convsync_proto::message::ConversationId;

use super::state::{ListPhase, LoadTicket, ThreadPhase};
use super::{SyncClient, SyncError, SyncEvent};
use crate::api::ConversationApi;
use crate::transport::Transport;

/// How a page load treats the thread phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    /// First load after selection or retry: failure puts the thread in
    /// its error state.
    Initial,
    /// Background refresh of an already shown thread: failure keeps what
    /// is on screen.
    Refresh,
}

enum Selection {
    Unchanged,
    Retry,
    Switch {
        previous: Option<ConversationId>,
        ticket: LoadTicket,
    },
}

impl<T, A> SyncClient<T, A>
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    /// Make `id` the active conversation.
    ///
    /// Subscribes to its real-time events, loads its page and marks it
    /// read. Selecting the conversation already on screen does nothing,
    /// unless its load failed, in which case the load is retried.
    ///
    /// Unconfirmed sends of the previous conversation are kept aside and
    /// come back when it is selected again.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if `id` is not in the list; the view does
    ///   not change.
    /// - [`SyncError::LoadFailed`] if the page could not be fetched; the
    ///   thread is left in its error state.
    pub async fn select_conversation(self: &Arc<Self>, id: &ConversationId) -> Result<(), SyncError> {
        let selection = {
            let mut state = self.state.lock();
            if state.conversation(id).is_none() {
                return Err(SyncError::NotFound(id.clone()));
            }
            if state.is_active(id) {
                if matches!(state.phase, ThreadPhase::Error(_)) {
                    Selection::Retry
                } else {
                    Selection::Unchanged
                }
            } else {
                state.park_thread();
                let previous = state.active.replace(id.clone());
                state.thread = state.parked.remove(id).unwrap_or_default();
                state.phase = ThreadPhase::Loading;
                state.other_typing = false;
                state.remote_typing_generation += 1;
                state.at_bottom = true;
                Selection::Switch {
                    previous,
                    ticket: state.begin_load(id.clone()),
                }
            }
        };

        match selection {
            Selection::Unchanged => {
                tracing::debug!(conversation_id = %id, "conversation already selected");
                Ok(())
            }
            Selection::Retry => self.retry_load().await,
            Selection::Switch { previous, ticket } => {
                tracing::info!(conversation_id = %id, "conversation selected");
                self.emit(SyncEvent::ThreadChanged {
                    scroll_to_bottom: true,
                });
                self.emit(SyncEvent::ConversationsChanged);

                self.stop_typing().await;
                if let Some(previous) = previous {
                    if let Err(e) = self.transport.unsubscribe(&previous).await {
                        tracing::debug!(conversation_id = %previous, err = %e, "unsubscribe failed");
                    }
                }
                if let Err(e) = self.transport.subscribe(id).await {
                    tracing::warn!(conversation_id = %id, err = %e, "subscribe failed");
                }

                self.load_page(ticket, LoadMode::Initial).await
            }
        }
    }

    /// Load the active conversation's page again after a failure.
    ///
    /// Does nothing unless the thread is in its error state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LoadFailed`] if the page could not be fetched.
    pub async fn retry_load(&self) -> Result<(), SyncError> {
        let ticket = {
            let mut state = self.state.lock();
            let Some(id) = state.active.clone() else {
                return Ok(());
            };
            if !matches!(state.phase, ThreadPhase::Error(_)) {
                return Ok(());
            }
            state.phase = ThreadPhase::Loading;
            state.begin_load(id)
        };

        tracing::info!(conversation_id = %ticket.conversation, "retrying thread load");
        self.emit(SyncEvent::ThreadChanged {
            scroll_to_bottom: false,
        });
        self.load_page(ticket, LoadMode::Initial).await
    }

    /// Deselect the active conversation.
    pub async fn close_conversation(&self) {
        let previous = {
            let mut state = self.state.lock();
            state.park_thread();
            let previous = state.active.take();
            state.phase = ThreadPhase::Idle;
            state.other_typing = false;
            state.remote_typing_generation += 1;
            state.generation += 1;
            previous
        };
        let Some(previous) = previous else {
            return;
        };

        tracing::info!(conversation_id = %previous, "conversation closed");
        self.stop_typing().await;
        self.emit(SyncEvent::ThreadChanged {
            scroll_to_bottom: false,
        });
        self.emit(SyncEvent::ConversationsChanged);
        if let Err(e) = self.transport.unsubscribe(&previous).await {
            tracing::debug!(conversation_id = %previous, err = %e, "unsubscribe failed");
        }
    }

    /// Fetch the conversation list.
    ///
    /// Entries already shown stay visible while the request is in flight
    /// and when it fails.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LoadFailed`] if the request failed; the list is
    /// then in its error state.
    pub async fn load_conversations(&self) -> Result<(), SyncError> {
        self.state.lock().list_phase = ListPhase::Loading;
        self.emit(SyncEvent::ConversationsChanged);

        let result = self.api.list_conversations().await;
        let outcome = {
            let mut state = self.state.lock();
            match result {
                Ok(conversations) => {
                    tracing::debug!(count = conversations.len(), "conversation list loaded");
                    state.install_list(conversations);
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(err = %e, "conversation list failed to load");
                    state.list_phase = ListPhase::Error(e.to_string());
                    Err(SyncError::LoadFailed(e))
                }
            }
        };
        self.emit(SyncEvent::ConversationsChanged);
        outcome
    }

    /// Take a conversation list fetched by a polling transport.
    ///
    /// Conversations whose unread count went up announce their newest
    /// message, as a pushed message elsewhere would. The conversation on
    /// screen stays at zero: its messages are marked read as the page
    /// poll delivers them.
    pub(crate) fn apply_polled_list(&self, conversations: Vec<Conversation>) {
        let incoming = {
            let mut state = self.state.lock();
            let incoming: Vec<SyncEvent> = conversations
                .iter()
                .filter(|c| !state.is_active(&c.id))
                .filter(|c| {
                    state
                        .conversation(&c.id)
                        .is_some_and(|known| c.unread_count > known.unread_count)
                })
                .filter_map(|c| {
                    let last = c.last_message.as_ref()?;
                    let sender_id = last.sender_id.clone()?;
                    (sender_id != self.user_id).then(|| SyncEvent::IncomingMessage {
                        conversation_id: c.id.clone(),
                        sender_id,
                        content: last.content.clone().unwrap_or_default(),
                    })
                })
                .collect();
            state.install_list(conversations);
            if let Some(active) = state.active.clone() {
                if let Some(conversation) = state.conversation_mut(&active) {
                    conversation.unread_count = 0;
                }
            }
            incoming
        };

        tracing::debug!(announced = incoming.len(), "polled conversation list applied");
        self.emit(SyncEvent::ConversationsChanged);
        for event in incoming {
            self.emit(event);
        }
    }

    /// Fetch the active page again without leaving the current view.
    pub(crate) async fn reload_active(&self) -> Result<(), SyncError> {
        let ticket = {
            let mut state = self.state.lock();
            let Some(id) = state.active.clone() else {
                return Ok(());
            };
            state.begin_load(id)
        };
        self.load_page(ticket, LoadMode::Refresh).await
    }

    /// Fetch the page for `ticket` and apply it unless a later selection or
    /// load superseded it.
    ///
    /// Whichever load first shows a selection marks it read, so a refresh
    /// that overtakes the selection's own load still does.
    async fn load_page(&self, ticket: LoadTicket, mode: LoadMode) -> Result<(), SyncError> {
        let result = self.api.fetch_messages(&ticket.conversation).await;

        let outcome = {
            let mut state = self.state.lock();
            if !state.is_current(&ticket) {
                tracing::debug!(conversation_id = %ticket.conversation, "discarding stale page");
                return Ok(());
            }
            match result {
                Ok(page) => {
                    tracing::debug!(
                        conversation_id = %ticket.conversation,
                        count = page.len(),
                        "thread page loaded"
                    );
                    let opened = state.phase == ThreadPhase::Loading;
                    state.apply_page(page, &self.user_id);
                    state.phase = ThreadPhase::Active;
                    Ok((mode == LoadMode::Initial || state.at_bottom, opened))
                }
                Err(e) => {
                    tracing::warn!(conversation_id = %ticket.conversation, err = %e, "thread page failed to load");
                    if mode == LoadMode::Initial || state.phase == ThreadPhase::Loading {
                        state.phase = ThreadPhase::Error(e.to_string());
                    }
                    Err(e)
                }
            }
        };

        match outcome {
            Ok((scroll_to_bottom, opened)) => {
                self.emit(SyncEvent::ThreadChanged { scroll_to_bottom });
                if opened {
                    self.mark_conversation_read(&ticket.conversation).await;
                }
                Ok(())
            }
            Err(e) => {
                self.emit(SyncEvent::ThreadChanged {
                    scroll_to_bottom: false,
                });
                Err(SyncError::LoadFailed(e))
            }
        }
    }
}
