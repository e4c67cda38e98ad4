//! Inbound messages, delivery status updates and presence.

use std::sync::Arc;

use convsync_proto::message::{Message, MessageId, MessageStatus};
use convsync_proto::presence::PresenceUpdate;

use super::state::{ThreadEntry, ThreadPhase};
use super::{SyncClient, SyncError, SyncEvent};
use crate::api::ConversationApi;
use crate::transport::Transport;

/// What [`SyncClient::receive_message`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Already known; nothing changed.
    Duplicate,
    /// Appended to the active thread.
    Appended {
        /// Whether the view was at the bottom and should follow.
        scroll_to_bottom: bool,
    },
    /// Took the place of an unconfirmed own entry with the same content.
    ConfirmedPending,
    /// Counted against a conversation that is not on screen.
    Elsewhere,
    /// Belongs to a conversation missing from the list.
    UnknownConversation,
}

impl<T, A> SyncClient<T, A>
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    /// Reconcile a confirmed message from the server.
    ///
    /// Idempotent: a message whose id is already in the active thread, or
    /// was already counted for another conversation, changes nothing. For
    /// the active conversation the message is appended; otherwise the
    /// conversation's preview is updated, its unread count goes up by one
    /// (for messages from the other party) and it moves to the top.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedEvent`] if the message does not say
    /// which conversation it belongs to.
    pub fn receive_message(&self, message: Message) -> Result<Received, SyncError> {
        let Some(conversation_id) = message.conversation_id.clone() else {
            return Err(SyncError::MalformedEvent(format!(
                "message {} carries no conversation id",
                message.id
            )));
        };
        let from_other = message.sender_id != self.user_id;

        let received = {
            let mut state = self.state.lock();
            if state.is_active(&conversation_id) {
                if state.thread_position(&message.id).is_some() {
                    Received::Duplicate
                } else {
                    state.seen.insert(&message.id);
                    if state.phase == ThreadPhase::Loading {
                        state.arrived_during_load.insert(message.id.clone());
                    }
                    state.touch_conversation(&conversation_id, &message, false);

                    // An own message can show up without its token when the
                    // acknowledgement was lost (fallback polling); it then
                    // stands in for the matching unconfirmed entry.
                    let stand_in = if from_other {
                        None
                    } else {
                        state
                            .thread
                            .iter()
                            .position(|e| e.is_unconfirmed() && e.content == message.content)
                    };
                    match stand_in {
                        Some(index) => {
                            state.thread[index] = ThreadEntry::confirmed(message);
                            Received::ConfirmedPending
                        }
                        None => {
                            let scroll_to_bottom = state.at_bottom;
                            state.thread.push(ThreadEntry::confirmed(message));
                            Received::Appended { scroll_to_bottom }
                        }
                    }
                }
            } else if !state.seen.insert(&message.id) {
                Received::Duplicate
            } else if state.touch_conversation(&conversation_id, &message, from_other) {
                if from_other {
                    self.emit(SyncEvent::IncomingMessage {
                        conversation_id: conversation_id.clone(),
                        sender_id: message.sender_id.clone(),
                        content: message.content.clone(),
                    });
                }
                Received::Elsewhere
            } else {
                Received::UnknownConversation
            }
        };

        match received {
            Received::Duplicate => {
                tracing::debug!(conversation_id = %conversation_id, "duplicate message ignored");
            }
            Received::Appended { scroll_to_bottom } => {
                self.emit(SyncEvent::ThreadChanged { scroll_to_bottom });
                self.emit(SyncEvent::ConversationsChanged);
            }
            Received::ConfirmedPending => {
                self.emit(SyncEvent::ThreadChanged {
                    scroll_to_bottom: false,
                });
                self.emit(SyncEvent::ConversationsChanged);
            }
            Received::Elsewhere => {
                self.emit(SyncEvent::ConversationsChanged);
            }
            Received::UnknownConversation => {
                tracing::debug!(conversation_id = %conversation_id, "message for a conversation not in the list");
            }
        }
        Ok(received)
    }

    /// Receive, then issue the follow-up requests a message calls for: a
    /// read receipt when it lands in the active thread from the other
    /// party, a list reload when its conversation is unknown.
    pub(crate) fn receive_and_follow_up(self: &Arc<Self>, message: Message) -> Result<(), SyncError> {
        let id = message.id.clone();
        let from_other = message.sender_id != self.user_id;
        match self.receive_message(message)? {
            Received::Appended { .. } if from_other => self.spawn_mark_message_read(id),
            Received::UnknownConversation => self.spawn_list_reload(),
            _ => {}
        }
        Ok(())
    }

    /// Move a message in the active thread forward in its lifecycle.
    ///
    /// Regressions and updates for messages not on screen are ignored.
    pub(crate) fn apply_status(&self, id: &MessageId, status: MessageStatus) {
        let changed = {
            let mut state = self.state.lock();
            match state.thread_position(id) {
                Some(index) => state.thread[index].status.advance(status),
                None => {
                    tracing::debug!(message_id = %id, %status, "status update for a message not on screen");
                    false
                }
            }
        };
        if changed {
            tracing::debug!(message_id = %id, %status, "message status advanced");
            self.emit(SyncEvent::ThreadChanged {
                scroll_to_bottom: false,
            });
        }
    }

    /// Update the presence of every listed participant matching `update`.
    pub(crate) fn apply_presence(&self, update: &PresenceUpdate) {
        let (matched, in_thread) = {
            let mut state = self.state.lock();
            let mut matched = false;
            for conversation in &mut state.conversations {
                let participant = &mut conversation.other_participant;
                if participant.id == update.user_id {
                    participant.online = update.online;
                    if update.last_seen_at.is_some() {
                        participant.last_seen_at = update.last_seen_at;
                    }
                    matched = true;
                }
            }
            (matched, state.receiver().as_ref() == Some(&update.user_id))
        };

        if !matched {
            tracing::trace!(user_id = %update.user_id, "presence for a user not in the list");
            return;
        }
        tracing::debug!(user_id = %update.user_id, status = %update.status(), "presence changed");
        self.emit(SyncEvent::ConversationsChanged);
        if in_thread {
            self.emit(SyncEvent::ThreadChanged {
                scroll_to_bottom: false,
            });
        }
    }

    /// Reload the conversation list in the background.
    pub(crate) fn spawn_list_reload(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let Some(client) = weak.upgrade() else {
                return;
            };
            if let Err(e) = client.load_conversations().await {
                tracing::debug!(err = %e, "list reload after unknown conversation failed");
            }
        });
    }
}
