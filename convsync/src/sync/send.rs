//! Optimistic sends.
//!
//! A send shows up in the thread immediately as `sending`, keyed by a fresh
//! correlation token. The server's `new_message` echo carrying that token
//! replaces it in place with the stored message; a `message_error`, a
//! refused transport send, or `ack_timeout` without either marks it
//! `failed`, from where [`SyncClient::retry_message`] can send it again.

use std::sync::Arc;

use convsync_proto::event::OutgoingMessage;
use convsync_proto::message::{
    ConversationId, CorrelationToken, Message, MessageStatus, UserId, ValidationError,
    validate_content,
};

use super::state::{PendingSlot, ThreadEntry};
use super::{SyncClient, SyncError, SyncEvent};
use crate::api::ConversationApi;
use crate::transport::Transport;

/// What an acknowledgement did to its pending entry.
enum Confirmation {
    /// Replaced in place in the active thread.
    Replaced,
    /// The stored message was already on screen; the local copy went away.
    Merged,
    /// Acknowledged while its conversation was not on screen.
    Parked,
}

impl<T, A> SyncClient<T, A>
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    /// Send `content` to the active conversation.
    ///
    /// Returns the correlation token of the new entry, or `None` when
    /// there is nothing to do (blank input, no conversation selected).
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] if the content is too long; nothing is
    ///   added to the thread.
    /// - [`SyncError::SendFailed`] if the transport refused the frame; the
    ///   entry stays in the thread as `failed`.
    pub async fn send_message(
        self: &Arc<Self>,
        content: &str,
    ) -> Result<Option<CorrelationToken>, SyncError> {
        let content = match validate_content(content) {
            Ok(content) => content.to_owned(),
            Err(ValidationError::Empty) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let chars = content.chars().count();
        if chars > self.config.max_content_chars {
            return Err(ValidationError::TooLong {
                chars,
                max: self.config.max_content_chars,
            }
            .into());
        }

        let Some((conversation_id, receiver_id)) = self.send_target() else {
            tracing::debug!("no conversation selected, nothing sent");
            return Ok(None);
        };

        self.stop_typing().await;

        let token = CorrelationToken::new();
        {
            let mut state = self.state.lock();
            state.thread.push(ThreadEntry::pending(
                token.clone(),
                self.user_id.clone(),
                content.clone(),
            ));
            state.at_bottom = true;
        }
        self.emit(SyncEvent::ThreadChanged {
            scroll_to_bottom: true,
        });

        self.dispatch(OutgoingMessage {
            conversation_id,
            receiver_id,
            content,
            temp_id: token.clone(),
        })
        .await?;
        Ok(Some(token))
    }

    /// Send a `failed` message again under a new token.
    ///
    /// The failed entry is removed and a new `sending` entry with the same
    /// content is appended.
    ///
    /// # Errors
    ///
    /// - [`SyncError::UnknownMessage`] if no failed entry in the active
    ///   thread carries `token`.
    /// - [`SyncError::SendFailed`] as for [`send_message`](Self::send_message).
    pub async fn retry_message(
        self: &Arc<Self>,
        token: &CorrelationToken,
    ) -> Result<CorrelationToken, SyncError> {
        let outgoing = {
            let mut state = self.state.lock();
            let index = state
                .thread
                .iter()
                .position(|e| e.token() == Some(token) && e.status == MessageStatus::Failed)
                .ok_or_else(|| SyncError::UnknownMessage(token.clone()))?;
            let (Some(conversation_id), Some(receiver_id)) = (state.active.clone(), state.receiver())
            else {
                return Err(SyncError::UnknownMessage(token.clone()));
            };

            let failed = state.thread.remove(index);
            let retry = CorrelationToken::new();
            state.thread.push(ThreadEntry::pending(
                retry.clone(),
                self.user_id.clone(),
                failed.content.clone(),
            ));
            state.at_bottom = true;
            OutgoingMessage {
                conversation_id,
                receiver_id,
                content: failed.content,
                temp_id: retry,
            }
        };

        tracing::info!(previous = %token, token = %outgoing.temp_id, "retrying message");
        self.emit(SyncEvent::ThreadChanged {
            scroll_to_bottom: true,
        });

        let retry = outgoing.temp_id.clone();
        self.dispatch(outgoing).await?;
        Ok(retry)
    }

    fn send_target(&self) -> Option<(ConversationId, UserId)> {
        let state = self.state.lock();
        Some((state.active.clone()?, state.receiver()?))
    }

    /// Arm the acknowledgement timeout and hand the frame to the transport.
    async fn dispatch(self: &Arc<Self>, outgoing: OutgoingMessage) -> Result<(), SyncError> {
        self.arm_ack_timeout(outgoing.temp_id.clone());
        tracing::debug!(
            token = %outgoing.temp_id,
            conversation_id = %outgoing.conversation_id,
            "sending message"
        );

        match self.transport.send(&outgoing).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail_pending(&outgoing.temp_id, &e.to_string());
                Err(SyncError::SendFailed {
                    token: outgoing.temp_id,
                    source: e,
                })
            }
        }
    }

    fn arm_ack_timeout(self: &Arc<Self>, token: CorrelationToken) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.ack_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(client) = weak.upgrade() {
                client.expire_pending(&token);
            }
        });
    }

    /// Fail the entry for `token` if it is still waiting for its ack.
    fn expire_pending(&self, token: &CorrelationToken) {
        let waiting = {
            let state = self.state.lock();
            state.find_pending(token).is_some_and(|slot| {
                let entry = match &slot {
                    PendingSlot::Active(index) => state.thread.get(*index),
                    PendingSlot::Parked(conversation, index) => {
                        state.parked.get(conversation).and_then(|e| e.get(*index))
                    }
                };
                entry.is_some_and(|e| e.status == MessageStatus::Sending)
            })
        };
        if waiting {
            tracing::warn!(%token, timeout = ?self.config.ack_timeout, "no acknowledgement, marking message failed");
            self.fail_pending(token, "no acknowledgement from server");
        }
    }

    /// Mark the entry for `token` failed. Returns whether the token belongs
    /// to an unconfirmed entry.
    pub(crate) fn fail_pending(&self, token: &CorrelationToken, reason: &str) -> bool {
        let (failed_on_screen, failed) = {
            let mut state = self.state.lock();
            let Some(slot) = state.find_pending(token) else {
                return false;
            };
            let on_screen = matches!(slot, PendingSlot::Active(_));
            let failed = state.pending_entry_mut(&slot).is_some_and(|entry| {
                let changed = entry.status.advance(MessageStatus::Failed);
                if changed {
                    entry.failure = Some(reason.to_owned());
                }
                changed
            });
            (on_screen && failed, failed)
        };

        if failed {
            tracing::warn!(%token, reason, "message failed");
            self.emit(SyncEvent::MessageFailed {
                token: token.clone(),
                reason: reason.to_owned(),
            });
        }
        if failed_on_screen {
            self.emit(SyncEvent::ThreadChanged {
                scroll_to_bottom: false,
            });
        }
        true
    }

    /// Resolve the unconfirmed entry for `token` with the stored `message`.
    ///
    /// An ack that arrives after the entry was marked `failed` still wins:
    /// the server has the message, so the entry becomes confirmed. Returns
    /// `false` if no unconfirmed entry carries `token`.
    pub(crate) fn confirm_pending(&self, token: &CorrelationToken, message: &Message) -> bool {
        let confirmation = {
            let mut state = self.state.lock();
            let Some(slot) = state.find_pending(token) else {
                return false;
            };

            state.seen.insert(&message.id);
            if let Some(conversation_id) = &message.conversation_id {
                state.touch_conversation(conversation_id, message, false);
            }

            match slot {
                PendingSlot::Active(index) => {
                    if state.thread_position(&message.id).is_some() {
                        state.thread.remove(index);
                        Confirmation::Merged
                    } else {
                        let mut entry = ThreadEntry::confirmed(message.clone());
                        entry.status.advance(MessageStatus::Sent);
                        state.thread[index] = entry;
                        Confirmation::Replaced
                    }
                }
                PendingSlot::Parked(conversation_id, index) => {
                    state.remove_parked(&conversation_id, index);
                    Confirmation::Parked
                }
            }
        };

        tracing::debug!(%token, message_id = %message.id, "message acknowledged");
        if !matches!(confirmation, Confirmation::Parked) {
            self.emit(SyncEvent::ThreadChanged {
                scroll_to_bottom: false,
            });
        }
        self.emit(SyncEvent::ConversationsChanged);
        true
    }
}
