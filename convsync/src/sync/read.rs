//! Read receipts.
//!
//! Counts are cleared locally first. A failed request is logged and the
//! local count stays cleared; the next list load brings the server's view
//! back.

use std::sync::Arc;

use convsync_proto::message::{ConversationId, MessageId};

use super::{SyncClient, SyncEvent};
use crate::api::ConversationApi;
use crate::transport::Transport;

impl<T, A> SyncClient<T, A>
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    /// Mark every message of `id` read.
    pub async fn mark_conversation_read(&self, id: &ConversationId) {
        let cleared = {
            let mut state = self.state.lock();
            state.conversation_mut(id).is_some_and(|c| {
                let had_unread = c.unread_count > 0;
                c.unread_count = 0;
                had_unread
            })
        };
        if cleared {
            self.emit(SyncEvent::ConversationsChanged);
        }

        if let Err(e) = self.api.mark_conversation_read(id).await {
            tracing::warn!(conversation_id = %id, err = %e, "mark read failed");
        }
    }

    /// Mark every conversation read.
    pub async fn mark_all_read(&self) {
        let cleared = {
            let mut state = self.state.lock();
            let mut cleared = false;
            for conversation in &mut state.conversations {
                cleared |= conversation.unread_count > 0;
                conversation.unread_count = 0;
            }
            cleared
        };
        if cleared {
            self.emit(SyncEvent::ConversationsChanged);
        }

        if let Err(e) = self.api.mark_all_read().await {
            tracing::warn!(err = %e, "mark all read failed");
        }
    }

    /// Send a read receipt for one message in the background.
    pub(crate) fn spawn_mark_message_read(self: &Arc<Self>, id: MessageId) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let Some(client) = weak.upgrade() else {
                return;
            };
            if let Err(e) = client.api.mark_message_read(&id).await {
                tracing::debug!(message_id = %id, err = %e, "read receipt failed");
            }
        });
    }
}
