//! Connection changes, resync and fallback polling.
//!
//! While the push channel is down the client polls the active page and
//! the conversation list every `poll_interval`. When it comes back,
//! polling stops and both are reloaded once; message ids absorb anything
//! seen twice.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};

use super::{SyncClient, SyncEvent};
use crate::api::ConversationApi;
use crate::transport::{ConnectionState, Transport, TransportType};

impl<T, A> SyncClient<T, A>
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    /// React to a change of the real-time channel.
    ///
    /// Losing the channel starts fallback polling; getting it back stops
    /// polling and resyncs the list and the active page once.
    pub async fn handle_connection_change(self: &Arc<Self>, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.state.lock().connection, state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "connection state changed");
            self.emit(SyncEvent::ConnectionChanged(state));
        }

        match state {
            ConnectionState::Connected => {
                self.stop_fallback_polling();
                if previous != ConnectionState::Connected {
                    self.resync().await;
                }
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                self.start_fallback_polling();
            }
        }
    }

    /// Reload the conversation list and the active page.
    ///
    /// Failures are logged; the panels keep what they show.
    pub async fn resync(&self) {
        tracing::debug!("resyncing");
        if let Err(e) = self.load_conversations().await {
            tracing::warn!(err = %e, "list resync failed");
        }
        if let Err(e) = self.reload_active().await {
            tracing::warn!(err = %e, "thread resync failed");
        }
    }

    /// Whether the fallback poller is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn start_fallback_polling(self: &Arc<Self>) {
        // A polling transport fetches the list and the page itself.
        if self.transport.transport_type() == TransportType::Polling {
            return;
        }
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.config.poll_interval;
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(client) = weak.upgrade() else {
                    break;
                };
                client.poll_once().await;
            }
        }));
        tracing::info!(interval = ?period, "fallback polling started");
    }

    fn stop_fallback_polling(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
            tracing::info!("fallback polling stopped");
        }
    }

    /// One fallback round: new messages of the active page, then the list.
    async fn poll_once(self: &Arc<Self>) {
        if let Some(conversation) = self.active_conversation() {
            match self.api.fetch_messages(&conversation).await {
                Ok(page) => {
                    if self.active_conversation().as_ref() == Some(&conversation) {
                        for mut message in page {
                            message.conversation_id = Some(conversation.clone());
                            if let Err(e) = self.receive_and_follow_up(message) {
                                tracing::debug!(err = %e, "polled message skipped");
                            }
                        }
                    } else {
                        tracing::debug!(conversation_id = %conversation, "selection changed during poll");
                    }
                }
                Err(e) => {
                    tracing::debug!(conversation_id = %conversation, err = %e, "fallback poll failed");
                }
            }
        }

        if let Err(e) = self.load_conversations().await {
            tracing::debug!(err = %e, "fallback list poll failed");
        }
    }
}
