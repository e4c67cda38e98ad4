//! REST-only transport.
//!
//! For deployments without a push channel. Sends go through
//! `POST /messages/send`, whose response is turned into the same
//! `new_message` acknowledgement the push channel would deliver.
//!
//! Every interval the transport fetches the conversation list, handing it
//! on when it changed, then the subscribed conversation's page, emitting
//! `new_message` for every message not emitted before. The list request
//! doubles as the link check: a failure reports the link as disconnected,
//! the next success reports it connected again.

use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use convsync_proto::api::SendMessageRequest;
use convsync_proto::conversation::Conversation;
use convsync_proto::event::{NewMessage, OutgoingMessage, ServerEvent};
use convsync_proto::message::ConversationId;
use convsync_proto::typing::TypingSignal;

use super::{ConnectionState, Transport, TransportError, TransportEvent, TransportType, TypingPhase};
use crate::api::ConversationApi;
use crate::sync::state::SeenIds;

/// Message ids remembered per subscription. Well above any page size, so
/// only messages that have left the page are forgotten.
const EMITTED_CAPACITY: usize = 1024;

/// The conversation being polled and what has been emitted for it.
struct Subscription {
    conversation: ConversationId,
    emitted: SeenIds,
}

/// Consumer side, owned by whoever is inside `next_event`.
struct Reader {
    queue: mpsc::UnboundedReceiver<TransportEvent>,
    ticker: Interval,
}

/// REST polling transport implementing the [`Transport`] trait.
pub struct PollingTransport<A> {
    api: A,
    queue: mpsc::UnboundedSender<TransportEvent>,
    reader: Mutex<Reader>,
    subscription: parking_lot::Mutex<Option<Subscription>>,
    emitted_capacity: usize,
    /// Last link state reported, `None` before the first poll.
    link: parking_lot::Mutex<Option<ConnectionState>>,
    /// Last conversation list handed on.
    list: parking_lot::Mutex<Option<Vec<Conversation>>>,
}

impl<A: ConversationApi> PollingTransport<A> {
    /// Poll `api` every `interval`.
    #[must_use]
    pub fn new(api: A, interval: Duration) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            api,
            queue: queue_tx,
            reader: Mutex::new(Reader {
                queue: queue_rx,
                ticker,
            }),
            subscription: parking_lot::Mutex::new(None),
            emitted_capacity: EMITTED_CAPACITY,
            link: parking_lot::Mutex::new(None),
            list: parking_lot::Mutex::new(None),
        }
    }

    fn enqueue(&self, event: TransportEvent) {
        // The receiver lives in `self`, so this cannot fail while we exist.
        let _ = self.queue.send(event);
    }

    fn report_link(&self, state: ConnectionState) {
        let changed = {
            let mut link = self.link.lock();
            let changed = *link != Some(state);
            *link = Some(state);
            changed
        };
        if changed {
            tracing::info!(%state, "polling link state changed");
            self.enqueue(TransportEvent::Connection(state));
        }
    }

    /// One round: the list, then the subscribed page.
    async fn poll(&self) {
        match self.api.list_conversations().await {
            Ok(conversations) => {
                self.report_link(ConnectionState::Connected);
                self.offer_list(conversations);
            }
            Err(e) => {
                tracing::warn!(err = %e, "list poll failed");
                self.report_link(ConnectionState::Disconnected);
                return;
            }
        }
        self.poll_subscribed().await;
    }

    fn offer_list(&self, conversations: Vec<Conversation>) {
        {
            let mut last = self.list.lock();
            if last.as_ref() == Some(&conversations) {
                return;
            }
            *last = Some(conversations.clone());
        }
        tracing::trace!(count = conversations.len(), "conversation list changed");
        self.enqueue(TransportEvent::Conversations(conversations));
    }

    /// Fetch the subscribed page once and queue everything new.
    async fn poll_subscribed(&self) {
        let Some(conversation) = self
            .subscription
            .lock()
            .as_ref()
            .map(|s| s.conversation.clone())
        else {
            return;
        };

        let page = match self.api.fetch_messages(&conversation).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation, err = %e, "page poll failed");
                return;
            }
        };

        let fresh: Vec<_> = {
            let mut subscription = self.subscription.lock();
            let Some(sub) = subscription
                .as_mut()
                .filter(|s| s.conversation == conversation)
            else {
                tracing::debug!(conversation_id = %conversation, "subscription changed during poll");
                return;
            };
            page.into_iter()
                .filter(|m| sub.emitted.insert(&m.id))
                .collect()
        };

        tracing::trace!(conversation_id = %conversation, count = fresh.len(), "poll complete");
        for message in fresh {
            self.enqueue(TransportEvent::Server(ServerEvent::NewMessage(NewMessage {
                message,
                conversation_id: conversation.clone(),
                sender: None,
                temp_id: None,
            })));
        }
    }
}

impl<A: ConversationApi> Transport for PollingTransport<A> {
    async fn subscribe(&self, conversation: &ConversationId) -> Result<(), TransportError> {
        let mut subscription = self.subscription.lock();
        if subscription.as_ref().map(|s| &s.conversation) != Some(conversation) {
            *subscription = Some(Subscription {
                conversation: conversation.clone(),
                emitted: SeenIds::new(self.emitted_capacity),
            });
        }
        Ok(())
    }

    async fn unsubscribe(&self, conversation: &ConversationId) -> Result<(), TransportError> {
        let mut subscription = self.subscription.lock();
        if subscription.as_ref().map(|s| &s.conversation) == Some(conversation) {
            *subscription = None;
        }
        Ok(())
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let request = SendMessageRequest::text(
            message.conversation_id.clone(),
            message.receiver_id.clone(),
            message.content.clone(),
            message.temp_id.clone(),
        );
        let stored = self.api.send_message(&request).await?;

        if let Some(sub) = self
            .subscription
            .lock()
            .as_mut()
            .filter(|s| s.conversation == message.conversation_id)
        {
            sub.emitted.insert(&stored.id);
        }

        self.enqueue(TransportEvent::Server(ServerEvent::NewMessage(NewMessage {
            message: stored,
            conversation_id: message.conversation_id.clone(),
            sender: None,
            temp_id: Some(message.temp_id.clone()),
        })));
        Ok(())
    }

    async fn signal_typing(
        &self,
        signal: &TypingSignal,
        phase: TypingPhase,
    ) -> Result<(), TransportError> {
        tracing::trace!(
            conversation_id = %signal.conversation_id,
            ?phase,
            "typing signals are not carried over REST"
        );
        Ok(())
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            if let Ok(event) = reader.queue.try_recv() {
                return Ok(event);
            }
            let Reader { queue, ticker } = &mut *reader;
            tokio::select! {
                event = queue.recv() => {
                    return event.ok_or(TransportError::ConnectionClosed);
                }
                _ = ticker.tick() => {}
            }
            self.poll().await;
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Polling
    }
}
