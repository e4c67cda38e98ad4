//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to stand in for the push
//! channel. Created via [`LoopbackTransport::create_pair`], which returns the
//! client-side transport and a [`LoopbackServer`] handle: frames the client
//! emits arrive at the handle, events the handle pushes arrive at the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};

use convsync_proto::event::{ClientFrame, NewMessage, OutgoingMessage, SendRejected, ServerEvent};
use convsync_proto::message::{ConversationId, Message, MessageId, MessageStatus, UserId};
use convsync_proto::typing::TypingSignal;

use super::{ConnectionState, Transport, TransportError, TransportEvent, TransportType, TypingPhase};

/// Link flags shared by both ends.
#[derive(Debug)]
struct Link {
    connected: AtomicBool,
    reject_sends: AtomicBool,
}

/// Client end of an in-process channel.
pub struct LoopbackTransport {
    /// Frames emitted by the client (delivered to the server handle).
    frames_tx: mpsc::Sender<ClientFrame>,
    /// Events pushed by the server handle.
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    link: Arc<Link>,
}

/// Server end of an in-process channel, driven by tests.
pub struct LoopbackServer {
    events_tx: mpsc::Sender<TransportEvent>,
    frames_rx: mpsc::Receiver<ClientFrame>,
    link: Arc<Link>,
}

impl LoopbackTransport {
    /// Create a connected client transport and its server handle.
    ///
    /// The `buffer` parameter controls the channel capacity for each
    /// direction.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use convsync::transport::loopback::LoopbackTransport;
    /// use convsync::transport::Transport;
    /// use convsync_proto::message::ConversationId;
    ///
    /// # async fn example() {
    /// let (transport, mut server) = LoopbackTransport::create_pair(32);
    /// transport.subscribe(&ConversationId::new("3_7")).await.unwrap();
    /// let frame = server.next_frame().await.unwrap();
    /// # }
    /// ```
    #[must_use]
    pub fn create_pair(buffer: usize) -> (Self, LoopbackServer) {
        let (frames_tx, frames_rx) = mpsc::channel(buffer);
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let link = Arc::new(Link {
            connected: AtomicBool::new(true),
            reject_sends: AtomicBool::new(false),
        });

        let transport = Self {
            frames_tx,
            events_rx: Mutex::new(events_rx),
            link: Arc::clone(&link),
        };
        let server = LoopbackServer {
            events_tx,
            frames_rx,
            link,
        };
        (transport, server)
    }

    async fn emit(&self, frame: ClientFrame) -> Result<(), TransportError> {
        if !self.link.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        self.frames_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

impl Transport for LoopbackTransport {
    async fn subscribe(&self, conversation: &ConversationId) -> Result<(), TransportError> {
        self.emit(ClientFrame::JoinConversation {
            conversation_id: conversation.clone(),
        })
        .await
    }

    async fn unsubscribe(&self, conversation: &ConversationId) -> Result<(), TransportError> {
        self.emit(ClientFrame::LeaveConversation {
            conversation_id: conversation.clone(),
        })
        .await
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        if self.link.reject_sends.load(Ordering::Relaxed) {
            return Err(TransportError::Io(std::io::Error::other(
                "loopback send rejected",
            )));
        }
        self.emit(ClientFrame::SendMessage(message.clone())).await
    }

    async fn signal_typing(
        &self,
        signal: &TypingSignal,
        phase: TypingPhase,
    ) -> Result<(), TransportError> {
        let frame = match phase {
            TypingPhase::Start => ClientFrame::TypingStart(signal.clone()),
            TypingPhase::Stop => ClientFrame::TypingStop(signal.clone()),
        };
        self.emit(frame).await
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        let mut rx = self.events_rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}

impl LoopbackServer {
    /// Push a server event to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client end is gone.
    pub async fn push(&self, event: ServerEvent) -> Result<(), TransportError> {
        self.events_tx
            .send(TransportEvent::Server(event))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Change the link state and report it to the client.
    ///
    /// While not connected, every client frame fails with
    /// [`TransportError::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client end is gone.
    pub async fn set_connection(&self, state: ConnectionState) -> Result<(), TransportError> {
        self.link
            .connected
            .store(state.is_connected(), Ordering::Relaxed);
        self.events_tx
            .send(TransportEvent::Connection(state))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Make subsequent client sends fail immediately.
    pub fn reject_sends(&self, reject: bool) {
        self.link.reject_sends.store(reject, Ordering::Relaxed);
    }

    /// Wait for the next frame the client emitted.
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        self.frames_rx.recv().await
    }

    /// Every frame emitted so far and not yet consumed.
    pub fn drain_frames(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames_rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Confirm an outgoing message the way the server does: store it under
    /// `id` and echo the correlation token back to the sender.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client end is gone.
    pub async fn acknowledge(
        &self,
        outgoing: &OutgoingMessage,
        id: MessageId,
        sender: UserId,
    ) -> Result<Message, TransportError> {
        let message = Message {
            id,
            conversation_id: None,
            sender_id: sender,
            receiver_id: Some(outgoing.receiver_id.clone()),
            content: outgoing.content.clone(),
            created_at: Utc::now(),
            status: MessageStatus::Sent,
            read_at: None,
        };
        self.push(ServerEvent::NewMessage(NewMessage {
            message: message.clone(),
            conversation_id: outgoing.conversation_id.clone(),
            sender: None,
            temp_id: Some(outgoing.temp_id.clone()),
        }))
        .await?;
        Ok(message)
    }

    /// Refuse an outgoing message with `message_error`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client end is gone.
    pub async fn reject(
        &self,
        outgoing: &OutgoingMessage,
        error: impl Into<String>,
    ) -> Result<(), TransportError> {
        self.push(ServerEvent::MessageError(SendRejected {
            temp_id: Some(outgoing.temp_id.clone()),
            error: error.into(),
        }))
        .await
    }
}
