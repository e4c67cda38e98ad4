//! Transport layer abstraction for convsync.
//!
//! Defines the [`Transport`] trait every push-capable channel satisfies.
//! Concrete implementations:
//! - [`push::PushTransport`]: WebSocket push channel with automatic reconnect
//! - [`polling::PollingTransport`]: REST-only fallback that polls the list and the active page
//! - [`loopback::LoopbackTransport`]: in-process channels for tests

pub mod loopback;
pub mod polling;
pub mod push;

use std::fmt;

use convsync_proto::codec::CodecError;
use convsync_proto::conversation::Conversation;
use convsync_proto::event::{OutgoingMessage, ServerEvent};
use convsync_proto::message::ConversationId;
use convsync_proto::typing::TypingSignal;

use crate::api::ApiError;

/// Describes which kind of transport is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// WebSocket push channel.
    Push,
    /// REST polling.
    Polling,
    /// In-process loopback for testing.
    Loopback,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "Push"),
            Self::Polling => write!(f, "Polling"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Health of the push channel as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Events flow in real time.
    Connected,
    /// The channel is down and no reconnect is in progress.
    Disconnected,
    /// The channel is down and the transport is trying to restore it.
    Reconnecting,
}

impl ConnectionState {
    /// Whether real-time events are flowing.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Whether a typing signal marks the start or the end of a burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingPhase {
    /// `typing_start`.
    Start,
    /// `typing_stop`.
    Stop,
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame pushed by the server.
    Server(ServerEvent),
    /// The channel changed state.
    Connection(ConnectionState),
    /// A conversation list fetched by a polling transport, sent when it
    /// differs from the previous one.
    Conversations(Vec<Conversation>),
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The channel is closed, or the transport has shut down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint URL is unusable.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// A frame could not be encoded or decoded.
    #[error("frame codec error: {0}")]
    Codec(#[from] CodecError),

    /// The REST backend refused or failed a request.
    #[error("backend request failed: {0}")]
    Api(#[from] ApiError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async transport carrying conversation events between client and server.
///
/// The transport owns the wire: connection lifecycle, framing, reconnects.
/// It never interprets events; reconciliation happens in
/// [`crate::sync::SyncClient`].
pub trait Transport: Send + Sync {
    /// Start receiving events for a conversation.
    fn subscribe(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Stop receiving events for a conversation.
    fn unsubscribe(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Hand a message to the channel.
    ///
    /// Returns `Ok(())` once the message has been handed off. This does NOT
    /// mean the server stored it: confirmation arrives later as a
    /// `new_message` event echoing the correlation token.
    fn send(
        &self,
        message: &OutgoingMessage,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Tell the other participant the local user started or stopped typing.
    fn signal_typing(
        &self,
        signal: &TypingSignal,
        phase: TypingPhase,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next event.
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the transport has
    /// shut down for good; other errors are per-event and the caller may
    /// keep reading.
    fn next_event(
        &self,
    ) -> impl std::future::Future<Output = Result<TransportEvent, TransportError>> + Send;

    /// Return the type of this transport.
    fn transport_type(&self) -> TransportType;
}
