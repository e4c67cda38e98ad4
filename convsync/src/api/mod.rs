//! REST capability of the messaging backend.
//!
//! [`ConversationApi`] is the request/response half of the protocol: the
//! conversation list, message pages, read receipts, and (for the polling
//! transport) sends. Implementations:
//! - [`http::HttpApi`]: `reqwest` client against the real backend
//! - [`memory::InMemoryApi`]: scripted in-process backend for tests

pub mod http;
pub mod memory;

use convsync_proto::api::SendMessageRequest;
use convsync_proto::conversation::Conversation;
use convsync_proto::message::{ConversationId, Message, MessageId};

/// Errors returned by the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never completed (network, TLS, timeout, decoding).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status code.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The `error` field of the body, or the status reason.
        message: String,
    },

    /// The server answered `{"success": false}`.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The configured base URL cannot address the endpoints.
    #[error("invalid base URL: {0}")]
    InvalidUrl(String),

    /// The backend is unreachable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Request/response operations against the messaging backend.
///
/// Every call is a suspension point; callers must not hold locks across
/// them.
pub trait ConversationApi: Send + Sync {
    /// `GET /conversations`: summaries, most recent first.
    fn list_conversations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, ApiError>> + Send;

    /// `GET /conversations/{id}/messages`: the current page, oldest first.
    fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// `POST /conversations/{id}/read`.
    fn mark_conversation_read(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// `POST /conversations/read-all`.
    fn mark_all_read(&self) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// `POST /messages/{id}/read`.
    fn mark_message_read(
        &self,
        message: &MessageId,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// `POST /messages/send`: store a message and return it as confirmed.
    fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> impl std::future::Future<Output = Result<Message, ApiError>> + Send;
}
