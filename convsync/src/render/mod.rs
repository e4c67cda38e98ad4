//! Rendering seam.
//!
//! The sync core emits [`SyncEvent`]s and exposes snapshots; a
//! [`Renderer`] turns snapshots into output. [`render_loop`] connects the
//! two. [`text::TextRenderer`] is the line-mode renderer used by the
//! binary; [`format`] holds helpers for HTML and text renderers alike.

pub mod format;
pub mod text;

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;

use convsync_proto::message::{ConversationId, CorrelationToken, UserId};

use crate::api::ConversationApi;
use crate::sync::state::{ListSnapshot, ThreadSnapshot};
use crate::sync::{SyncClient, SyncEvent};
use crate::transport::{ConnectionState, Transport};

/// Maps sync snapshots to some output.
///
/// Every call carries the full current state; implementations decide what
/// to redraw.
pub trait Renderer {
    /// The conversation list changed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the output cannot be written.
    fn render_conversations(&mut self, list: &ListSnapshot) -> io::Result<()>;

    /// The active thread changed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the output cannot be written.
    fn render_thread(&mut self, thread: &ThreadSnapshot, scroll_to_bottom: bool) -> io::Result<()>;

    /// The other participant started or stopped typing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the output cannot be written.
    fn render_typing(&mut self, conversation_id: &ConversationId, typing: bool) -> io::Result<()>;

    /// The push channel changed state.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the output cannot be written.
    fn render_connection(&mut self, state: ConnectionState) -> io::Result<()>;

    /// A send failed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the output cannot be written.
    fn render_failure(&mut self, token: &CorrelationToken, reason: &str) -> io::Result<()>;

    /// A message arrived in a conversation that is not on screen.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the output cannot be written.
    fn render_incoming(
        &mut self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
    ) -> io::Result<()>;
}

/// Feed `events` to `renderer` until the channel closes.
///
/// # Errors
///
/// Returns the first I/O error the renderer reports.
pub async fn render_loop<T, A, R>(
    client: Arc<SyncClient<T, A>>,
    mut events: mpsc::Receiver<SyncEvent>,
    mut renderer: R,
) -> io::Result<()>
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
    R: Renderer,
{
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::ConversationsChanged => {
                renderer.render_conversations(&client.conversations())?;
            }
            SyncEvent::ThreadChanged { scroll_to_bottom } => {
                renderer.render_thread(&client.thread(), scroll_to_bottom)?;
            }
            SyncEvent::TypingChanged {
                conversation_id,
                typing,
            } => renderer.render_typing(&conversation_id, typing)?,
            SyncEvent::ConnectionChanged(state) => renderer.render_connection(state)?,
            SyncEvent::MessageFailed { token, reason } => {
                renderer.render_failure(&token, &reason)?;
            }
            SyncEvent::IncomingMessage {
                conversation_id,
                sender_id,
                content,
            } => renderer.render_incoming(&conversation_id, &sender_id, &content)?,
        }
    }
    tracing::debug!("sync event channel closed, render loop exiting");
    Ok(())
}
