//! Line-mode renderer.
//!
//! Appends to a plain [`Write`]: new messages as lines, status changes as
//! short follow-up lines, the conversation list whenever its order or
//! counts change.

use std::collections::HashMap;
use std::io::{self, Write};

use convsync_proto::conversation::Participant;
use convsync_proto::message::{ConversationId, CorrelationToken, MessageStatus, UserId};

use super::Renderer;
use super::format::{format_time, presence_label, status_symbol, truncate_preview};
use crate::sync::state::{ListPhase, ListSnapshot, MessageKey, ThreadEntry, ThreadPhase, ThreadSnapshot};
use crate::transport::ConnectionState;

/// Renders snapshots as text lines.
pub struct TextRenderer<W> {
    out: W,
    user_id: UserId,
    timestamp_format: String,
    preview_chars: usize,
    shown: Option<ConversationId>,
    phase: Option<ThreadPhase>,
    printed: HashMap<MessageKey, MessageStatus>,
    list_signature: Option<Vec<(ConversationId, u32)>>,
}

impl<W: Write> TextRenderer<W> {
    /// Render for `user_id` into `out`.
    pub fn new(out: W, user_id: UserId) -> Self {
        Self {
            out,
            user_id,
            timestamp_format: "%H:%M".to_string(),
            preview_chars: super::format::PREVIEW_CHARS,
            shown: None,
            phase: None,
            printed: HashMap::new(),
            list_signature: None,
        }
    }

    /// Use a `chrono` format string for message times.
    #[must_use]
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Cut list previews after `chars` characters.
    #[must_use]
    pub const fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// The underlying writer.
    pub const fn get_ref(&self) -> &W {
        &self.out
    }

    fn sender_label<'a>(&self, entry: &ThreadEntry, participant: Option<&'a Participant>) -> &'a str {
        if entry.sender_id == self.user_id {
            "You"
        } else {
            participant.map_or("Them", |p| p.name.as_str())
        }
    }

    fn write_entry(&mut self, entry: &ThreadEntry, participant: Option<&Participant>) -> io::Result<()> {
        let time = format_time(entry.created_at, &self.timestamp_format);
        let sender = self.sender_label(entry, participant);
        let status = if entry.sender_id == self.user_id {
            format!(" {}", status_symbol(entry.status))
        } else {
            String::new()
        };
        writeln!(self.out, "[{time}] {sender}: {}{status}", entry.content)?;
        if let Some(reason) = &entry.failure {
            writeln!(self.out, "        not sent: {reason} (/retry)")?;
        }
        Ok(())
    }

    fn write_header(&mut self, thread: &ThreadSnapshot) -> io::Result<()> {
        match (&thread.conversation_id, &thread.participant) {
            (Some(_), Some(p)) => {
                writeln!(self.out, "=== {} ({}) ===", p.name, presence_label(p.presence()))
            }
            (Some(id), None) => writeln!(self.out, "=== conversation {id} ==="),
            (None, _) => writeln!(self.out, "=== no conversation selected ==="),
        }
    }
}

impl<W: Write> Renderer for TextRenderer<W> {
    fn render_conversations(&mut self, list: &ListSnapshot) -> io::Result<()> {
        match &list.phase {
            ListPhase::NotLoaded | ListPhase::Loading => return Ok(()),
            ListPhase::Error(e) => {
                return writeln!(self.out, "! could not load conversations: {e}");
            }
            ListPhase::Ready => {}
        }

        let signature: Vec<_> = list
            .conversations
            .iter()
            .map(|c| (c.id.clone(), c.unread_count))
            .collect();
        if self.list_signature.as_ref() == Some(&signature) {
            return Ok(());
        }
        self.list_signature = Some(signature);

        writeln!(self.out, "--- conversations ({} unread) ---", list.total_unread())?;
        for conversation in &list.conversations {
            let marker = if list.active.as_ref() == Some(&conversation.id) { '>' } else { ' ' };
            let unread = if conversation.unread_count > 0 {
                format!(" [{}]", conversation.unread_count)
            } else {
                String::new()
            };
            let preview = conversation
                .last_message_text()
                .map(|text| truncate_preview(text, self.preview_chars))
                .unwrap_or_default();
            writeln!(
                self.out,
                "{marker} {} {}{unread}: {preview}",
                conversation.id, conversation.other_participant.name
            )?;
            if let Some(listing) = &conversation.listing {
                writeln!(self.out, "      {}", listing.title)?;
            }
        }
        self.out.flush()
    }

    fn render_thread(&mut self, thread: &ThreadSnapshot, _scroll_to_bottom: bool) -> io::Result<()> {
        if thread.conversation_id != self.shown {
            self.shown.clone_from(&thread.conversation_id);
            self.printed.clear();
            self.phase = None;
            self.write_header(thread)?;
        }

        if self.phase.as_ref() != Some(&thread.phase) {
            match &thread.phase {
                ThreadPhase::Loading => writeln!(self.out, "loading messages...")?,
                ThreadPhase::Error(e) => {
                    writeln!(self.out, "! could not load messages: {e} (/open again to retry)")?;
                }
                ThreadPhase::Idle | ThreadPhase::Active => {}
            }
            self.phase = Some(thread.phase.clone());
        }

        // Pending entries that disappeared were confirmed; their stored
        // copies get a status line instead of a second full line.
        let mut vanished = self
            .printed
            .keys()
            .filter(|k| matches!(k, MessageKey::Pending(_)))
            .filter(|k| !thread.entries.iter().any(|e| &e.key == *k))
            .count();
        self.printed
            .retain(|k, _| !matches!(k, MessageKey::Pending(_)) || thread.entries.iter().any(|e| &e.key == k));

        for entry in &thread.entries {
            match self.printed.get(&entry.key).copied() {
                Some(previous) if previous == entry.status => {}
                Some(_) => {
                    writeln!(self.out, "        {} {}", status_symbol(entry.status), entry.status)?;
                    if let Some(reason) = &entry.failure {
                        writeln!(self.out, "        not sent: {reason} (/retry)")?;
                    }
                }
                None if vanished > 0 && entry.sender_id == self.user_id && !entry.is_unconfirmed() => {
                    vanished -= 1;
                    writeln!(self.out, "        {} {}", status_symbol(entry.status), entry.status)?;
                }
                None => self.write_entry(entry, thread.participant.as_ref())?,
            }
            self.printed.insert(entry.key.clone(), entry.status);
        }
        self.out.flush()
    }

    fn render_typing(&mut self, _conversation_id: &ConversationId, typing: bool) -> io::Result<()> {
        if typing {
            writeln!(self.out, "... typing")?;
        }
        self.out.flush()
    }

    fn render_connection(&mut self, state: ConnectionState) -> io::Result<()> {
        writeln!(self.out, "* {state}")?;
        self.out.flush()
    }

    fn render_failure(&mut self, token: &CorrelationToken, reason: &str) -> io::Result<()> {
        tracing::debug!(%token, reason, "failure rendered");
        Ok(())
    }

    fn render_incoming(
        &mut self,
        conversation_id: &ConversationId,
        _sender_id: &UserId,
        content: &str,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "* new message in {conversation_id}: {}",
            truncate_preview(content, self.preview_chars)
        )?;
        self.out.flush()
    }
}
