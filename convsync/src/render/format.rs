//! Text helpers shared by renderers.

use chrono::{DateTime, Local, Utc};

use convsync_proto::message::MessageStatus;
use convsync_proto::presence::PresenceStatus;

/// Default length of conversation-list previews, in characters.
pub const PREVIEW_CHARS: usize = 50;

/// Escape `&`, `<`, `>`, `"` and `'` for HTML.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Message body as HTML: escaped, `http(s)://` URLs turned into links
/// opening in a new tab, line breaks as `<br>`.
#[must_use]
pub fn format_message_content(text: &str) -> String {
    linkify(&escape_html(text)).replace('\n', "<br>")
}

fn linkify(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(start) = find_url(rest) {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail.find(char::is_whitespace).unwrap_or(tail.len());
        let url = &tail[..end];
        out.push_str(&format!(
            r#"<a href="{url}" target="_blank" rel="noopener noreferrer">{url}</a>"#
        ));
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

fn find_url(text: &str) -> Option<usize> {
    match (text.find("http://"), text.find("https://")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
#[must_use]
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Compact delivery indicator.
#[must_use]
pub const fn status_symbol(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sending => "\u{22ef}",
        MessageStatus::Sent => "\u{2713}",
        MessageStatus::Delivered => "\u{2713}\u{2713}",
        MessageStatus::Read => "\u{2713}\u{2713} read",
        MessageStatus::Failed => "\u{2717}",
    }
}

/// Presence dot and label.
#[must_use]
pub const fn presence_label(status: PresenceStatus) -> &'static str {
    match status {
        PresenceStatus::Online => "\u{25cf} online",
        PresenceStatus::Offline => "\u{25cb} offline",
    }
}

/// `time` in local time using a `chrono` format string.
#[must_use]
pub fn format_time(time: DateTime<Utc>, format: &str) -> String {
    time.with_timezone(&Local).format(format).to_string()
}
