use super::message::{ChatSession, MessageRole};

pub const SIDEBAR_PREVIEW_CHARS: usize = 40;
pub const NOTIFICATION_BODY_CHARS: usize = 150;
pub const EMPTY_CHAT_PREVIEW: &str = "New Chat";
pub const NOTIFICATION_TITLE: &str = "New message from KTR ChatBot";

/// Sidebar label: the first user text, else the first message, else a placeholder.
pub fn session_preview(session: &ChatSession) -> String {
    let source = session
        .messages
        .iter()
        .find(|message| message.role == MessageRole::User && !message.text.is_empty())
        .or_else(|| session.messages.first())
        .map(|message| message.text.as_str())
        .filter(|text| !text.is_empty());

    match source {
        Some(text) => truncate_with_ellipsis(text, SIDEBAR_PREVIEW_CHARS),
        None => EMPTY_CHAT_PREVIEW.to_string(),
    }
}

pub fn notification_body(reply: &str) -> String {
    truncate_with_ellipsis(reply, NOTIFICATION_BODY_CHARS)
}

/// Keeps the first `max_chars` characters and marks the cut with `...`.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
