//! Plain-text rendering of sessions for the terminal.

use colored::Colorize;
use ktr_chat::chat::streaming::STREAM_FAILURE_TEXT;
use ktr_chat::chat::{ChatEvent, ChatId, ChatMessage, ChatSession, MessageRole, session_preview};
use ktr_llm::StreamId;

const TYPING_INDICATOR: &str = "...";

pub fn render_message(position: usize, message: &ChatMessage) -> String {
    let label = match message.role {
        MessageRole::User => "you".cyan().bold(),
        MessageRole::Model => "ktr".green().bold(),
        MessageRole::Error => "error".red().bold(),
    };

    let body = if message.is_pending() {
        TYPING_INDICATOR.dimmed().to_string()
    } else if message.role == MessageRole::Error {
        message.text.red().to_string()
    } else {
        message.text.clone()
    };

    let mut line = format!("{} {label} {body}", format!("[{position}]").dimmed());
    if let Some(url) = &message.image_url {
        line.push_str(&format!(" {}", format!("[image: {url}]").yellow()));
    }
    line
}

pub fn render_session(session: &ChatSession) -> String {
    session
        .messages
        .iter()
        .enumerate()
        .map(|(index, message)| render_message(index + 1, message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sidebar listing, most recent first, with the active chat marked.
pub fn render_session_list(sessions: &[ChatSession], active: Option<&ChatId>) -> String {
    if sessions.is_empty() {
        return "No chats yet.".dimmed().to_string();
    }

    sessions
        .iter()
        .enumerate()
        .map(|(index, session)| {
            let marker = if Some(&session.id) == active { "*" } else { " " };
            let preview = session_preview(session);
            let preview = if Some(&session.id) == active {
                preview.bold().to_string()
            } else {
                preview
            };
            format!("{marker} {:>2}. {preview}", index + 1)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turns controller events into incremental terminal output for one send.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    stream_id: Option<StreamId>,
    printed: usize,
}

impl StreamPrinter {
    /// Text to write for `event`, if any.
    pub fn handle(&mut self, event: &ChatEvent) -> Option<String> {
        match event {
            ChatEvent::TurnStarted { stream_id, .. } => {
                self.stream_id = Some(*stream_id);
                self.printed = 0;
                Some(format!("{} ", "ktr".green().bold()))
            }
            ChatEvent::ReplyUpdated {
                stream_id, text, ..
            } if self.stream_id == Some(*stream_id) => {
                let fresh = text.get(self.printed..).filter(|fresh| !fresh.is_empty())?;
                self.printed = text.len();
                Some(fresh.to_string())
            }
            ChatEvent::TurnSettled {
                stream_id,
                succeeded,
                ..
            } if self.stream_id == Some(*stream_id) => {
                self.stream_id = None;
                if *succeeded {
                    Some("\n".to_string())
                } else {
                    Some(format!(
                        "\n{} {}\n",
                        "error".red().bold(),
                        STREAM_FAILURE_TEXT.red()
                    ))
                }
            }
            ChatEvent::ErrorAppended { text, .. } => {
                Some(format!("{} {}\n", "error".red().bold(), text.red()))
            }
            ChatEvent::NotificationShown { .. }
            | ChatEvent::SessionsChanged
            | ChatEvent::ReplyUpdated { .. }
            | ChatEvent::TurnSettled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use ktr_llm::Content;

    use super::*;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn messages_show_role_and_image_marker() {
        plain();
        assert_eq!(
            render_message(2, &ChatMessage::user("look", Some("blob:ktr/1".into()))),
            "[2] you look [image: blob:ktr/1]"
        );
        assert_eq!(render_message(3, &ChatMessage::model("")), "[3] ktr ...");
        assert_eq!(
            render_message(4, &ChatMessage::error("oops")),
            "[4] error oops"
        );
    }

    #[test]
    fn session_list_marks_active_chat() {
        plain();
        let first = ChatSession::new(
            ChatId::from_millis(2),
            vec![ChatMessage::model("Hello!"), ChatMessage::user("Hi there", None)],
            vec![Content::model_text("Hello!")],
        );
        let second = ChatSession::new(ChatId::from_millis(1), Vec::new(), Vec::new());

        let rendered = render_session_list(&[first, second], Some(&ChatId::from_millis(1)));
        assert_eq!(rendered, "   1. Hi there\n*  2. New Chat");
    }

    #[test]
    fn printer_emits_only_new_text() {
        plain();
        let chat_id = ChatId::from_millis(1);
        let stream_id = StreamId::new(4);
        let mut printer = StreamPrinter::default();

        let outputs = [
            ChatEvent::TurnStarted {
                chat_id: chat_id.clone(),
                stream_id,
            },
            ChatEvent::ReplyUpdated {
                chat_id: chat_id.clone(),
                stream_id,
                text: "He".into(),
            },
            ChatEvent::ReplyUpdated {
                chat_id: chat_id.clone(),
                stream_id: StreamId::new(3),
                text: "stale".into(),
            },
            ChatEvent::ReplyUpdated {
                chat_id: chat_id.clone(),
                stream_id,
                text: "Hello!".into(),
            },
            ChatEvent::TurnSettled {
                chat_id,
                stream_id,
                succeeded: true,
            },
        ]
        .iter()
        .filter_map(|event| printer.handle(event))
        .collect::<String>();

        assert_eq!(outputs, "ktr Hello!\n");
    }
}
