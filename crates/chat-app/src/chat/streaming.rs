//! Store mutations performed while one turn streams in.

use ktr_llm::{Content, Part};

use super::message::{ChatMessage, ChatSession, MessageRole};

pub const STREAM_FAILURE_TEXT: &str = "Sorry, something went wrong. Please try again.";

/// Appends the user turn and an empty model placeholder to both logs in one step.
pub fn begin_turn(session: &mut ChatSession, user_message: ChatMessage, user_parts: Vec<Part>) {
    session.messages.push(user_message);
    session.messages.push(ChatMessage::model(""));
    session.history.push(Content::user(user_parts));
    session.history.push(Content::model_text(""));
}

/// Writes the accumulated reply into the trailing model message and history entry.
///
/// Returns false when the session no longer ends in a model turn, e.g. it was replaced
/// while streaming.
pub fn apply_accumulated(session: &mut ChatSession, accumulated: &str) -> bool {
    let Some(last) = session.messages.last_mut() else {
        return false;
    };
    if last.role != MessageRole::Model {
        return false;
    }
    last.text = accumulated.to_string();

    match session.history.last_mut() {
        Some(content) => content.set_last_text(accumulated),
        None => false,
    }
}

/// Replaces the trailing placeholder with an error entry; history keeps the user turn.
pub fn fail_turn(session: &mut ChatSession, error_text: &str) {
    if session
        .messages
        .last()
        .is_some_and(|message| message.role == MessageRole::Model)
    {
        session.messages.pop();
    }
    session.messages.push(ChatMessage::error(error_text));
}

/// Appends an error entry without touching history.
pub fn append_error(session: &mut ChatSession, error_text: &str) {
    session.messages.push(ChatMessage::error(error_text));
}

/// Concatenates delivered fragments in arrival order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplyAccumulator {
    text: String,
}

impl ReplyAccumulator {
    pub fn push(&mut self, fragment: &str) -> &str {
        self.text.push_str(fragment);
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::ChatId;

    fn seeded() -> ChatSession {
        ChatSession::new(
            ChatId::from_millis(1),
            vec![ChatMessage::model("Hello!")],
            vec![Content::model_text("Hello!")],
        )
    }

    #[test]
    fn fragments_overwrite_both_logs_in_order() {
        let mut session = seeded();
        begin_turn(
            &mut session,
            ChatMessage::user("Hi", None),
            vec![Part::text("Hi")],
        );

        let mut accumulator = ReplyAccumulator::default();
        for fragment in ["He", "llo!"] {
            let text = accumulator.push(fragment).to_string();
            assert!(apply_accumulated(&mut session, &text));
        }

        assert_eq!(session.messages.last(), Some(&ChatMessage::model("Hello!")));
        assert_eq!(session.history.last(), Some(&Content::model_text("Hello!")));
        assert_eq!(session.history.len(), session.mirrored_turns());
    }

    #[test]
    fn failure_swaps_placeholder_for_error_and_keeps_history() {
        let mut session = seeded();
        begin_turn(
            &mut session,
            ChatMessage::user("Hi", None),
            vec![Part::text("Hi")],
        );
        apply_accumulated(&mut session, "partial");

        fail_turn(&mut session, STREAM_FAILURE_TEXT);

        assert_eq!(session.messages.len(), 3);
        assert_eq!(
            session.messages.last(),
            Some(&ChatMessage::error(STREAM_FAILURE_TEXT))
        );
        assert_eq!(session.history.len(), 3);
        assert!(session.history.len() >= session.mirrored_turns());
    }

    #[test]
    fn fragments_are_ignored_once_the_tail_is_not_a_model_turn() {
        let mut session = seeded();
        append_error(&mut session, "boom");
        assert!(!apply_accumulated(&mut session, "late"));
        assert_eq!(session.messages.last(), Some(&ChatMessage::error("boom")));
    }
}
