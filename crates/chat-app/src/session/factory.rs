use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ktr_llm::{ChatOptions, Content, LlmProvider, ProviderChat, ProviderResult};

use crate::chat::{ChatId, ChatMessage, ChatSession};

pub const GREETING: &str = "Hello! I'm KTR. How can I assist you today?";
pub const OPEN_CHAT_FAILURE_TEXT: &str = "Error re-initializing chat. Please check your API key.";

/// Fresh session seeded with the greeting in both logs.
///
/// The id is `now_millis`, moved forward one millisecond at a time past any id already in
/// `existing`.
pub fn new_session(now_millis: u64, existing: &[ChatSession]) -> ChatSession {
    let mut millis = now_millis;
    while existing
        .iter()
        .any(|session| session.id == ChatId::from_millis(millis))
    {
        millis = millis.saturating_add(1);
    }

    ChatSession::new(
        ChatId::from_millis(millis),
        vec![ChatMessage::model(GREETING)],
        vec![Content::model_text(GREETING)],
    )
}

/// Provider chat handle pre-loaded with `history`.
pub fn open_provider_chat(
    provider: &Arc<dyn LlmProvider>,
    history: &[Content],
    options: &ChatOptions,
) -> ProviderResult<ProviderChat> {
    ProviderChat::open(provider.clone(), history.to_vec(), options.clone())
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use ktr_llm::ScriptedProvider;

    use super::*;

    #[test]
    fn new_session_is_seeded_with_greeting() {
        let session = new_session(42, &[]);
        assert_eq!(session.id, ChatId::from_millis(42));
        assert_eq!(session.messages, vec![ChatMessage::model(GREETING)]);
        assert_eq!(session.history, vec![Content::model_text(GREETING)]);
    }

    #[test]
    fn colliding_timestamps_are_bumped() {
        let first = new_session(42, &[]);
        let second = new_session(42, std::slice::from_ref(&first));
        let third = new_session(42, &[second.clone(), first.clone()]);

        assert_eq!(second.id, ChatId::from_millis(43));
        assert_eq!(third.id, ChatId::from_millis(44));
    }

    #[test]
    fn provider_chat_carries_history() {
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new([]));
        let session = new_session(1, &[]);

        let chat =
            open_provider_chat(&provider, &session.history, &ChatOptions::default()).unwrap();
        assert_eq!(chat.history(), session.history.as_slice());
        assert_eq!(chat.provider_id(), "echo");
    }
}
