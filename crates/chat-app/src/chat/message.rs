use ktr_llm::{Content, ContentRole};
use serde::{Deserialize, Serialize};

/// Stable identifier for one chat session: its creation timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn from_millis(millis: u64) -> Self {
        Self(millis.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of a timestamp id, `None` for ids written by something else.
    pub fn millis(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Speaker of one rendered log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
    Error,
}

impl MessageRole {
    /// Provider-facing role, `None` for entries that never reach the model.
    pub fn content_role(self) -> Option<ContentRole> {
        match self {
            Self::User => Some(ContentRole::User),
            Self::Model => Some(ContentRole::Model),
            Self::Error => None,
        }
    }
}

/// Rendered log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            image_url: None,
        }
    }

    pub fn user(text: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            image_url,
            ..Self::new(MessageRole::User, text)
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Model, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Error, text)
    }

    /// Model entry still waiting for its first fragment.
    pub fn is_pending(&self) -> bool {
        self.role == MessageRole::Model && self.text.is_empty()
    }

    /// Error entries and empty entries have nothing worth copying.
    pub fn is_copyable(&self) -> bool {
        self.role != MessageRole::Error && !self.text.is_empty()
    }
}

/// One conversation: the rendered log plus the provider-facing log.
///
/// Error entries live only in `messages`; every user and model turn is mirrored into `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: ChatId,
    pub messages: Vec<ChatMessage>,
    pub history: Vec<Content>,
}

impl ChatSession {
    pub fn new(id: ChatId, messages: Vec<ChatMessage>, history: Vec<Content>) -> Self {
        Self {
            id,
            messages,
            history,
        }
    }

    /// Rebuilds a provider log from rendered entries, keeping user and model turns with text.
    pub fn project_history(messages: &[ChatMessage]) -> Vec<Content> {
        messages
            .iter()
            .filter(|message| !message.text.is_empty())
            .filter_map(|message| {
                message.role.content_role().map(|role| {
                    Content::new(role, vec![ktr_llm::Part::text(message.text.clone())])
                })
            })
            .collect()
    }

    /// Number of rendered entries that must have a provider-facing counterpart.
    pub fn mirrored_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.role != MessageRole::Error)
            .count()
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}
