use ktr_llm::StreamId;

use crate::attachment::ImageAttachment;

use super::message::ChatId;

/// Emitted to observers after the controller changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Session list, active selection or signed-in user changed.
    SessionsChanged,
    TurnStarted {
        chat_id: ChatId,
        stream_id: StreamId,
    },
    /// One fragment was applied; `text` is the reply accumulated so far.
    ReplyUpdated {
        chat_id: ChatId,
        stream_id: StreamId,
        text: String,
    },
    TurnSettled {
        chat_id: ChatId,
        stream_id: StreamId,
        succeeded: bool,
    },
    /// An error entry was appended outside a send, e.g. the provider chat could not be opened.
    ErrorAppended { chat_id: ChatId, text: String },
    NotificationShown { title: String, body: String },
}

/// User input for one send.
#[derive(Debug, Clone, Default)]
pub struct SendInput {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl SendInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    /// Empty trimmed text and no image.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyInput,
    NotSignedIn,
    AlreadySending,
    NoActiveChat,
    ProviderChatUnavailable,
}

/// Result of one send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing changed.
    Ignored(IgnoreReason),
    Completed { stream_id: StreamId, reply: String },
    Failed {
        stream_id: StreamId,
        message: String,
    },
}

impl SendOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}
