mod controller;
mod events;
mod message;
mod preview;
mod send_state;
pub mod streaming;

pub use controller::{ChatController, NotificationRequestOutcome};
pub use events::{ChatEvent, IgnoreReason, SendInput, SendOutcome};
pub use message::{ChatId, ChatMessage, ChatSession, MessageRole};
pub use preview::{
    EMPTY_CHAT_PREVIEW, NOTIFICATION_BODY_CHARS, NOTIFICATION_TITLE, SIDEBAR_PREVIEW_CHARS,
    notification_body, session_preview, truncate_with_ellipsis,
};
pub use send_state::{
    SendPhase, SendTarget, SendTransition, SendTransitionRejection, SendTransitionResult,
};
