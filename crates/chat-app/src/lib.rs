//! Headless chat client: per-user sessions persisted to local storage, streamed replies
//! from an LLM provider, and the optional platform capabilities around them.

pub mod attachment;
pub mod auth;
pub mod capabilities;
pub mod chat;
pub mod error;
pub mod session;
pub mod settings;

pub use attachment::{ImageAttachment, ObjectUrl, ObjectUrlRegistry};
pub use auth::{Authenticator, LoginError, MockAuthenticator, User};
pub use capabilities::Capabilities;
pub use chat::{
    ChatController, ChatEvent, ChatId, ChatMessage, ChatSession, IgnoreReason, MessageRole,
    NotificationRequestOutcome, SendInput, SendOutcome,
};
pub use error::{ChatError, ChatResult};
pub use session::SessionStore;
pub use settings::{AppSettings, SettingsStore};
