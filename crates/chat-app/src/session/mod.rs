mod factory;
mod store;

pub use factory::{GREETING, OPEN_CHAT_FAILURE_TEXT, new_session, now_millis, open_provider_chat};
pub use store::{STORAGE_KEY_PREFIX, SessionStore, SessionStoreError, SessionStoreResult};
