use std::sync::Arc;

use ktr_llm::Content;
use ktr_storage::{LocalStorage, StorageError};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::chat::{ChatId, ChatMessage, ChatSession};

pub const STORAGE_KEY_PREFIX: &str = "ktr_chat_history";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionStoreError {
    #[snafu(display("session storage failed on `{stage}` for key '{key}'"))]
    Storage {
        stage: &'static str,
        key: String,
        source: StorageError,
    },
    #[snafu(display("stored sessions under '{key}' are malformed"))]
    Decode {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to encode sessions for '{key}'"))]
    Encode {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
}

pub type SessionStoreResult<T> = Result<T, SessionStoreError>;

/// Stored shape; sessions written before `history` existed lack it.
#[derive(Debug, Deserialize)]
struct PersistedSession {
    id: ChatId,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    history: Option<Vec<Content>>,
}

impl PersistedSession {
    fn into_session(self) -> ChatSession {
        let history = match self.history {
            Some(history) => history,
            None => {
                tracing::debug!(chat_id = %self.id, "backfilling history for legacy session");
                ChatSession::project_history(&self.messages)
            }
        };
        ChatSession::new(self.id, self.messages, history)
    }
}

/// Per-user session lists in a `LocalStorage`, one JSON array per user.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn LocalStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self { storage }
    }

    pub fn storage_key(user_email: &str) -> String {
        format!("{STORAGE_KEY_PREFIX}_{user_email}")
    }

    /// Missing key loads as an empty list.
    pub fn load(&self, user_email: &str) -> SessionStoreResult<Vec<ChatSession>> {
        let key = Self::storage_key(user_email);
        let Some(raw) = self.storage.get_item(&key).context(StorageSnafu {
            stage: "session-store-load",
            key: key.clone(),
        })?
        else {
            return Ok(Vec::new());
        };

        let persisted: Vec<PersistedSession> =
            serde_json::from_str(&raw).context(DecodeSnafu {
                stage: "session-store-decode",
                key,
            })?;
        Ok(persisted
            .into_iter()
            .map(PersistedSession::into_session)
            .collect())
    }

    pub fn save(&self, user_email: &str, sessions: &[ChatSession]) -> SessionStoreResult<()> {
        let key = Self::storage_key(user_email);
        let raw = serde_json::to_string(sessions).context(EncodeSnafu {
            stage: "session-store-encode",
            key: key.clone(),
        })?;
        self.storage.set_item(&key, &raw).context(StorageSnafu {
            stage: "session-store-save",
            key,
        })
    }

    pub fn clear(&self, user_email: &str) -> SessionStoreResult<()> {
        let key = Self::storage_key(user_email);
        self.storage.remove_item(&key).context(StorageSnafu {
            stage: "session-store-clear",
            key,
        })
    }
}
