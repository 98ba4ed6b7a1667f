//! String key/value persistence shared by the chat client.
//!
//! `LocalStorage` mirrors the browser storage contract: whole values are read and
//! replaced by key, there are no partial updates and no transactions across keys.

use std::path::Path;
use std::sync::Arc;

pub mod error;
pub mod file;
pub mod memory;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove_item(&self, key: &str) -> StorageResult<()>;
}

/// Selects which `LocalStorage` implementation backs the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
    Memory,
}

impl StorageBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" | "files" | "json" => Some(Self::File),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

/// Opens the requested backend rooted at `location`.
///
/// `location` is a directory for `File`, a database file for `Sqlite`, and ignored for `Memory`.
pub async fn open_storage(
    backend: StorageBackend,
    location: &Path,
) -> StorageResult<Arc<dyn LocalStorage>> {
    let storage: Arc<dyn LocalStorage> = match backend {
        StorageBackend::File => Arc::new(FileStorage::open(location)?),
        StorageBackend::Sqlite => Arc::new(SqliteStorage::open(location).await?),
        StorageBackend::Memory => Arc::new(MemoryStorage::default()),
    };

    tracing::debug!(
        backend = backend.name(),
        location = %location.display(),
        "opened local storage"
    );
    Ok(storage)
}
