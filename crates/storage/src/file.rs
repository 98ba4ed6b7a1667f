use std::path::{Path, PathBuf};

use snafu::{ResultExt, ensure};

use super::LocalStorage;
use super::error::{
    CreateDirectorySnafu, EmptyKeySnafu, ReadEntrySnafu, RemoveEntrySnafu, RenameEntrySnafu,
    StorageResult, WriteEntrySnafu,
};

const ENTRY_EXTENSION: &str = "json";

/// One file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).context(CreateDirectorySnafu {
            stage: "file-storage-open",
            path: display_path(&root),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", encode_key(key)))
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "file-get" });
        let path = self.entry_path(key);

        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(source).context(ReadEntrySnafu {
                stage: "file-get-read",
                path: display_path(&path),
            }),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "file-set" });
        let path = self.entry_path(key);
        let temp_path = path.with_extension(format!("{ENTRY_EXTENSION}.tmp"));

        std::fs::write(&temp_path, value).context(WriteEntrySnafu {
            stage: "file-set-write-temporary",
            path: display_path(&temp_path),
        })?;

        // Rename keeps readers from ever observing a half-written value.
        std::fs::rename(&temp_path, &path).context(RenameEntrySnafu {
            stage: "file-set-rename-temporary",
            from: display_path(&temp_path),
            to: display_path(&path),
        })
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "file-remove" });
        let path = self.entry_path(key);

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(source).context(RemoveEntrySnafu {
                stage: "file-remove",
                path: display_path(&path),
            }),
        }
    }
}

/// Maps a key onto a portable file stem: percent-encoded, with a leading dot escaped too.
fn encode_key(key: &str) -> String {
    let encoded = urlencoding::encode(key);
    match encoded.strip_prefix('.') {
        // A leading dot would hide the file; later dots are harmless.
        Some(rest) => format!("%2E{rest}"),
        None => encoded.into_owned(),
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
