use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage key must not be empty"))]
    EmptyKey { stage: &'static str },
    #[snafu(display("storage invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to create storage directory at {path}"))]
    CreateDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to read storage entry from {path}"))]
    ReadEntry {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to write storage entry to {path}"))]
    WriteEntry {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace storage entry {from} -> {to}"))]
    RenameEntry {
        stage: &'static str,
        from: String,
        to: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to remove storage entry at {path}"))]
    RemoveEntry {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to connect sqlite database '{database_path}'"))]
    SqliteConnect {
        stage: &'static str,
        database_path: String,
        source: sqlx::Error,
    },
    #[snafu(display("sqlite query failed at {stage}: {source}"))]
    SqliteQuery {
        stage: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("failed to spawn sqlite worker thread"))]
    SqliteThreadSpawn {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to initialize sqlite worker runtime"))]
    SqliteRuntimeInit {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
