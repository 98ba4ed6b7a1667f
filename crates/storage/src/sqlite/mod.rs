use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Connection, SqliteConnection};

use super::LocalStorage;
use super::error::{
    CreateDirectorySnafu, EmptyKeySnafu, InvariantViolationSnafu, SqliteConnectSnafu,
    SqliteQuerySnafu, SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu, StorageResult,
};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS local_storage (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
)";

/// Key/value table in a single SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    connect_options: SqliteConnectOptions,
    database_path: PathBuf,
}

impl SqliteStorage {
    pub async fn open(database_path: &Path) -> StorageResult<Self> {
        ensure_database_directory(database_path)?;

        let connect_options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let mut connection = connect_store_connection(
            &connect_options,
            database_path,
            "sqlite-open-connect",
        )
        .await?;

        sqlx::query(CREATE_TABLE_SQL)
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "sqlite-open-create-table",
            })?;

        connection.close().await.context(SqliteQuerySnafu {
            stage: "sqlite-open-close",
        })?;

        Ok(Self {
            connect_options,
            database_path: database_path.to_path_buf(),
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Storage calls are sync, so each one runs on a dedicated worker thread
        // with its own current-thread runtime to avoid nested-runtime blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl LocalStorage for SqliteStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "sqlite-get" });
        let options = self.connect_options.clone();
        let database_path = self.database_path.clone();
        let key = key.to_string();

        self.run_db_call("get-item", async move {
            let mut connection =
                connect_store_connection(&options, &database_path, "get-item-connect").await?;
            sqlx::query_scalar::<_, String>("SELECT value FROM local_storage WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "get-item-select",
                })
        })
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "sqlite-set" });
        let options = self.connect_options.clone();
        let database_path = self.database_path.clone();
        let key = key.to_string();
        let value = value.to_string();

        self.run_db_call("set-item", async move {
            let mut connection =
                connect_store_connection(&options, &database_path, "set-item-connect").await?;
            sqlx::query(
                "INSERT INTO local_storage (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(unix_timestamp_seconds())
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "set-item-upsert",
            })?;
            Ok(())
        })
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "sqlite-remove" });
        let options = self.connect_options.clone();
        let database_path = self.database_path.clone();
        let key = key.to_string();

        self.run_db_call("remove-item", async move {
            let mut connection =
                connect_store_connection(&options, &database_path, "remove-item-connect").await?;
            sqlx::query("DELETE FROM local_storage WHERE key = ?")
                .bind(key)
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "remove-item-delete",
                })?;
            Ok(())
        })
    }
}

async fn connect_store_connection(
    options: &SqliteConnectOptions,
    database_path: &Path,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    SqliteConnection::connect_with(options)
        .await
        .context(SqliteConnectSnafu {
            stage,
            database_path: database_path.display().to_string(),
        })
}

fn ensure_database_directory(database_path: &Path) -> StorageResult<()> {
    if let Some(parent) = database_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
        })
}
