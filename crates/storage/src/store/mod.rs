#![forbid(unsafe_code)]

mod error;
mod records;
mod scan;
mod schema;

pub use error::StoreError;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SCHEMA_VERSION: i64 = 1;

const DB_EXTENSION: &str = "db";
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// One dataset generation on disk: a single SQLite file holding the record
/// table and its composite indexes.
///
/// Dropping the store (or calling [`SqliteStore::close`]) ends the session.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    db_path: PathBuf,
    dataset: String,
}

impl SqliteStore {
    /// Discards any previous generation of `dataset` and creates an empty one.
    pub fn recreate(storage_dir: impl AsRef<Path>, dataset: &str) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref();
        ensure_dataset_name(dataset)?;
        std::fs::create_dir_all(storage_dir)?;

        let db_path = dataset_path(storage_dir, dataset);
        remove_dataset_files(&db_path)?;

        let conn = Connection::open(&db_path)?;
        configure(&conn)?;
        schema::install(&conn)?;
        tracing::info!(dataset, path = %db_path.display(), "dataset recreated");

        Ok(Self {
            conn,
            db_path,
            dataset: dataset.to_string(),
        })
    }

    /// Opens the current generation of `dataset` without modifying it.
    pub fn open(storage_dir: impl AsRef<Path>, dataset: &str) -> Result<Self, StoreError> {
        ensure_dataset_name(dataset)?;
        let db_path = dataset_path(storage_dir.as_ref(), dataset);
        if !db_path.exists() {
            return Err(StoreError::DatasetMissing {
                dataset: dataset.to_string(),
            });
        }

        let conn = Connection::open(&db_path)?;
        configure(&conn)?;
        schema::preflight(&conn)?;

        Ok(Self {
            conn,
            db_path,
            dataset: dataset.to_string(),
        })
    }

    /// Private, non-durable dataset backed by an in-memory connection.
    pub fn in_memory(dataset: &str) -> Result<Self, StoreError> {
        ensure_dataset_name(dataset)?;
        let conn = Connection::open_in_memory()?;
        schema::install(&conn)?;
        Ok(Self {
            conn,
            db_path: PathBuf::from(":memory:"),
            dataset: dataset.to_string(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn created_at(&self) -> Result<Option<String>, StoreError> {
        schema::meta_get(&self.conn, "created_at")
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::Sql(err))
    }
}

pub fn is_valid_dataset_name(dataset: &str) -> bool {
    !dataset.is_empty()
        && dataset.len() <= 128
        && !dataset.starts_with('.')
        && dataset
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
}

fn ensure_dataset_name(dataset: &str) -> Result<(), StoreError> {
    if is_valid_dataset_name(dataset) {
        Ok(())
    } else {
        Err(StoreError::InvalidInput("invalid dataset name"))
    }
}

fn dataset_path(storage_dir: &Path, dataset: &str) -> PathBuf {
    storage_dir.join(format!("{dataset}.{DB_EXTENSION}"))
}

fn remove_dataset_files(db_path: &Path) -> Result<(), StoreError> {
    let mut paths = vec![db_path.to_path_buf()];
    for suffix in SIDECAR_SUFFIXES {
        let mut sidecar = db_path.as_os_str().to_owned();
        sidecar.push(suffix);
        paths.push(PathBuf::from(sidecar));
    }
    for path in paths {
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed previous generation file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.busy_timeout(Duration::from_secs(5))?;
    let journal_mode =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    tracing::debug!(journal_mode = %journal_mode, "sqlite session configured");
    Ok(())
}

fn to_sqlite_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("numeric overflow"))
}
