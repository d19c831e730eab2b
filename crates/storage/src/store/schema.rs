#![forbid(unsafe_code)]

use super::{SCHEMA_VERSION, StoreError};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;

const SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS records (
          name TEXT PRIMARY KEY,
          object_type TEXT NOT NULL,
          change_type TEXT NOT NULL,
          depth INTEGER NOT NULL CHECK(depth >= 0),
          attributes_json TEXT,
          changed_json TEXT
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS idx_records_object_type ON records(object_type, name);
        CREATE INDEX IF NOT EXISTS idx_records_change_type ON records(change_type, name);
"#;

const REQUIRED_TABLES: [&str; 2] = ["meta", "records"];

pub(super) fn install(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SQL)?;
    conn.execute(
        "INSERT INTO meta(key, value) VALUES ('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![SCHEMA_VERSION.to_string()],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES ('created_at', ?1)",
        params![now_rfc3339()],
    )?;
    Ok(())
}

/// Refuses files that were not written by this schema version.
pub(super) fn preflight(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    for table in REQUIRED_TABLES {
        if !tables.contains(table) {
            return Err(StoreError::ResetRequired("required table is missing"));
        }
    }

    match meta_get(conn, "schema_version")? {
        Some(version) if version == SCHEMA_VERSION.to_string() => Ok(()),
        Some(_) => Err(StoreError::ResetRequired("schema version mismatch")),
        None => Err(StoreError::ResetRequired("schema version is missing")),
    }
}

pub(super) fn meta_get(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT value FROM meta WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
