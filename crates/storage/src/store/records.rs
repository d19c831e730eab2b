#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError};
use crate::{BatchSink, IndexKind};
use dv_core::{AttributeChange, Record};
use rusqlite::{OptionalExtension, params};
use std::collections::{BTreeMap, BTreeSet};

impl SqliteStore {
    /// Writes `records` in one transaction. A name that already exists is
    /// replaced, including duplicates inside the same batch (last one wins).
    pub fn put_batch(&mut self, records: &[Record]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO records(name, object_type, change_type, depth, attributes_json, changed_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(name) DO UPDATE SET \
                   object_type=excluded.object_type, \
                   change_type=excluded.change_type, \
                   depth=excluded.depth, \
                   attributes_json=excluded.attributes_json, \
                   changed_json=excluded.changed_json",
            )?;
            for record in records {
                if record.name.is_empty() {
                    return Err(StoreError::InvalidInput("record name must not be empty"));
                }
                let attributes_json = record
                    .attributes
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                let changed_json = if record.changed_attributes.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&record.changed_attributes)?)
                };
                stmt.execute(params![
                    record.name,
                    record.object_type,
                    record.change_type,
                    i64::from(record.depth),
                    attributes_json,
                    changed_json,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Full record including its attribute payload.
    pub fn get(&self, name: &str) -> Result<Option<Record>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT name, object_type, change_type, depth, attributes_json, changed_json \
                 FROM records WHERE name=?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, object_type, change_type, depth, attributes_json, changed_json)) = row
        else {
            return Ok(None);
        };

        let attributes = attributes_json
            .as_deref()
            .map(serde_json::from_str::<BTreeMap<String, AttributeChange>>)
            .transpose()?;
        let changed_attributes = changed_json
            .as_deref()
            .map(serde_json::from_str::<BTreeSet<String>>)
            .transpose()?
            .unwrap_or_default();

        Ok(Some(Record {
            name,
            object_type,
            change_type,
            depth: depth_from_sql(depth)?,
            attributes,
            changed_attributes,
        }))
    }

    /// Record count per leading value of a composite index, in index order.
    pub fn histogram(&self, index: IndexKind) -> Result<Vec<(String, u64)>, StoreError> {
        let column = match index {
            IndexKind::Primary => {
                return Err(StoreError::InvalidInput(
                    "histogram requires a composite index",
                ));
            }
            IndexKind::ObjectType => "object_type",
            IndexKind::ChangeType => "change_type",
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {column}, COUNT(*) FROM records GROUP BY {column} ORDER BY {column} ASC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let count = row.get::<_, i64>(1)?;
            out.push((
                row.get::<_, String>(0)?,
                u64::try_from(count).unwrap_or_default(),
            ));
        }
        Ok(out)
    }
}

impl BatchSink for SqliteStore {
    fn put_batch(&mut self, records: &[Record]) -> Result<usize, StoreError> {
        SqliteStore::put_batch(self, records)
    }
}

pub(super) fn depth_from_sql(depth: i64) -> Result<u32, StoreError> {
    u32::try_from(depth).map_err(|_| StoreError::InvalidInput("depth out of range"))
}
