#![forbid(unsafe_code)]

use super::records::depth_from_sql;
use super::{SqliteStore, StoreError, to_sqlite_i64};
use crate::{IndexKey, IndexKind, IndexedStore, KeyRange};
use dv_core::{Record, ScanDirection};
use rusqlite::{Row, params_from_iter};
use std::collections::BTreeSet;
use std::ops::{Bound, ControlFlow};

const SUMMARY_COLUMNS: &str = "name, object_type, change_type, depth";

/// WHERE/ORDER BY fragments for one keyset scan plus its bound parameters.
struct ScanSql {
    from: String,
    where_sql: String,
    params: Vec<String>,
}

impl ScanSql {
    fn build(index: IndexKind, range: &KeyRange) -> Result<Self, StoreError> {
        let from = match index {
            IndexKind::Primary => "records".to_string(),
            IndexKind::ObjectType => "records INDEXED BY idx_records_object_type".to_string(),
            IndexKind::ChangeType => "records INDEXED BY idx_records_change_type".to_string(),
        };

        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(prefix) = &range.prefix {
            let Some(column) = lead_column(index) else {
                return Err(StoreError::InvalidInput(
                    "prefix requires a composite index",
                ));
            };
            clauses.push(format!("{column} = ?"));
            params.push(prefix.clone());
        }

        for (bound, lower) in [(&range.lower, true), (&range.upper, false)] {
            let (key, op) = match bound {
                Bound::Unbounded => continue,
                Bound::Included(key) => (key, if lower { ">=" } else { "<=" }),
                Bound::Excluded(key) => (key, if lower { ">" } else { "<" }),
            };
            clauses.push(bound_clause(index, op));
            push_key_params(index, key, &mut params)?;
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        Ok(Self {
            from,
            where_sql,
            params,
        })
    }

    fn order_by(index: IndexKind, direction: ScanDirection) -> String {
        let dir = match direction {
            ScanDirection::Forward => "ASC",
            ScanDirection::Backward => "DESC",
        };
        match lead_column(index) {
            Some(column) => format!(" ORDER BY {column} {dir}, name {dir}"),
            None => format!(" ORDER BY name {dir}"),
        }
    }
}

fn lead_column(index: IndexKind) -> Option<&'static str> {
    match index {
        IndexKind::Primary => None,
        IndexKind::ObjectType => Some("object_type"),
        IndexKind::ChangeType => Some("change_type"),
    }
}

fn bound_clause(index: IndexKind, op: &str) -> String {
    match lead_column(index) {
        Some(column) => format!("({column}, name) {op} (?, ?)"),
        None => format!("name {op} ?"),
    }
}

fn push_key_params(
    index: IndexKind,
    key: &IndexKey,
    params: &mut Vec<String>,
) -> Result<(), StoreError> {
    if index.is_composite() {
        let Some(lead) = &key.lead else {
            return Err(StoreError::InvalidInput(
                "composite index bound requires a leading value",
            ));
        };
        params.push(lead.clone());
    }
    params.push(key.name.clone());
    Ok(())
}

fn summary_from_row(row: &Row<'_>) -> Result<Record, StoreError> {
    Ok(Record {
        name: row.get(0)?,
        object_type: row.get(1)?,
        change_type: row.get(2)?,
        depth: depth_from_sql(row.get(3)?)?,
        attributes: None,
        changed_attributes: BTreeSet::new(),
    })
}

impl IndexedStore for SqliteStore {
    fn visit(
        &self,
        index: IndexKind,
        range: &KeyRange,
        direction: ScanDirection,
        visitor: &mut dyn FnMut(Record) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let sql = ScanSql::build(index, range)?;
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM {}{}{}",
            sql.from,
            sql.where_sql,
            ScanSql::order_by(index, direction)
        );
        let mut stmt = self.conn.prepare_cached(&query)?;
        let mut rows = stmt.query(params_from_iter(sql.params.iter()))?;
        while let Some(row) = rows.next()? {
            if visitor(summary_from_row(row)?).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn count(&self, index: IndexKind, range: &KeyRange) -> Result<u64, StoreError> {
        let sql = ScanSql::build(index, range)?;
        let query = format!("SELECT COUNT(*) FROM {}{}", sql.from, sql.where_sql);
        let count: i64 = self
            .conn
            .prepare_cached(&query)?
            .query_row(params_from_iter(sql.params.iter()), |row| row.get(0))?;
        u64::try_from(count).map_err(|_| StoreError::InvalidInput("negative count"))
    }

    fn scan(
        &self,
        index: IndexKind,
        range: &KeyRange,
        direction: ScanDirection,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = ScanSql::build(index, range)?;
        let limit = to_sqlite_i64(u64::try_from(limit).unwrap_or(u64::MAX))?;
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM {}{}{} LIMIT {limit}",
            sql.from,
            sql.where_sql,
            ScanSql::order_by(index, direction)
        );
        let mut stmt = self.conn.prepare_cached(&query)?;
        let mut rows = stmt.query(params_from_iter(sql.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(summary_from_row(row)?);
        }
        Ok(out)
    }
}
