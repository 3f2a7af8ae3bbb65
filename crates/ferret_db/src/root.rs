//! Root queries.

use crate::error::{DbError, Result};
use crate::retry::retry;
use crate::store::Store;
use crate::types::{from_unix, Id, Root};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

const ROOT_ADD: &str = "INSERT INTO root (path) VALUES (?1) RETURNING id";
const ROOT_GET_BY_PATH: &str = "SELECT id, path, last_scan FROM root WHERE path = ?1";
const ROOT_GET_BY_ID: &str = "SELECT id, path, last_scan FROM root WHERE id = ?1";
const ROOT_GET_ALL: &str = "SELECT id, path, last_scan FROM root ORDER BY path";
const ROOT_DELETE: &str = "DELETE FROM root WHERE id = ?1";
const ROOT_MARK_SCAN: &str = "UPDATE root SET last_scan = ?1 WHERE id = ?2";

fn row_to_root(row: &Row<'_>) -> rusqlite::Result<Root> {
    Ok(Root {
        id: row.get(0)?,
        path: row.get(1)?,
        last_scan: from_unix(row.get(2)?),
    })
}

impl Store {
    /// Register a new root directory.
    pub fn root_add(&mut self, path: &str) -> Result<Root> {
        if path.trim().is_empty() {
            return Err(DbError::invalid_value("root path must not be empty"));
        }
        let id: Id = self.write(|conn| {
            retry(|| {
                conn.prepare_cached(ROOT_ADD)?
                    .query_row(params![path], |row| row.get(0))
            })
        })?;
        info!(root = %path, id, "Root added");
        Ok(Root {
            id,
            path: path.to_string(),
            last_scan: from_unix(0),
        })
    }

    pub fn root_get_by_path(&self, path: &str) -> Result<Option<Root>> {
        let conn = self.conn();
        retry(|| {
            conn.prepare_cached(ROOT_GET_BY_PATH)?
                .query_row(params![path], row_to_root)
                .optional()
        })
    }

    pub fn root_get_by_id(&self, id: Id) -> Result<Option<Root>> {
        let conn = self.conn();
        retry(|| {
            conn.prepare_cached(ROOT_GET_BY_ID)?
                .query_row(params![id], row_to_root)
                .optional()
        })
    }

    /// All roots, ordered by path.
    pub fn root_get_all(&self) -> Result<Vec<Root>> {
        let conn = self.conn();
        retry(|| {
            let mut stmt = conn.prepare_cached(ROOT_GET_ALL)?;
            let rows = stmt.query_map([], row_to_root)?;
            rows.collect()
        })
    }

    /// Delete a root and, by cascade, all of its files and their metadata.
    pub fn root_delete(&mut self, id: Id) -> Result<()> {
        let affected = self.write(|conn| {
            retry(|| conn.prepare_cached(ROOT_DELETE)?.execute(params![id]))
        })?;
        if affected == 0 {
            return Err(DbError::not_found(format!("root {}", id)));
        }
        info!(id, "Root deleted");
        Ok(())
    }

    /// Record the completion time of a walk over `root`.
    pub fn root_mark_scanned(&mut self, root: &mut Root, when: DateTime<Utc>) -> Result<()> {
        let stamp = when.timestamp();
        let id = root.id;
        let affected = self.write(|conn| {
            retry(|| {
                conn.prepare_cached(ROOT_MARK_SCAN)?
                    .execute(params![stamp, id])
            })
        })?;
        if affected == 0 {
            return Err(DbError::not_found(format!("root {}", id)));
        }
        root.last_scan = from_unix(stamp);
        Ok(())
    }
}
