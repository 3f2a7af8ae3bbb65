//! Metadata queries and full-text search.
//!
//! The `meta_fts` index is maintained by triggers on `meta`; nothing in here
//! writes to it directly.

use crate::error::{DbError, Result};
use crate::file::select_files;
use crate::retry::retry;
use crate::store::Store;
use crate::types::{from_unix, File, FileMeta, Id};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeMap;
use tracing::debug;

const META_COLUMNS: &str = "m.id, m.file_id, m.timestamp, m.content, m.meta";

const META_ADD: &str = r#"
INSERT INTO meta (file_id, timestamp, content, meta)
VALUES           (     ?1,        ?2,      ?3,   ?4)
RETURNING id
"#;

const META_UPSERT: &str = r#"
INSERT INTO meta (file_id, timestamp, content, meta)
VALUES           (     ?1,        ?2,      ?3,   ?4)
ON CONFLICT (file_id) DO UPDATE
SET timestamp = excluded.timestamp,
    content   = excluded.content,
    meta      = excluded.meta
RETURNING id
"#;

const META_SEARCH: &str = r#"
SELECT f.id, f.root_id, f.path, f.mime_type, f.ctime, f.last_refresh
FROM meta_fts
JOIN file f ON f.id = meta_fts.file_id
WHERE meta_fts MATCH ?1
ORDER BY meta_fts.rank
"#;

fn row_to_meta(row: &Row<'_>) -> rusqlite::Result<FileMeta> {
    let raw: String = row.get(4)?;
    let meta: BTreeMap<String, String> = serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(FileMeta {
        id: row.get(0)?,
        file_id: row.get(1)?,
        timestamp: from_unix(row.get(2)?),
        content: row.get(3)?,
        meta,
    })
}

fn select_meta(filter: &str) -> String {
    format!("SELECT {} FROM meta m {}", META_COLUMNS, filter)
}

/// Quote every whitespace separated term so FTS5 operators in user input are
/// searched literally. Terms are implicitly AND-ed.
pub fn escape_fts_query(text: &str) -> String {
    text.split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Store {
    /// Insert metadata for a file that has none yet; sets `meta.id`.
    pub fn meta_add(&mut self, meta: &mut FileMeta) -> Result<()> {
        let id = self.store_meta(META_ADD, meta)?;
        meta.id = id;
        debug!(file_id = meta.file_id, id, "Metadata added");
        Ok(())
    }

    /// Insert or replace the metadata of `meta.file_id`.
    ///
    /// The row keeps its id across replacements, so repeating an upsert with
    /// identical input changes nothing.
    pub fn meta_upsert(&mut self, meta: &mut FileMeta) -> Result<()> {
        let id = self.store_meta(META_UPSERT, meta)?;
        meta.id = id;
        debug!(file_id = meta.file_id, id, "Metadata stored");
        Ok(())
    }

    fn store_meta(&mut self, sql: &str, meta: &FileMeta) -> Result<Id> {
        if meta.file_id <= 0 {
            return Err(DbError::invalid_value(format!(
                "metadata needs a stored file, got file id {}",
                meta.file_id
            )));
        }
        let attrs = serde_json::to_string(&meta.meta)?;
        let stamp = meta.timestamp.timestamp();
        self.write(|conn| {
            retry(|| {
                conn.prepare_cached(sql)?.query_row(
                    params![meta.file_id, stamp, meta.content, attrs],
                    |row| row.get(0),
                )
            })
        })
    }

    pub fn meta_get_by_file(&self, file_id: Id) -> Result<Option<FileMeta>> {
        let sql = select_meta("WHERE m.file_id = ?1");
        let conn = self.conn();
        retry(|| {
            conn.prepare_cached(&sql)?
                .query_row(params![file_id], row_to_meta)
                .optional()
        })
    }

    /// Metadata of every file below a root, ordered by file path.
    pub fn meta_get_by_root(&self, root_id: Id) -> Result<Vec<FileMeta>> {
        self.query_meta(
            &select_meta("JOIN file f ON f.id = m.file_id WHERE f.root_id = ?1 ORDER BY f.path"),
            params![root_id],
        )
    }

    pub fn meta_get_all(&self) -> Result<Vec<FileMeta>> {
        self.query_meta(&select_meta("ORDER BY m.file_id"), params![])
    }

    /// Files changed since their metadata was extracted.
    pub fn meta_get_outdated(&self) -> Result<Vec<File>> {
        self.query_files(
            &select_files(
                "JOIN meta m ON m.file_id = f.id WHERE f.ctime > m.timestamp ORDER BY f.path",
            ),
            params![],
        )
    }

    /// Full-text search over extracted content, best match first.
    ///
    /// `query` uses FTS5 syntax; pass it through [`escape_fts_query`] to search
    /// for literal terms.
    pub fn meta_search(&self, query: &str) -> Result<Vec<File>> {
        if query.trim().is_empty() {
            return Err(DbError::invalid_value("search query must not be empty"));
        }
        self.query_files(META_SEARCH, params![query])
    }

    fn query_meta(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<FileMeta>> {
        let conn = self.conn();
        retry(|| {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query_map(args, row_to_meta)?;
            rows.collect()
        })
    }
}
