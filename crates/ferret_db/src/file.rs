//! File queries.

use crate::error::{DbError, Result};
use crate::retry::retry;
use crate::store::Store;
use crate::types::{from_unix, now, File, Id};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

const FILE_COLUMNS: &str = "f.id, f.root_id, f.path, f.mime_type, f.ctime, f.last_refresh";

const FILE_ADD: &str = r#"
INSERT INTO file (root_id, path, mime_type, ctime, last_refresh)
VALUES           (     ?1,   ?2,        ?3,    ?4,           ?5)
RETURNING id
"#;
const FILE_DELETE: &str = "DELETE FROM file WHERE id = ?1";
const FILE_UPDATE_CTIME: &str = "UPDATE file SET ctime = ?1, last_refresh = ?2 WHERE id = ?3";

pub(crate) fn row_to_file(row: &Row<'_>) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        root_id: row.get(1)?,
        path: row.get(2)?,
        content_type: row.get(3)?,
        ctime: from_unix(row.get(4)?),
        last_refresh: from_unix(row.get(5)?),
    })
}

pub(crate) fn select_files(filter: &str) -> String {
    format!("SELECT {} FROM file f {}", FILE_COLUMNS, filter)
}

/// Convert a user pattern to a SQL LIKE pattern (with `\` as escape).
///
/// `*` and `?` are wildcards. A pattern without wildcards matches anywhere in
/// the path.
pub fn pattern_to_like(pattern: &str) -> String {
    let mut result = String::with_capacity(pattern.len() + 4);
    let mut wildcard = false;

    for c in pattern.chars() {
        match c {
            '*' => {
                wildcard = true;
                result.push('%');
            }
            '?' => {
                wildcard = true;
                result.push('_');
            }
            '%' | '_' | '\\' => {
                result.push('\\');
                result.push(c);
            }
            _ => result.push(c),
        }
    }

    if wildcard {
        result
    } else {
        format!("%{}%", result)
    }
}

impl Store {
    /// Record a newly discovered file.
    ///
    /// A second add for the same `(root_id, path)` fails with
    /// [`DbError::Constraint`].
    pub fn file_add(
        &mut self,
        root_id: Id,
        path: &str,
        content_type: &str,
        ctime: DateTime<Utc>,
    ) -> Result<File> {
        if path.is_empty() {
            return Err(DbError::invalid_value("file path must not be empty"));
        }
        let refreshed = now();
        let stamp = ctime.timestamp();
        let id: Id = self.write(|conn| {
            retry(|| {
                conn.prepare_cached(FILE_ADD)?.query_row(
                    params![root_id, path, content_type, stamp, refreshed.timestamp()],
                    |row| row.get(0),
                )
            })
        })?;
        debug!(file = %path, id, content_type, "File added");
        Ok(File {
            id,
            root_id,
            path: path.to_string(),
            content_type: content_type.to_string(),
            ctime: from_unix(stamp),
            last_refresh: refreshed,
        })
    }

    /// Delete a file row; its metadata and full-text entry go with it.
    pub fn file_delete(&mut self, id: Id) -> Result<()> {
        let affected =
            self.write(|conn| retry(|| conn.prepare_cached(FILE_DELETE)?.execute(params![id])))?;
        if affected == 0 {
            return Err(DbError::not_found(format!("file {}", id)));
        }
        Ok(())
    }

    /// Store a new change time for `file`.
    ///
    /// Fails with [`DbError::EmptyUpdate`] if the time is unchanged.
    pub fn file_update_ctime(&mut self, file: &mut File, ctime: DateTime<Utc>) -> Result<()> {
        let stamp = ctime.timestamp();
        if stamp == file.ctime.timestamp() {
            return Err(DbError::EmptyUpdate);
        }
        let refreshed = now();
        let id = file.id;
        let affected = self.write(|conn| {
            retry(|| {
                conn.prepare_cached(FILE_UPDATE_CTIME)?
                    .execute(params![stamp, refreshed.timestamp(), id])
            })
        })?;
        if affected == 0 {
            return Err(DbError::not_found(format!("file {}", id)));
        }
        file.ctime = from_unix(stamp);
        file.last_refresh = refreshed;
        Ok(())
    }

    /// First file with this path, in any root.
    pub fn file_get_by_path(&self, path: &str) -> Result<Option<File>> {
        let sql = select_files("WHERE f.path = ?1 ORDER BY f.id LIMIT 1");
        let conn = self.conn();
        retry(|| {
            conn.prepare_cached(&sql)?
                .query_row(params![path], row_to_file)
                .optional()
        })
    }

    /// The file with this path below a specific root.
    pub fn file_get_by_root_path(&self, root_id: Id, path: &str) -> Result<Option<File>> {
        let sql = select_files("WHERE f.root_id = ?1 AND f.path = ?2");
        let conn = self.conn();
        retry(|| {
            conn.prepare_cached(&sql)?
                .query_row(params![root_id, path], row_to_file)
                .optional()
        })
    }

    pub fn file_get_by_id(&self, id: Id) -> Result<Option<File>> {
        let sql = select_files("WHERE f.id = ?1");
        let conn = self.conn();
        retry(|| {
            conn.prepare_cached(&sql)?
                .query_row(params![id], row_to_file)
                .optional()
        })
    }

    /// Files whose path matches `pattern` (see [`pattern_to_like`]).
    pub fn file_get_by_pattern(&self, pattern: &str) -> Result<Vec<File>> {
        let like = pattern_to_like(pattern);
        self.query_files(
            &select_files(r"WHERE f.path LIKE ?1 ESCAPE '\' ORDER BY f.path"),
            params![like],
        )
    }

    /// Files that have no metadata yet, ordered by path.
    pub fn file_get_no_meta(&self) -> Result<Vec<File>> {
        self.query_files(
            &select_files(
                "LEFT JOIN meta m ON m.file_id = f.id WHERE m.id IS NULL ORDER BY f.path",
            ),
            params![],
        )
    }

    pub fn file_get_by_root(&self, root_id: Id) -> Result<Vec<File>> {
        self.query_files(
            &select_files("WHERE f.root_id = ?1 ORDER BY f.path"),
            params![root_id],
        )
    }

    pub fn file_get_all(&self) -> Result<Vec<File>> {
        self.query_files(&select_files("ORDER BY f.path"), params![])
    }

    pub(crate) fn query_files(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<File>> {
        let conn = self.conn();
        retry(|| {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query_map(args, row_to_file)?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_with_root() -> (TempDir, Store, Id) {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path().join("index.sqlite3")).unwrap();
        let root = store.root_add("/data").unwrap();
        (dir, store, root.id)
    }

    #[test]
    fn like_pattern_conversion() {
        assert_eq!(pattern_to_like("report"), "%report%");
        assert_eq!(pattern_to_like("*.txt"), "%.txt");
        assert_eq!(pattern_to_like("/data/?.md"), "/data/_.md");
        assert_eq!(pattern_to_like("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn add_and_lookup() {
        let (_dir, mut store, root_id) = open_with_root();
        let file = store
            .file_add(root_id, "/data/notes.txt", "text/plain", from_unix(1_000))
            .unwrap();
        assert!(file.id > 0);
        assert_eq!(file.ctime.timestamp(), 1_000);

        assert_eq!(store.file_get_by_id(file.id).unwrap().unwrap(), file);
        assert_eq!(store.file_get_by_path("/data/notes.txt").unwrap().unwrap(), file);
        assert_eq!(
            store
                .file_get_by_root_path(root_id, "/data/notes.txt")
                .unwrap()
                .unwrap(),
            file
        );
        assert!(store.file_get_by_path("/data/other.txt").unwrap().is_none());
    }

    #[test]
    fn duplicate_root_path_is_rejected() {
        let (_dir, mut store, root_id) = open_with_root();
        store
            .file_add(root_id, "/data/a.txt", "text/plain", from_unix(1))
            .unwrap();
        let err = store
            .file_add(root_id, "/data/a.txt", "text/plain", from_unix(2))
            .unwrap_err();
        assert!(err.is_constraint(), "unexpected error: {err}");
        assert_eq!(store.file_get_all().unwrap().len(), 1);
    }

    #[test]
    fn same_path_in_two_roots_is_allowed() {
        let (_dir, mut store, root_id) = open_with_root();
        let other = store.root_add("/mirror").unwrap();
        store
            .file_add(root_id, "/data/a.txt", "text/plain", from_unix(1))
            .unwrap();
        store
            .file_add(other.id, "/data/a.txt", "text/plain", from_unix(1))
            .unwrap();
        assert_eq!(store.file_get_all().unwrap().len(), 2);
        assert_eq!(store.file_get_by_root(other.id).unwrap().len(), 1);
    }

    #[test]
    fn unknown_root_is_rejected() {
        let (_dir, mut store, _root_id) = open_with_root();
        let err = store
            .file_add(4242, "/data/a.txt", "text/plain", from_unix(1))
            .unwrap_err();
        assert!(err.is_constraint());
    }

    #[test]
    fn update_ctime() {
        let (_dir, mut store, root_id) = open_with_root();
        let mut file = store
            .file_add(root_id, "/data/a.txt", "text/plain", from_unix(100))
            .unwrap();

        assert!(matches!(
            store.file_update_ctime(&mut file, from_unix(100)),
            Err(DbError::EmptyUpdate)
        ));

        store.file_update_ctime(&mut file, from_unix(200)).unwrap();
        assert_eq!(file.ctime.timestamp(), 200);
        let stored = store.file_get_by_id(file.id).unwrap().unwrap();
        assert_eq!(stored.ctime.timestamp(), 200);
    }

    #[test]
    fn delete() {
        let (_dir, mut store, root_id) = open_with_root();
        let file = store
            .file_add(root_id, "/data/a.txt", "text/plain", from_unix(1))
            .unwrap();
        store.file_delete(file.id).unwrap();
        assert!(store.file_get_by_id(file.id).unwrap().is_none());
        assert!(matches!(store.file_delete(file.id), Err(DbError::NotFound(_))));
    }

    #[test]
    fn get_by_pattern() {
        let (_dir, mut store, root_id) = open_with_root();
        for path in ["/data/a.txt", "/data/b.md", "/data/sub/c.txt", "/data/report_2024.pdf"] {
            store
                .file_add(root_id, path, "text/plain", from_unix(1))
                .unwrap();
        }

        let txt: Vec<_> = store
            .file_get_by_pattern("*.txt")
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(txt, vec!["/data/a.txt", "/data/sub/c.txt"]);

        let sub = store.file_get_by_pattern("sub").unwrap();
        assert_eq!(sub.len(), 1);

        // `_` is literal, not a single-character wildcard
        assert_eq!(store.file_get_by_pattern("report_").unwrap().len(), 1);
        assert!(store.file_get_by_pattern("reportX").unwrap().is_empty());
    }

    #[test]
    fn no_meta_is_ordered_by_path() {
        let (_dir, mut store, root_id) = open_with_root();
        store
            .file_add(root_id, "/data/z.txt", "text/plain", from_unix(1))
            .unwrap();
        let with_meta = store
            .file_add(root_id, "/data/m.txt", "text/plain", from_unix(1))
            .unwrap();
        store
            .file_add(root_id, "/data/a.txt", "text/plain", from_unix(1))
            .unwrap();

        let mut meta = crate::types::FileMeta::new(with_meta.id).with_content("m");
        store.meta_add(&mut meta).unwrap();

        let paths: Vec<_> = store
            .file_get_no_meta()
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec!["/data/a.txt", "/data/z.txt"]);
    }
}
