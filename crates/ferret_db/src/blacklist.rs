//! Persistence of blacklist rules.

use crate::error::{DbError, Result};
use crate::retry::retry;
use crate::store::Store;
use crate::types::{BlacklistRecord, Id};
use rusqlite::{params, Row};
use tracing::info;

const BLACKLIST_ADD: &str = "INSERT INTO blacklist (pattern, is_glob) VALUES (?1, ?2) RETURNING id";
const BLACKLIST_HIT: &str = "UPDATE blacklist SET hit_cnt = hit_cnt + 1 WHERE id = ?1";
const BLACKLIST_GET_ALL: &str =
    "SELECT id, pattern, is_glob, hit_cnt FROM blacklist ORDER BY hit_cnt DESC, id";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<BlacklistRecord> {
    let hits: i64 = row.get(3)?;
    Ok(BlacklistRecord {
        id: row.get(0)?,
        pattern: row.get(1)?,
        is_glob: row.get(2)?,
        hits: hits.max(0) as u64,
    })
}

impl Store {
    /// Persist a new rule. The pattern is stored as given; compiling it is
    /// the caller's job.
    pub fn blacklist_add(&mut self, pattern: &str, is_glob: bool) -> Result<BlacklistRecord> {
        if pattern.is_empty() {
            return Err(DbError::invalid_value("blacklist pattern must not be empty"));
        }
        let id: Id = self.write(|conn| {
            retry(|| {
                conn.prepare_cached(BLACKLIST_ADD)?
                    .query_row(params![pattern, is_glob], |row| row.get(0))
            })
        })?;
        info!(pattern, is_glob, id, "Blacklist rule added");
        Ok(BlacklistRecord {
            id,
            pattern: pattern.to_string(),
            is_glob,
            hits: 0,
        })
    }

    /// Increment the hit counter of rule `id`.
    pub fn blacklist_hit(&mut self, id: Id) -> Result<()> {
        let affected =
            self.write(|conn| retry(|| conn.prepare_cached(BLACKLIST_HIT)?.execute(params![id])))?;
        if affected == 0 {
            return Err(DbError::not_found(format!("blacklist rule {}", id)));
        }
        Ok(())
    }

    /// All rules, most frequently hit first.
    pub fn blacklist_get_all(&self) -> Result<Vec<BlacklistRecord>> {
        let conn = self.conn();
        retry(|| {
            let mut stmt = conn.prepare_cached(BLACKLIST_GET_ALL)?;
            let rows = stmt.query_map([], row_to_record)?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SEED_RULES;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("index.sqlite3")).unwrap();
        (dir, store)
    }

    #[test]
    fn fresh_database_has_seed_rules() {
        let (_dir, store) = open_temp();
        let rules = store.blacklist_get_all().unwrap();
        assert_eq!(rules.len(), SEED_RULES.len());
        assert_eq!(rules.len(), 10);
        assert!(rules.iter().all(|r| r.hits == 0));
    }

    #[test]
    fn add_and_hit() {
        let (_dir, mut store) = open_temp();
        let bak = store.blacklist_add("*.bak", true).unwrap();
        let tmp = store.blacklist_add(r"\.tmp$", false).unwrap();

        store.blacklist_hit(tmp.id).unwrap();
        store.blacklist_hit(tmp.id).unwrap();
        store.blacklist_hit(bak.id).unwrap();

        let rules = store.blacklist_get_all().unwrap();
        assert_eq!(rules[0].id, tmp.id);
        assert_eq!(rules[0].hits, 2);
        assert!(!rules[0].is_glob);
        assert_eq!(rules[1].id, bak.id);
        assert_eq!(rules[1].hits, 1);
        assert!(rules[1].is_glob);
    }

    #[test]
    fn duplicate_pattern_is_rejected() {
        let (_dir, mut store) = open_temp();
        store.blacklist_add("*.bak", true).unwrap();
        assert!(store.blacklist_add("*.bak", false).unwrap_err().is_constraint());
    }

    #[test]
    fn hit_on_unknown_rule() {
        let (_dir, mut store) = open_temp();
        assert!(matches!(store.blacklist_hit(9_999), Err(DbError::NotFound(_))));
    }
}
