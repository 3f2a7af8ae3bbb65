//! Removal of index entries for files that no longer exist.

use crate::error::Result;
use ferret_db::{File, Pool, Store};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub checked: u64,
    pub removed: u64,
}

/// Delete every file row whose path is gone from disk.
///
/// Metadata and full-text rows follow through the schema's cascade. All
/// deletions happen in one transaction.
pub fn prune_missing(pool: &Pool) -> Result<PruneStats> {
    let mut store = pool.lease()?;
    let files = store.file_get_all()?;

    store.begin()?;
    match delete_missing(&mut store, &files) {
        Ok(stats) => {
            store.commit()?;
            info!(checked = stats.checked, removed = stats.removed, "Prune finished");
            Ok(stats)
        }
        Err(err) => {
            if let Err(rollback) = store.rollback() {
                warn!(error = %rollback, "Rollback after failed prune failed");
            }
            Err(err)
        }
    }
}

fn delete_missing(store: &mut Store, files: &[File]) -> Result<PruneStats> {
    let mut stats = PruneStats::default();
    for file in files {
        stats.checked += 1;
        if is_missing(Path::new(&file.path)) {
            store.file_delete(file.id)?;
            stats.removed += 1;
        }
    }
    Ok(stats)
}

// Anything other than NotFound (permissions, flaky mounts) keeps the row.
fn is_missing(path: &Path) -> bool {
    matches!(
        path.symlink_metadata(),
        Err(err) if err.kind() == ErrorKind::NotFound
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferret_db::{from_unix, FileMeta, PoolConfig};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn removes_only_missing_files() {
        let db = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let pool = Pool::open(PoolConfig::new(db.path().join("index.sqlite3"))).unwrap();

        let kept = data.path().join("kept.txt");
        let gone = data.path().join("gone.txt");
        fs::write(&kept, "stay").unwrap();
        fs::write(&gone, "leave").unwrap();

        let gone_id = {
            let mut store = pool.lease().unwrap();
            let root = store.root_add(&data.path().to_string_lossy()).unwrap();
            store
                .file_add(root.id, &kept.to_string_lossy(), "text/plain", from_unix(1))
                .unwrap();
            let file = store
                .file_add(root.id, &gone.to_string_lossy(), "text/plain", from_unix(1))
                .unwrap();
            store
                .meta_upsert(&mut FileMeta::new(file.id).with_content("vanishing"))
                .unwrap();
            file.id
        };
        fs::remove_file(&gone).unwrap();

        let stats = prune_missing(&pool).unwrap();
        assert_eq!(stats, PruneStats { checked: 2, removed: 1 });

        let store = pool.lease().unwrap();
        assert!(store.file_get_by_id(gone_id).unwrap().is_none());
        assert_eq!(store.file_get_all().unwrap().len(), 1);
        assert!(store.meta_search("vanishing").unwrap().is_empty());
        assert!(!store.in_transaction());
    }

    #[test]
    fn empty_index_is_a_noop() {
        let db = TempDir::new().unwrap();
        let pool = Pool::open(PoolConfig::new(db.path().join("index.sqlite3"))).unwrap();
        assert_eq!(prune_missing(&pool).unwrap(), PruneStats::default());
    }
}
