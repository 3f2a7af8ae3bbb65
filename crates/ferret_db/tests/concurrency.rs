//! Concurrent access through the pool: lock contention must be absorbed by
//! the retry policy, never surfaced to callers.

use ferret_db::{from_unix, retry, FileMeta, Pool, PoolConfig, Store};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn open_pool(dir: &TempDir, capacity: usize) -> Arc<Pool> {
    let config = PoolConfig::new(dir.path().join("index.sqlite3")).with_capacity(capacity);
    Arc::new(Pool::open(config).unwrap())
}

#[test]
fn parallel_writers_all_succeed() {
    let dir = TempDir::new().unwrap();
    let pool = open_pool(&dir, 4);
    let root_id = pool.lease().unwrap().root_add("/data").unwrap().id;

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..25 {
                    let mut store = pool.lease().unwrap();
                    let path = format!("/data/w{}/f{:03}.txt", worker, i);
                    let file = store
                        .file_add(root_id, &path, "text/plain", from_unix(i))
                        .unwrap();
                    let mut meta = FileMeta::new(file.id).with_content(format!("worker{} item{}", worker, i));
                    store.meta_upsert(&mut meta).unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let store = pool.lease().unwrap();
    assert_eq!(store.file_get_all().unwrap().len(), 100);
    assert_eq!(store.meta_get_all().unwrap().len(), 100);
    assert_eq!(store.meta_search("worker2").unwrap().len(), 25);
}

#[test]
fn writer_waits_for_open_transaction() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.sqlite3");
    let mut holder = Store::open(&path).unwrap();
    let mut contender = Store::open(&path).unwrap();

    holder.begin().unwrap();
    holder.root_add("/first").unwrap();

    let before = retry::wait_count();
    let writer = thread::spawn(move || {
        let root = contender.root_add("/second").unwrap();
        (contender, root)
    });

    thread::sleep(Duration::from_millis(200));
    holder.commit().unwrap();

    let (contender, root) = writer.join().unwrap();
    assert_eq!(root.path, "/second");
    assert!(retry::wait_count() > before);
    assert_eq!(contender.root_get_all().unwrap().len(), 2);
}

#[test]
fn explicit_transaction_spans_several_queries() {
    let dir = TempDir::new().unwrap();
    let pool = open_pool(&dir, 2);
    let mut store = pool.lease().unwrap();

    store.begin().unwrap();
    let root = store.root_add("/batch").unwrap();
    for i in 0..10 {
        store
            .file_add(root.id, &format!("/batch/{}.txt", i), "text/plain", from_unix(1))
            .unwrap();
    }
    store.savepoint_create("after-ten").unwrap();
    store
        .file_add(root.id, "/batch/extra.txt", "text/plain", from_unix(1))
        .unwrap();
    store.savepoint_rollback("after-ten").unwrap();
    store.commit().unwrap();

    // a different handle sees exactly the committed state
    let other = pool.lease().unwrap();
    assert_eq!(other.file_get_by_root(root.id).unwrap().len(), 10);
}
