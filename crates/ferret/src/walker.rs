//! Filesystem walker with a background scan queue.
//!
//! Roots are scheduled onto a bounded queue and walked one at a time by a
//! single background thread. A walk records new regular files, refreshes the
//! change time of known ones and skips anything the blacklist rejects. A root
//! scanned less than `scan_interval` ago is not touched again.
//!
//! Removed files are not detected here; see [`crate::prune`].

use crate::blacklist::Blacklist;
use crate::content_type;
use crate::error::{FerretError, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use ferret_db::{from_unix, Id, Pool, Root, Store};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Configuration for the walker
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Minimum time between two walks of the same root
    pub scan_interval: Duration,
    /// A file whose mtime is within this of the recorded ctime is unchanged
    pub debounce: Duration,
    /// Number of roots that may wait in the queue
    pub queue_capacity: usize,
    /// How often the idle loop checks for a stop request
    pub tick_interval: Duration,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(3600),
            debounce: Duration::from_secs(1),
            queue_capacity: 64,
            tick_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    Idle,
    Scheduled,
    Scanning,
}

/// A path that could not be visited or recorded.
#[derive(Debug, Clone)]
pub struct WalkIssue {
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of one walk.
#[derive(Debug, Clone, Default)]
pub struct WalkStats {
    pub files_seen: u64,
    pub files_added: u64,
    pub files_updated: u64,
    pub blacklisted: u64,
    pub errors: Vec<WalkIssue>,
    /// The root was scanned recently and left alone
    pub skipped: bool,
}

pub struct Walker {
    pool: Arc<Pool>,
    blacklist: Arc<Blacklist>,
    config: WalkerConfig,
    queue_tx: Sender<Id>,
    queue_rx: Receiver<Id>,
    active: AtomicBool,
    scanning: AtomicBool,
    /// Roots scheduled and not yet finished
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Walker {
    pub fn new(pool: Arc<Pool>, blacklist: Arc<Blacklist>, config: WalkerConfig) -> Self {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(config.queue_capacity.max(1));
        Self {
            pool,
            blacklist,
            config,
            queue_tx,
            queue_rx,
            active: AtomicBool::new(false),
            scanning: AtomicBool::new(false),
            pending: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    /// Queue `root_id` for a walk without blocking.
    pub fn schedule_scan(&self, root_id: Id) -> Result<()> {
        // counted first so the loop can never finish the item before it is counted
        *self.lock_pending() += 1;
        match self.queue_tx.try_send(root_id) {
            Ok(()) => {
                debug!(root = root_id, "Scan scheduled");
                Ok(())
            }
            // the walker owns the receiver, so the queue can only be full
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.finish_one();
                warn!(root = root_id, "Scan queue full");
                Err(FerretError::QueueFull)
            }
        }
    }

    pub fn state(&self) -> WalkerState {
        if self.scanning.load(Ordering::SeqCst) {
            WalkerState::Scanning
        } else if *self.lock_pending() > 0 {
            WalkerState::Scheduled
        } else {
            WalkerState::Idle
        }
    }

    /// Block until every scheduled root has been walked or dropped.
    ///
    /// Only returns once the loop is running (or has stopped and drained).
    pub fn wait_idle(&self) {
        let mut pending = self.lock_pending();
        while *pending > 0 {
            pending = self
                .idle
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn the background loop.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(FerretError::AlreadyRunning);
        }
        let walker = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("ferret-walker".to_string())
            .spawn(move || walker.run_loop());
        match handle {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.active.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    /// Ask the loop to exit after the current walk. Queued roots are dropped.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("Walker stopping");
        }
    }

    fn run_loop(&self) {
        info!("Walker started");
        let ticker = crossbeam_channel::tick(self.config.tick_interval);
        while self.is_active() {
            select! {
                recv(self.queue_rx) -> msg => match msg {
                    Ok(root_id) => self.process(root_id),
                    Err(_) => break,
                },
                recv(ticker) -> _ => {}
            }
        }

        let mut dropped = 0;
        while self.queue_rx.try_recv().is_ok() {
            dropped += 1;
            self.finish_one();
        }
        info!(dropped, "Walker stopped");
    }

    fn process(&self, root_id: Id) {
        self.scanning.store(true, Ordering::SeqCst);
        match self.walk(root_id) {
            Ok(stats) if stats.skipped => {}
            Ok(stats) => {
                for issue in &stats.errors {
                    debug!(path = %issue.path.display(), error = %issue.message, "Walk issue");
                }
            }
            Err(err) => error!(root = root_id, error = %err, "Walk failed"),
        }
        self.scanning.store(false, Ordering::SeqCst);
        self.finish_one();
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, usize> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_one(&self) {
        let mut pending = self.lock_pending();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    /// Walk one root synchronously.
    pub fn walk(&self, root_id: Id) -> Result<WalkStats> {
        let mut store = self.pool.lease()?;
        let mut root = store
            .root_get_by_id(root_id)?
            .ok_or(FerretError::RootNotFound(root_id))?;

        if self.recently_scanned(&root) {
            debug!(root = %root.path, last_scan = %root.last_scan, "Root scanned recently, skipping");
            return Ok(WalkStats {
                skipped: true,
                ..WalkStats::default()
            });
        }

        let root_dir = PathBuf::from(&root.path);
        if !root_dir.is_dir() {
            return Err(FerretError::RootMissing(root.path.clone()));
        }

        info!(root = %root.path, "Walk started");
        let mut stats = WalkStats::default();
        let mut hits: Vec<Id> = Vec::new();
        let blacklist = &self.blacklist;

        let entries = WalkDir::new(&root_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // the root itself may well have a name the rules reject
                if entry.depth() == 0 {
                    return true;
                }
                match blacklist.match_rule(entry.file_name()) {
                    Some(rule) => {
                        hits.push(rule);
                        false
                    }
                    None => true,
                }
            });

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    warn!(path = %path.display(), error = %err, "Cannot read entry");
                    stats.errors.push(WalkIssue {
                        path,
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            stats.files_seen += 1;
            // a lossy name would never resolve back to the file
            let Some(name) = entry.path().to_str() else {
                warn!(path = %entry.path().display(), "Path is not valid UTF-8, skipping");
                stats.errors.push(WalkIssue {
                    path: entry.path().to_path_buf(),
                    message: "path is not valid UTF-8".to_string(),
                });
                continue;
            };
            if let Err(err) = self.record(&mut store, &root, &entry, name, &mut stats) {
                warn!(path = %entry.path().display(), error = %err, "Cannot record file");
                stats.errors.push(WalkIssue {
                    path: entry.path().to_path_buf(),
                    message: err.to_string(),
                });
            }
        }

        stats.blacklisted = hits.len() as u64;
        for rule in hits {
            if let Err(err) = store.blacklist_hit(rule) {
                warn!(rule, error = %err, "Cannot persist blacklist hit");
            }
        }

        store.root_mark_scanned(&mut root, ferret_db::now())?;
        info!(
            root = %root.path,
            seen = stats.files_seen,
            added = stats.files_added,
            updated = stats.files_updated,
            blacklisted = stats.blacklisted,
            errors = stats.errors.len(),
            "Walk finished"
        );
        Ok(stats)
    }

    fn recently_scanned(&self, root: &Root) -> bool {
        let Ok(interval) = chrono::Duration::from_std(self.config.scan_interval) else {
            return true;
        };
        root.last_scan
            .checked_add_signed(interval)
            .is_some_and(|next| ferret_db::now() < next)
    }

    fn record(
        &self,
        store: &mut Store,
        root: &Root,
        entry: &DirEntry,
        name: &str,
        stats: &mut WalkStats,
    ) -> Result<()> {
        let path = entry.path();
        let modified: DateTime<Utc> = entry.metadata()?.modified()?.into();
        let mtime = from_unix(modified.timestamp());

        match store.file_get_by_root_path(root.id, name)? {
            None => {
                let content_type = content_type::detect(path)?;
                store.file_add(root.id, name, &content_type, mtime)?;
                stats.files_added += 1;
            }
            Some(mut file) => {
                let debounce = self.config.debounce.as_millis() as i64;
                if (mtime - file.ctime).num_milliseconds() > debounce {
                    store.file_update_ctime(&mut file, mtime)?;
                    stats.files_updated += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::Rule;
    use ferret_db::PoolConfig;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _db: TempDir,
        data: TempDir,
        pool: Arc<Pool>,
    }

    fn fixture() -> Fixture {
        let db = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let pool = Arc::new(Pool::open(PoolConfig::new(db.path().join("index.sqlite3"))).unwrap());
        Fixture { _db: db, data, pool }
    }

    fn walker(fx: &Fixture, scan_interval: Duration) -> Walker {
        let records = fx.pool.lease().unwrap().blacklist_get_all().unwrap();
        let blacklist = Arc::new(Blacklist::from_records(&records).unwrap());
        let config = WalkerConfig {
            scan_interval,
            tick_interval: Duration::from_millis(20),
            ..WalkerConfig::default()
        };
        Walker::new(Arc::clone(&fx.pool), blacklist, config)
    }

    fn add_root(fx: &Fixture) -> Id {
        let path = fx.data.path().to_string_lossy().to_string();
        fx.pool.lease().unwrap().root_add(&path).unwrap().id
    }

    #[test]
    fn walk_records_regular_files() {
        let fx = fixture();
        fs::create_dir(fx.data.path().join("sub")).unwrap();
        fs::write(fx.data.path().join("a.txt"), "alpha").unwrap();
        fs::write(fx.data.path().join("sub/b.json"), "{}").unwrap();
        let root_id = add_root(&fx);

        let stats = walker(&fx, Duration::ZERO).walk(root_id).unwrap();
        assert!(!stats.skipped);
        assert_eq!(stats.files_seen, 2);
        assert_eq!(stats.files_added, 2);
        assert!(stats.errors.is_empty());

        let files = fx.pool.lease().unwrap().file_get_by_root(root_id).unwrap();
        let types: Vec<_> = files.iter().map(|f| f.content_type.as_str()).collect();
        assert!(types.contains(&"text/plain"));
        assert!(types.contains(&"application/json"));
    }

    #[test]
    fn blacklisted_directories_are_not_descended() {
        let fx = fixture();
        let modules = fx.data.path().join("node_modules");
        fs::create_dir(&modules).unwrap();
        fs::write(modules.join("index.js"), "x").unwrap();
        fs::write(fx.data.path().join(".hidden"), "x").unwrap();
        fs::write(fx.data.path().join("kept.txt"), "x").unwrap();
        let root_id = add_root(&fx);

        let w = walker(&fx, Duration::ZERO);
        let stats = w.walk(root_id).unwrap();
        assert_eq!(stats.files_added, 1);
        assert_eq!(stats.blacklisted, 2);

        let store = fx.pool.lease().unwrap();
        let hits: u64 = store.blacklist_get_all().unwrap().iter().map(|r| r.hits).sum();
        assert_eq!(hits, 2);
    }

    #[test]
    fn rescan_guard_skips_recent_roots() {
        let fx = fixture();
        fs::write(fx.data.path().join("a.txt"), "alpha").unwrap();
        let root_id = add_root(&fx);
        let w = walker(&fx, Duration::from_secs(3600));

        assert!(!w.walk(root_id).unwrap().skipped);
        fs::write(fx.data.path().join("b.txt"), "beta").unwrap();
        let second = w.walk(root_id).unwrap();
        assert!(second.skipped);
        assert_eq!(second.files_seen, 0);
        assert_eq!(fx.pool.lease().unwrap().file_get_all().unwrap().len(), 1);
    }

    #[test]
    fn ctime_refreshed_only_past_debounce() {
        let fx = fixture();
        let path = fx.data.path().join("a.txt");
        fs::write(&path, "alpha").unwrap();
        let base = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&path, base).unwrap();
        let root_id = add_root(&fx);
        let w = walker(&fx, Duration::ZERO);
        w.walk(root_id).unwrap();

        // inside the debounce window
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_600_000_001, 0)).unwrap();
        assert_eq!(w.walk(root_id).unwrap().files_updated, 0);

        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_600_000_060, 0)).unwrap();
        assert_eq!(w.walk(root_id).unwrap().files_updated, 1);

        let file = fx
            .pool
            .lease()
            .unwrap()
            .file_get_by_root_path(root_id, &path.to_string_lossy())
            .unwrap()
            .unwrap();
        assert_eq!(file.ctime, from_unix(1_600_000_060));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_recorded() {
        let fx = fixture();
        let target = fx.data.path().join("real.txt");
        fs::write(&target, "x").unwrap();
        std::os::unix::fs::symlink(&target, fx.data.path().join("link.txt")).unwrap();
        let root_id = add_root(&fx);

        let stats = walker(&fx, Duration::ZERO).walk(root_id).unwrap();
        assert_eq!(stats.files_added, 1);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_reported_not_recorded() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let fx = fixture();
        let odd = fx.data.path().join(OsStr::from_bytes(b"caf\xe9.txt"));
        fs::write(&odd, "x").unwrap();
        fs::write(fx.data.path().join("plain.txt"), "x").unwrap();
        let root_id = add_root(&fx);
        let w = walker(&fx, Duration::ZERO);

        let stats = w.walk(root_id).unwrap();
        assert_eq!(stats.files_seen, 2);
        assert_eq!(stats.files_added, 1);
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].path, odd);
        assert_eq!(stats.errors[0].message, "path is not valid UTF-8");

        // nothing churns: prune keeps the row, a rewalk adds nothing
        assert_eq!(crate::prune_missing(&fx.pool).unwrap().removed, 0);
        assert_eq!(w.walk(root_id).unwrap().files_added, 0);
        assert_eq!(fx.pool.lease().unwrap().file_get_all().unwrap().len(), 1);
    }

    #[test]
    fn unknown_and_missing_roots() {
        let fx = fixture();
        let w = walker(&fx, Duration::ZERO);
        assert!(matches!(w.walk(999), Err(FerretError::RootNotFound(999))));

        let gone = fx.data.path().join("gone");
        let id = fx
            .pool
            .lease()
            .unwrap()
            .root_add(&gone.to_string_lossy())
            .unwrap()
            .id;
        assert!(matches!(w.walk(id), Err(FerretError::RootMissing(_))));
    }

    #[test]
    fn full_queue_rejects_schedule() {
        let fx = fixture();
        let records = fx.pool.lease().unwrap().blacklist_get_all().unwrap();
        let config = WalkerConfig {
            queue_capacity: 1,
            ..WalkerConfig::default()
        };
        let w = Walker::new(
            Arc::clone(&fx.pool),
            Arc::new(Blacklist::from_records(&records).unwrap()),
            config,
        );
        assert_eq!(w.state(), WalkerState::Idle);
        w.schedule_scan(1).unwrap();
        assert_eq!(w.state(), WalkerState::Scheduled);
        assert!(matches!(w.schedule_scan(2), Err(FerretError::QueueFull)));
    }

    #[test]
    fn loop_walks_scheduled_roots() {
        let fx = fixture();
        fs::write(fx.data.path().join("a.txt"), "alpha").unwrap();
        let root_id = add_root(&fx);
        let w = Arc::new(walker(&fx, Duration::ZERO));

        w.schedule_scan(root_id).unwrap();
        let handle = w.start().unwrap();
        assert!(w.is_active());
        assert!(matches!(w.start(), Err(FerretError::AlreadyRunning)));

        w.wait_idle();
        assert_eq!(w.state(), WalkerState::Idle);
        w.stop();
        handle.join().unwrap();
        assert!(!w.is_active());

        let root = fx.pool.lease().unwrap().root_get_by_id(root_id).unwrap().unwrap();
        assert!(root.last_scan > from_unix(0));
        assert_eq!(fx.pool.lease().unwrap().file_get_all().unwrap().len(), 1);
    }

    #[test]
    fn stop_finishes_current_walk_and_drops_queue() {
        let fx = fixture();
        let second_dir = fx.data.path().join("second");
        fs::create_dir(&second_dir).unwrap();
        fs::write(fx.data.path().join("a.txt"), "alpha").unwrap();
        let first = add_root(&fx);
        let second = fx
            .pool
            .lease()
            .unwrap()
            .root_add(&second_dir.to_string_lossy())
            .unwrap()
            .id;

        // hold every handle so the first walk blocks right after it starts
        let held: Vec<Store> = (0..fx.pool.capacity())
            .map(|_| fx.pool.get().unwrap())
            .collect();

        let w = Arc::new(walker(&fx, Duration::ZERO));
        w.schedule_scan(first).unwrap();
        w.schedule_scan(second).unwrap();
        let handle = w.start().unwrap();
        while w.state() != WalkerState::Scanning {
            thread::sleep(Duration::from_millis(5));
        }
        w.stop();
        for store in held {
            fx.pool.put(store);
        }

        w.wait_idle();
        handle.join().unwrap();
        assert_eq!(w.state(), WalkerState::Idle);

        let store = fx.pool.lease().unwrap();
        assert!(store.root_get_by_id(first).unwrap().unwrap().last_scan > from_unix(0));
        assert_eq!(
            store.root_get_by_id(second).unwrap().unwrap().last_scan,
            from_unix(0)
        );
        assert_eq!(store.file_get_by_root(first).unwrap().len(), 1);
    }

    #[test]
    fn custom_rule_applies_during_walk() {
        let fx = fixture();
        fs::write(fx.data.path().join("keep.txt"), "x").unwrap();
        fs::write(fx.data.path().join("drop.bak"), "x").unwrap();
        let root_id = add_root(&fx);
        let w = walker(&fx, Duration::ZERO);
        let record = fx.pool.lease().unwrap().blacklist_add("*.bak", true).unwrap();
        w.blacklist.add(Rule::from_record(&record).unwrap());

        let stats = w.walk(root_id).unwrap();
        assert_eq!(stats.files_added, 1);
        assert_eq!(stats.blacklisted, 1);
    }
}
