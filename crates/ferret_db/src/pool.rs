//! A bounded pool of [`Store`] handles.
//!
//! The pool opens a fixed number of handles up front. [`Pool::get`] blocks on
//! a condition variable while all of them are checked out;
//! [`Pool::get_no_wait`] opens an extra handle instead of waiting. Handles come
//! back through [`Pool::put`], which rolls back any transaction left open so
//! an in-flight transaction is never shared.
//!
//! Most callers should use [`Pool::lease`], which returns the handle when the
//! guard is dropped.

use crate::error::{DbError, Result};
use crate::store::Store;
use once_cell::sync::OnceCell;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Handles opened by a pool unless configured otherwise.
pub const DEFAULT_POOL_SIZE: usize = 3;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Database file shared by all handles
    pub path: PathBuf,
    /// Number of handles opened up front
    pub capacity: usize,
}

impl PoolConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capacity: DEFAULT_POOL_SIZE,
        }
    }

    /// Set the number of pooled handles (at least one is always opened).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

struct PoolState {
    free: Vec<Store>,
    closed: bool,
}

/// A bounded set of database handles shared between threads.
pub struct Pool {
    path: PathBuf,
    capacity: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Pool {
    /// Open `config.capacity` handles on `config.path`.
    pub fn open(config: PoolConfig) -> Result<Self> {
        let capacity = config.capacity.max(1);
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(Store::open(&config.path)?);
        }
        info!(path = %config.path.display(), capacity, "Database pool opened");
        Ok(Self {
            path: config.path,
            capacity,
            state: Mutex::new(PoolState {
                free,
                closed: false,
            }),
            available: Condvar::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a handle, waiting until one is returned if the pool is empty.
    pub fn get(&self) -> Result<Store> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(DbError::PoolClosed);
            }
            if let Some(store) = state.free.pop() {
                return Ok(store);
            }
            debug!(path = %self.path.display(), "Pool exhausted, waiting for a handle");
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take a handle, opening a new one instead of waiting if the pool is empty.
    pub fn get_no_wait(&self) -> Result<Store> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(DbError::PoolClosed);
            }
            if let Some(store) = state.free.pop() {
                return Ok(store);
            }
        }
        debug!(path = %self.path.display(), "Pool exhausted, opening extra handle");
        Store::open(&self.path)
    }

    /// Return a handle and wake one waiter.
    ///
    /// An open transaction is rolled back first; a handle that cannot be
    /// rolled back is closed and a fresh one takes its place.
    pub fn put(&self, mut store: Store) {
        if store.in_transaction() {
            warn!(handle = store.id(), "Handle returned with open transaction, rolling back");
            if let Err(err) = store.rollback() {
                error!(handle = store.id(), error = %err, "Rollback failed, replacing handle");
                self.replace(store);
                return;
            }
        }

        let mut state = self.lock();
        if state.closed {
            drop(state);
            close_store(store);
            return;
        }
        state.free.push(store);
        drop(state);
        self.available.notify_one();
    }

    fn replace(&self, store: Store) {
        close_store(store);
        if self.lock().closed {
            return;
        }
        match Store::open(&self.path) {
            Ok(fresh) => self.put(fresh),
            Err(err) => {
                error!(path = %self.path.display(), error = %err, "Cannot reopen database handle")
            }
        }
    }

    /// Close every pooled handle. Handles currently checked out stay open;
    /// returning them afterwards closes them.
    pub fn close(&self) {
        let handles = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.free)
        };
        let count = handles.len();
        for store in handles {
            close_store(store);
        }
        self.available.notify_all();
        info!(path = %self.path.display(), closed = count, "Database pool closed");
    }

    /// Are all handles checked out?
    pub fn is_empty(&self) -> bool {
        self.lock().free.is_empty()
    }

    /// Number of handles ready to be taken.
    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    /// Take a handle (blocking) that goes back to the pool when dropped.
    pub fn lease(&self) -> Result<Lease<'_>> {
        Ok(Lease {
            pool: self,
            store: Some(self.get()?),
        })
    }

    /// Like [`Pool::lease`], but opens an extra handle instead of waiting.
    pub fn lease_no_wait(&self) -> Result<Lease<'_>> {
        Ok(Lease {
            pool: self,
            store: Some(self.get_no_wait()?),
        })
    }
}

fn close_store(store: Store) {
    let id = store.id();
    if let Err(err) = store.close() {
        error!(handle = id, error = %err, "Failed to close database handle");
    }
}

/// A handle borrowed from a [`Pool`].
pub struct Lease<'a> {
    pool: &'a Pool,
    store: Option<Store>,
}

impl Deref for Lease<'_> {
    type Target = Store;

    // The handle is only taken out in `drop`.
    fn deref(&self) -> &Store {
        self.store.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut Store {
        self.store.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            self.pool.put(store);
        }
    }
}

static SHARED: OnceCell<Arc<Pool>> = OnceCell::new();

/// The process-wide pool, opened from `config` on first use.
///
/// Later calls return the same pool and ignore their argument.
pub fn shared(config: &PoolConfig) -> Result<Arc<Pool>> {
    SHARED
        .get_or_try_init(|| Pool::open(config.clone()).map(Arc::new))
        .map(Arc::clone)
}
