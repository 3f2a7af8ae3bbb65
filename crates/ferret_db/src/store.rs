//! A single handle on the index database.
//!
//! # Transactions
//!
//! A handle carries at most one explicit transaction. Mutating queries join
//! that transaction when one is open; otherwise each call runs in its own
//! ad-hoc transaction that commits on success and rolls back on any error, so
//! a caller never observes a partially applied write.
//!
//! # Savepoints
//!
//! Savepoints exist only inside an explicit transaction. Callers pick any
//! name; the handle maps it to a generated identifier (`Savepoint00001`, ...)
//! so names never reach SQL text. Releasing a savepoint releases every
//! savepoint created after it as well, rolling back to one discards the later
//! ones. The name map is cleared whenever the transaction ends.

use crate::error::{DbError, Result};
use crate::retry::retry;
use crate::schema::{INIT_QUERIES, MAINTENANCE_QUERIES, SEED_RULES};
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

static HANDLE_COUNT: AtomicU64 = AtomicU64::new(0);

const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA recursive_triggers = ON;
";

/// A connection to the index database plus its transaction state.
pub struct Store {
    conn: Connection,
    id: u64,
    path: PathBuf,
    in_tx: bool,
    sp_counter: u32,
    /// (caller name, generated name), oldest first
    savepoints: Vec<(String, String)>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("in_tx", &self.in_tx)
            .finish()
    }
}

impl Store {
    /// Open the database at `path`, creating and initializing it if the file
    /// does not exist yet.
    ///
    /// Initialization is all-or-nothing: if any schema statement fails the
    /// fresh file is removed and the error returned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists();
        let conn = retry(|| Connection::open(path))?;
        // Contention is handled by the retry policy, not SQLite's busy handler.
        conn.busy_timeout(Duration::ZERO)?;
        retry(|| conn.execute_batch(CONNECTION_PRAGMAS))?;

        let mut store = Self {
            conn,
            id: HANDLE_COUNT.fetch_add(1, Ordering::Relaxed) + 1,
            path: path.to_path_buf(),
            in_tx: false,
            sp_counter: 1,
            savepoints: Vec::new(),
        };

        if !exists {
            if let Err(err) = store.initialize() {
                error!(path = %path.display(), error = %err, "Failed to initialize database");
                drop(store);
                discard_database_files(path);
                return Err(err);
            }
            info!(path = %path.display(), "Database initialized");
        }

        debug!(handle = store.id, path = %path.display(), "Database opened");
        Ok(store)
    }

    fn initialize(&mut self) -> Result<()> {
        retry(|| self.conn.execute_batch("BEGIN IMMEDIATE"))?;

        let outcome = (|| -> Result<()> {
            for query in INIT_QUERIES {
                self.conn.execute_batch(query)?;
            }
            let mut stmt = self
                .conn
                .prepare("INSERT INTO blacklist (pattern, is_glob) VALUES (?1, ?2)")?;
            for (pattern, is_glob) in SEED_RULES {
                stmt.execute(params![pattern, is_glob])?;
            }
            Ok(())
        })();

        match outcome {
            Ok(()) => {
                retry(|| self.conn.execute_batch("COMMIT"))?;
                Ok(())
            }
            Err(err) => {
                if let Err(rb) = self.conn.execute_batch("ROLLBACK") {
                    error!(error = %rb, "Cannot roll back schema initialization");
                }
                Err(err)
            }
        }
    }

    /// Handle number, unique within the process (for log correlation).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the handle, rolling back a pending transaction first.
    pub fn close(mut self) -> Result<()> {
        if self.in_tx {
            warn!(handle = self.id, "Closing database with open transaction, rolling back");
            self.rollback()?;
        }
        self.conn.close().map_err(|(_, err)| err.into())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Is an explicit transaction open on this handle?
    pub fn in_transaction(&self) -> bool {
        self.in_tx
    }

    /// Begin an explicit transaction.
    pub fn begin(&mut self) -> Result<()> {
        if self.in_tx {
            return Err(DbError::TransactionInProgress);
        }
        debug!(handle = self.id, "Begin transaction");
        retry(|| self.conn.execute_batch("BEGIN IMMEDIATE"))?;
        self.in_tx = true;
        self.reset_savepoints();
        Ok(())
    }

    /// Commit the explicit transaction.
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_tx {
            return Err(DbError::NoTransactionInProgress);
        }
        debug!(handle = self.id, "Commit transaction");
        let result = retry(|| self.conn.execute_batch("COMMIT"));
        // A failed COMMIT may or may not leave the transaction open.
        self.in_tx = !self.conn.is_autocommit();
        if !self.in_tx {
            self.reset_savepoints();
        }
        result
    }

    /// Roll back the explicit transaction.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_tx {
            return Err(DbError::NoTransactionInProgress);
        }
        debug!(handle = self.id, "Roll back transaction");
        let result = if self.conn.is_autocommit() {
            Ok(())
        } else {
            retry(|| self.conn.execute_batch("ROLLBACK"))
        };
        self.in_tx = !self.conn.is_autocommit();
        if !self.in_tx {
            self.reset_savepoints();
        }
        result
    }

    /// Run `op` inside the open transaction, or inside an ad-hoc one.
    pub(crate) fn write<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        if self.in_tx {
            return op(&self.conn);
        }

        retry(|| self.conn.execute_batch("BEGIN IMMEDIATE"))?;
        match op(&self.conn) {
            Ok(value) => match retry(|| self.conn.execute_batch("COMMIT")) {
                Ok(()) => Ok(value),
                Err(err) => {
                    error!(handle = self.id, error = %err, "Failed to commit ad-hoc transaction");
                    self.abort_ad_hoc();
                    Err(err)
                }
            },
            Err(err) => {
                self.abort_ad_hoc();
                Err(err)
            }
        }
    }

    fn abort_ad_hoc(&self) {
        if self.conn.is_autocommit() {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            error!(handle = self.id, error = %err, "Rollback of ad-hoc transaction failed");
        }
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // Savepoints
    // ========================================================================

    fn reset_savepoints(&mut self) {
        self.sp_counter = 1;
        self.savepoints.clear();
    }

    fn savepoint_position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(user, _)| user == name)
            .ok_or_else(|| DbError::InvalidSavepoint(name.to_string()))
    }

    /// Create a savepoint called `name` in the running transaction.
    pub fn savepoint_create(&mut self, name: &str) -> Result<()> {
        if !self.in_tx {
            return Err(DbError::NoTransactionInProgress);
        }
        let sp_name = format!("Savepoint{:05}", self.sp_counter);
        debug!(handle = self.id, name, savepoint = %sp_name, "Create savepoint");
        let sql = format!("SAVEPOINT {}", sp_name);
        retry(|| self.conn.execute_batch(&sql))?;
        self.sp_counter += 1;
        self.savepoints.push((name.to_string(), sp_name));
        Ok(())
    }

    /// Release the savepoint `name` and every savepoint created after it.
    pub fn savepoint_release(&mut self, name: &str) -> Result<()> {
        if !self.in_tx {
            return Err(DbError::NoTransactionInProgress);
        }
        let pos = self.savepoint_position(name)?;
        let sql = format!("RELEASE SAVEPOINT {}", self.savepoints[pos].1);
        debug!(handle = self.id, name, "Release savepoint");
        retry(|| self.conn.execute_batch(&sql))?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    /// Undo everything done since the savepoint `name` was created.
    ///
    /// The savepoint itself stays valid; later ones are discarded.
    pub fn savepoint_rollback(&mut self, name: &str) -> Result<()> {
        if !self.in_tx {
            return Err(DbError::NoTransactionInProgress);
        }
        let pos = self.savepoint_position(name)?;
        let sql = format!("ROLLBACK TO SAVEPOINT {}", self.savepoints[pos].1);
        debug!(handle = self.id, name, "Roll back to savepoint");
        retry(|| self.conn.execute_batch(&sql))?;
        self.savepoints.truncate(pos + 1);
        Ok(())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Checkpoint the WAL, compact, reindex and refresh planner statistics.
    ///
    /// Refused while a transaction is open. A failing step is logged and the
    /// remaining steps still run.
    pub fn perform_maintenance(&mut self) -> Result<()> {
        if self.in_tx {
            return Err(DbError::TransactionInProgress);
        }
        for query in MAINTENANCE_QUERIES {
            match retry(|| self.conn.execute_batch(query)) {
                Ok(()) => debug!(handle = self.id, query, "Maintenance step done"),
                Err(err) => error!(handle = self.id, query, error = %err, "Maintenance step failed"),
            }
        }
        info!(path = %self.path.display(), "Database maintenance finished");
        Ok(())
    }
}

/// Remove a database file that failed to initialize, along with WAL side files.
fn discard_database_files(path: &Path) {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        targets.push(PathBuf::from(side));
    }
    for target in targets {
        if let Err(err) = fs::remove_file(&target) {
            if err.kind() != std::io::ErrorKind::NotFound {
                error!(path = %target.display(), error = %err, "Failed to remove database file");
            }
        }
    }
}
