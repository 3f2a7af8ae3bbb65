//! Retry-on-busy policy.
//!
//! SQLite reports lock contention between connections as `SQLITE_BUSY` or
//! `SQLITE_LOCKED`. Those errors are transient: the operation is repeated after
//! a fixed delay until it succeeds or fails with something else. There is no
//! upper bound on the number of attempts; [`wait_count`] exposes how often any
//! caller in the process had to wait.

use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Delay between two attempts of a transient failure.
pub const RETRY_DELAY: Duration = Duration::from_millis(25);

const RETRY_PATTERN: &str = r"(?i)database is (?:locked|busy)";

static RETRY_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(RETRY_PATTERN).ok());

static WAIT_COUNT: AtomicU64 = AtomicU64::new(0);

/// Number of times any operation in this process has waited for a retry.
pub fn wait_count() -> u64 {
    WAIT_COUNT.load(Ordering::Relaxed)
}

/// Classify an error as transient lock contention.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    if let rusqlite::Error::SqliteFailure(code, _) = err {
        if matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return true;
        }
    }
    RETRY_RE
        .as_ref()
        .map(|re| re.is_match(&err.to_string()))
        .unwrap_or(false)
}

fn wait_for_retry() {
    WAIT_COUNT.fetch_add(1, Ordering::Relaxed);
    thread::sleep(RETRY_DELAY);
}

/// Run `op` until it returns something other than a transient error.
pub fn retry<T, F>(mut op: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    loop {
        match op() {
            Err(err) if is_transient(&err) => {
                tracing::trace!(error = %err, "Database busy, retrying");
                wait_for_retry();
            }
            other => return other.map_err(Into::into),
        }
    }
}
