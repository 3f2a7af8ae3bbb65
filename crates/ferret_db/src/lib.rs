//! Persistence layer for the ferret file index.
//!
//! A single SQLite file holds roots, files, blacklist rules and extracted
//! metadata, plus an FTS5 index over metadata content that triggers keep in
//! step with the `meta` table.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ferret_db::{Pool, PoolConfig};
//!
//! let pool = Pool::open(PoolConfig::new("/tmp/ferret.sqlite3"))?;
//! let mut store = pool.lease()?;
//! let root = store.root_add("/home/user/Documents")?;
//! let hits = store.meta_search("invoice")?;
//! ```
//!
//! Transient "database is locked/busy" failures are retried transparently
//! (see [`retry`]); every other error reaches the caller.

mod error;
pub mod pool;
pub mod retry;
pub mod schema;
mod store;
mod types;

// Query implementations organized by table
mod blacklist;
mod file;
mod meta;
mod root;

pub use error::{DbError, Result};
pub use file::pattern_to_like;
pub use meta::escape_fts_query;
pub use pool::{Lease, Pool, PoolConfig, DEFAULT_POOL_SIZE};
pub use store::Store;
pub use types::*;
