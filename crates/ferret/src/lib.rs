//! Local file indexer.
//!
//! Ferret walks registered root directories, records every regular file that
//! survives the blacklist, extracts searchable text and attributes through
//! content-type probes, and serves full-text queries over the result.
//!
//! # Architecture
//!
//! ```text
//! Walker ──► ferret_db (roots, files, blacklist) ◄── prune
//!   │                      ▲
//! Blacklist          Extractor ──► probes ──► external tools
//! ```
//!
//! All components share one [`ferret_db::Pool`] and lease a handle per
//! logical operation.

pub mod blacklist;
pub mod config;
pub mod content_type;
pub mod error;
pub mod extractor;
pub mod prune;
pub mod walker;

pub use blacklist::{Blacklist, BlacklistError, Rule};
pub use config::FerretConfig;
pub use error::{FerretError, Result};
pub use extractor::{ExtractError, ExtractStats, Extractor, ExtractorConfig};
pub use prune::{prune_missing, PruneStats};
pub use walker::{WalkIssue, WalkStats, Walker, WalkerConfig, WalkerState};
