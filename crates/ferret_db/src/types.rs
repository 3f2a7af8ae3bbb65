//! Records stored in the index database.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row identifier.
pub type Id = i64;

/// A directory tree registered for scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub id: Id,
    /// Filesystem path, unique across roots
    pub path: String,
    /// Completion time of the last walk (epoch if never scanned)
    pub last_scan: DateTime<Utc>,
}

/// A regular file found below a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: Id,
    pub root_id: Id,
    /// Absolute path, unique per root
    pub path: String,
    /// Detected content type, e.g. `text/plain`
    pub content_type: String,
    /// Modification time recorded at the last (debounced) update
    pub ctime: DateTime<Utc>,
    /// When the walker last wrote this row
    pub last_refresh: DateTime<Utc>,
}

/// Extracted, searchable representation of one file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileMeta {
    /// Zero until the record has been stored
    pub id: Id,
    pub file_id: Id,
    /// Extraction time; stale once the file's ctime moves past it
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// Auxiliary attributes (GPS position, audio tags, ...)
    pub meta: BTreeMap<String, String>,
}

impl FileMeta {
    /// Start an empty record for `file_id`, stamped with the current time.
    pub fn new(file_id: Id) -> Self {
        Self {
            id: 0,
            file_id,
            timestamp: now(),
            content: String::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Persisted form of a blacklist rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistRecord {
    pub id: Id,
    pub pattern: String,
    pub is_glob: bool,
    pub hits: u64,
}

/// Current time, truncated to the whole seconds the database stores.
pub fn now() -> DateTime<Utc> {
    from_unix(Utc::now().timestamp())
}

/// Convert stored Unix seconds to a timestamp; out-of-range values map to the epoch.
pub fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}
