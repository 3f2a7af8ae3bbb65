//! Configuration for the indexer

use crate::error::{FerretError, Result};
use crate::extractor::ExtractorConfig;
use crate::walker::WalkerConfig;
use ferret_db::{PoolConfig, DEFAULT_POOL_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration, read from TOML. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FerretConfig {
    /// Path to the SQLite database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Database handles kept open by the pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Minimum time between two scans of the same root
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Modifications closer than this to the recorded ctime are ignored
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,

    /// Capacity of the walker's scan queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of extractor worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Largest file the text probe will read, in bytes
    #[serde(default = "default_max_text_size")]
    pub max_text_size: u64,

    /// Apply `max_text_size` to every probe, not just plain text
    #[serde(default)]
    pub size_guard_all: bool,

    /// Timeout for external extraction tools
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Run OCR on images when tesseract is installed
    #[serde(default = "default_ocr")]
    pub ocr: bool,
}

fn default_database_path() -> PathBuf {
    ferret_logging::default_database_path()
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_scan_interval() -> u64 {
    3600
}

fn default_debounce() -> u64 {
    1
}

fn default_queue_capacity() -> usize {
    64
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

fn default_max_text_size() -> u64 {
    64 * 1024 * 1024
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_ocr() -> bool {
    true
}

impl Default for FerretConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            pool_size: default_pool_size(),
            scan_interval_secs: default_scan_interval(),
            debounce_secs: default_debounce(),
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            max_text_size: default_max_text_size(),
            size_guard_all: false,
            tool_timeout_secs: default_tool_timeout(),
            ocr: default_ocr(),
        }
    }
}

impl FerretConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| FerretError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| FerretError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(&self.database_path).with_capacity(self.pool_size)
    }

    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            scan_interval: Duration::from_secs(self.scan_interval_secs),
            debounce: Duration::from_secs(self.debounce_secs),
            queue_capacity: self.queue_capacity,
            ..WalkerConfig::default()
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            workers: self.workers.max(1),
            max_text_size: self.max_text_size,
            size_guard_all: self.size_guard_all,
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            ocr: self.ocr,
        }
    }
}
