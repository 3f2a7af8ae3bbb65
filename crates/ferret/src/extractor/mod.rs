//! Metadata extraction worker pool.
//!
//! A run picks up every file without metadata and every file whose metadata
//! is older than its change time, and hands them to a fixed set of scoped
//! worker threads over a rendezvous channel. Each worker looks up a probe by
//! content type, runs it and upserts the result. Per-file failures are logged
//! and counted; they never stop the run.

mod probes;
mod tools;

pub use probes::{builtin as builtin_probes, Probe, ProbeEnv};
pub use tools::{run_tool, Tools};

use crate::error::Result;
use ferret_db::{DbError, File, Pool};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Errors for a single file; logged and counted, never fatal to a run.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{} is {size} bytes, over the {limit} byte limit", path.display())]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{tool} did not finish within {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Audio tag error: {0}")]
    Audio(#[from] lofty::error::LoftyError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

/// Configuration for extraction runs
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Worker threads per run
    pub workers: usize,
    /// Size limit for the text probe, in bytes
    pub max_text_size: u64,
    /// Apply `max_text_size` before every probe
    pub size_guard_all: bool,
    /// Timeout for one external tool invocation
    pub tool_timeout: Duration,
    /// OCR images when tesseract is available
    pub ocr: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1),
            max_text_size: 64 * 1024 * 1024,
            size_guard_all: false,
            tool_timeout: Duration::from_secs(30),
            ocr: true,
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub queued: u64,
    pub extracted: u64,
    pub no_probe: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    extracted: AtomicU64,
    no_probe: AtomicU64,
    failed: AtomicU64,
}

pub struct Extractor {
    pool: Arc<Pool>,
    config: ExtractorConfig,
    env: ProbeEnv,
    probes: HashMap<&'static str, Probe>,
    active: AtomicBool,
}

impl Extractor {
    /// Create an extractor, looking up external tools on `PATH`.
    pub fn new(pool: Arc<Pool>, config: ExtractorConfig) -> Self {
        Self::with_tools(pool, config, Tools::locate())
    }

    pub fn with_tools(pool: Arc<Pool>, config: ExtractorConfig, tools: Tools) -> Self {
        let env = ProbeEnv::new(&config, tools);
        Self {
            pool,
            config,
            env,
            probes: probes::builtin(),
            active: AtomicBool::new(false),
        }
    }

    /// Add or replace the probe for a content type (`major/minor` or `major/*`).
    pub fn register(&mut self, content_type: &'static str, probe: Probe) {
        self.probes.insert(content_type, probe);
    }

    /// Probe for `content_type`: exact match first, then its `major/*` family.
    pub fn probe_for(&self, content_type: &str) -> Option<Probe> {
        if let Some(probe) = self.probes.get(content_type) {
            return Some(*probe);
        }
        let major = content_type.split('/').next()?;
        self.probes.get(format!("{major}/*").as_str()).copied()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop feeding work; queued files are drained without processing.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("Extraction stopping");
        }
    }

    /// Extract every file lacking current metadata.
    ///
    /// Callers must not overlap runs on one extractor; check
    /// [`Extractor::is_active`] first.
    pub fn run(&self) -> Result<ExtractStats> {
        self.active.store(true, Ordering::SeqCst);
        let result = self.run_inner();
        self.active.store(false, Ordering::SeqCst);
        result
    }

    fn run_inner(&self) -> Result<ExtractStats> {
        let (missing, outdated) = {
            let store = self.pool.lease()?;
            (store.file_get_no_meta()?, store.meta_get_outdated()?)
        };
        let workers = self.config.workers.max(1);
        info!(
            missing = missing.len(),
            outdated = outdated.len(),
            workers,
            "Extraction started"
        );

        let counters = Counters::default();
        let mut queued = 0u64;
        let (tx, rx) = crossbeam_channel::bounded::<File>(0);

        thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let counters = &counters;
                scope.spawn(move || {
                    for file in rx.iter() {
                        if !self.is_active() {
                            continue;
                        }
                        self.process(&file, counters);
                    }
                });
            }
            drop(rx);

            for file in missing.into_iter().chain(outdated) {
                if !self.is_active() {
                    break;
                }
                if tx.send(file).is_err() {
                    break;
                }
                queued += 1;
            }
            drop(tx);
        });

        let stats = ExtractStats {
            queued,
            extracted: counters.extracted.into_inner(),
            no_probe: counters.no_probe.into_inner(),
            failed: counters.failed.into_inner(),
        };
        info!(
            queued = stats.queued,
            extracted = stats.extracted,
            no_probe = stats.no_probe,
            failed = stats.failed,
            "Extraction finished"
        );
        Ok(stats)
    }

    fn process(&self, file: &File, counters: &Counters) {
        let Some(probe) = self.probe_for(&file.content_type) else {
            trace!(file = %file.path, content_type = %file.content_type, "No probe");
            counters.no_probe.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match self.extract(probe, file) {
            Ok(()) => {
                counters.extracted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(file = %file.path, content_type = %file.content_type, error = %err, "Extraction failed");
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn extract(&self, probe: Probe, file: &File) -> std::result::Result<(), ExtractError> {
        if self.config.size_guard_all {
            self.env.check_size(Path::new(&file.path))?;
        }
        let mut meta = probe(&self.env, file)?;
        meta.file_id = file.id;
        // the ctime this content was read against; any later walker refresh
        // lands strictly after it, even within the same second
        meta.timestamp = file.ctime;

        let mut store = self.pool.lease()?;
        store.meta_upsert(&mut meta)?;
        debug!(file = %file.path, meta = meta.id, "Metadata extracted");
        Ok(())
    }
}
