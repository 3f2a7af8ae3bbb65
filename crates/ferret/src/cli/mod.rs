//! Command handlers for the `ferret` binary.

pub mod output;

use anyhow::{bail, Context, Result};
use ferret::{prune_missing, Blacklist, Extractor, FerretConfig, FerretError, Rule, Walker};
use ferret_db::{escape_fts_query, Id, Pool};
use output::{format_timestamp, print_table, truncate};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Shared state for one command invocation.
pub struct App {
    pub config: FerretConfig,
    pub pool: Arc<Pool>,
}

impl App {
    pub fn open(config: FerretConfig) -> Result<Self> {
        let pool = ferret_db::pool::shared(&config.pool_config()).with_context(|| {
            format!(
                "Failed to open database at {}",
                config.database_path.display()
            )
        })?;
        Ok(Self { config, pool })
    }

    fn blacklist(&self) -> Result<Arc<Blacklist>> {
        let records = self.pool.lease()?.blacklist_get_all()?;
        let blacklist = Blacklist::from_records(&records).context("Stored blacklist is invalid")?;
        Ok(Arc::new(blacklist))
    }
}

pub fn add_root(ctx: &App, path: &Path) -> Result<()> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", path.display()))?;
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    let Some(path) = path.to_str() else {
        bail!("{} is not valid UTF-8", path.display());
    };

    let mut store = ctx.pool.lease()?;
    if let Some(existing) = store.root_get_by_path(path)? {
        println!("Root {} already registered as #{}", path, existing.id);
        return Ok(());
    }
    let root = store.root_add(path)?;
    println!("Added root #{}: {}", root.id, root.path);
    Ok(())
}

pub fn scan(ctx: &App, ids: &[Id]) -> Result<()> {
    let ids: Vec<Id> = {
        let store = ctx.pool.lease()?;
        if ids.is_empty() {
            store.root_get_all()?.into_iter().map(|r| r.id).collect()
        } else {
            for id in ids {
                if store.root_get_by_id(*id)?.is_none() {
                    bail!("No root with id {}", id);
                }
            }
            ids.to_vec()
        }
    };
    if ids.is_empty() {
        println!("No roots registered. Add one with `ferret add-root <path>`.");
        return Ok(());
    }

    let walker = Arc::new(Walker::new(
        Arc::clone(&ctx.pool),
        ctx.blacklist()?,
        ctx.config.walker_config(),
    ));
    let handle = walker.start()?;
    for id in &ids {
        loop {
            match walker.schedule_scan(*id) {
                Ok(()) => break,
                Err(FerretError::QueueFull) => walker.wait_idle(),
                Err(err) => return Err(err.into()),
            }
        }
    }
    walker.wait_idle();
    walker.stop();
    if handle.join().is_err() {
        bail!("Walker thread panicked");
    }

    info!(roots = ids.len(), "Scan complete");
    roots(ctx)
}

pub fn extract(ctx: &App) -> Result<()> {
    let extractor = Extractor::new(Arc::clone(&ctx.pool), ctx.config.extractor_config());
    if extractor.is_active() {
        bail!("Extraction already running");
    }
    let stats = extractor.run()?;
    println!(
        "Queued {}, extracted {}, no probe {}, failed {}",
        stats.queued, stats.extracted, stats.no_probe, stats.failed
    );
    Ok(())
}

pub fn search(ctx: &App, query: &str, raw: bool) -> Result<()> {
    let query = if raw {
        query.to_string()
    } else {
        escape_fts_query(query)
    };
    let files = ctx
        .pool
        .lease()?
        .meta_search(&query)
        .with_context(|| format!("Search for '{}' failed", query))?;

    if files.is_empty() {
        println!("No matches.");
        return Ok(());
    }
    let rows = files
        .into_iter()
        .map(|f| vec![f.id.to_string(), f.path, f.content_type])
        .collect();
    print_table(&["ID", "PATH", "TYPE"], rows);
    Ok(())
}

pub fn prune(ctx: &App) -> Result<()> {
    let stats = prune_missing(&ctx.pool)?;
    println!("Checked {} files, removed {}", stats.checked, stats.removed);
    Ok(())
}

pub fn roots(ctx: &App) -> Result<()> {
    let store = ctx.pool.lease()?;
    let mut rows = Vec::new();
    for root in store.root_get_all()? {
        let files = store.file_get_by_root(root.id)?.len();
        rows.push(vec![
            root.id.to_string(),
            root.path,
            format_timestamp(root.last_scan),
            files.to_string(),
        ]);
    }
    if rows.is_empty() {
        println!("No roots registered.");
        return Ok(());
    }
    print_table(&["ID", "PATH", "LAST SCAN", "FILES"], rows);
    Ok(())
}

pub fn files(ctx: &App, pattern: Option<&str>) -> Result<()> {
    let store = ctx.pool.lease()?;
    let files = match pattern {
        Some(pattern) => store.file_get_by_pattern(pattern)?,
        None => store.file_get_all()?,
    };
    let rows = files
        .into_iter()
        .map(|f| {
            vec![
                f.id.to_string(),
                f.root_id.to_string(),
                f.path,
                f.content_type,
                format_timestamp(f.ctime),
            ]
        })
        .collect();
    print_table(&["ID", "ROOT", "PATH", "TYPE", "CHANGED"], rows);
    Ok(())
}

pub fn rules(ctx: &App) -> Result<()> {
    let rows = ctx
        .pool
        .lease()?
        .blacklist_get_all()?
        .into_iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                if r.is_glob { "glob" } else { "regex" }.to_string(),
                truncate(&r.pattern, 60),
                r.hits.to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "KIND", "PATTERN", "HITS"], rows);
    Ok(())
}

pub fn add_rule(ctx: &App, pattern: &str, regex: bool) -> Result<()> {
    // reject patterns the walker could not compile before they are stored
    if regex {
        Rule::regex(0, pattern, 0)?;
    } else {
        Rule::glob(0, pattern, 0)?;
    }
    let record = ctx.pool.lease()?.blacklist_add(pattern, !regex)?;
    println!("Added rule #{}: {}", record.id, record.pattern);
    Ok(())
}

pub fn maintenance(ctx: &App) -> Result<()> {
    ctx.pool.lease()?.perform_maintenance()?;
    println!("Maintenance complete");
    Ok(())
}
