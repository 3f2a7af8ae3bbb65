//! Ferret command line
//!
//! Register roots, walk them, extract metadata and search the index.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ferret::FerretConfig;
use ferret_db::Id;
use ferret_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "ferret", version, about = "Index and search local files")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "FERRET_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration
    #[arg(long, global = true, env = "FERRET_DB")]
    db: Option<PathBuf>,

    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a directory to index
    AddRoot {
        path: PathBuf,
    },

    /// Walk roots and record their files (all roots if none given)
    Scan {
        ids: Vec<Id>,
    },

    /// Extract metadata for new and changed files
    Extract,

    /// Full-text search over extracted content
    Search {
        query: String,

        /// Pass the query to FTS5 unescaped (operators, prefixes, NEAR)
        #[arg(long)]
        raw: bool,
    },

    /// Forget files that no longer exist
    Prune,

    /// List roots
    Roots,

    /// List indexed files
    Files {
        /// `*` and `?` wildcards; substring match otherwise
        #[arg(long)]
        pattern: Option<String>,
    },

    /// List blacklist rules, most frequently hit first
    Rules,

    /// Add a blacklist rule (glob unless --regex)
    AddRule {
        pattern: String,

        #[arg(long)]
        regex: bool,
    },

    /// Checkpoint, vacuum, reindex and analyze the database
    Maintenance,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "ferret",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: {:#}", err);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = FerretConfig::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    let ctx = cli::App::open(config)?;

    match cli.command {
        Commands::AddRoot { path } => cli::add_root(&ctx, &path),
        Commands::Scan { ids } => cli::scan(&ctx, &ids),
        Commands::Extract => cli::extract(&ctx),
        Commands::Search { query, raw } => cli::search(&ctx, &query, raw),
        Commands::Prune => cli::prune(&ctx),
        Commands::Roots => cli::roots(&ctx),
        Commands::Files { pattern } => cli::files(&ctx, pattern.as_deref()),
        Commands::Rules => cli::rules(&ctx),
        Commands::AddRule { pattern, regex } => cli::add_rule(&ctx, &pattern, regex),
        Commands::Maintenance => cli::maintenance(&ctx),
    }
}
