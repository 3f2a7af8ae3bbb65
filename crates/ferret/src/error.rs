//! Error types for the indexing pipeline

use crate::blacklist::BlacklistError;
use ferret_db::{DbError, Id};
use std::io;
use thiserror::Error;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum FerretError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Blacklist error: {0}")]
    Blacklist(#[from] BlacklistError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Root not found: {0}")]
    RootNotFound(Id),

    #[error("Root directory does not exist: {0}")]
    RootMissing(String),

    #[error("Scan queue is full")]
    QueueFull,

    #[error("Already running")]
    AlreadyRunning,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FerretError>;
