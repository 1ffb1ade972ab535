//! Error types for the sync pipeline.
//!
//! - [`CommandError`]: an external program (`rclone`, `ffmpeg`, `ffprobe`) failed.
//! - [`StoreError`] / [`HandlerError`]: failures behind the [`crate::contract`] traits.
//! - [`SyncError`]: fatal errors that abort a run. Per-item failures never
//!   surface as `SyncError`; they are collected in the [`crate::report::SyncReport`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
}

impl CommandError {
    pub fn code(&self) -> Option<i32> {
        match self {
            CommandError::Failed { code, .. } => *code,
            _ => None,
        }
    }

    pub fn stderr(&self) -> &str {
        match self {
            CommandError::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// The listed location does not exist yet. Not a failure for inventories.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("malformed listing: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("unreadable probe output: {0}")]
    Probe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Destination inventory failed for {store}: {source}")]
    Inventory {
        store: String,
        #[source]
        source: StoreError,
    },

    #[error("Source listing failed for {store}: {source}")]
    SourceListing {
        store: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to write {what} to {path}: {source}")]
    Write {
        what: &'static str,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
