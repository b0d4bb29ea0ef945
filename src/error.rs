//! Library-wide error types.
//!
//! Library modules return [`Result`] with the [`Error`] enum defined here,
//! while the CLI uses `anyhow` for convenient error propagation.
//!
//! # Scan error taxonomy
//!
//! - [`Error::Parse`]: one file could not be decoded. Recorded in the scan
//!   report, the file is skipped and the scan continues.
//! - [`Error::Validation`]: a cue sheet is inconsistent. The cue is used
//!   best-effort (or dropped when structurally broken).
//! - [`Error::Database`] / [`Error::Migration`]: persistence failure. Fatal to
//!   the running scan, the pending transaction is rolled back.
//! - [`Error::ScanInProgress`]: a scan was requested while another one owns
//!   the scan token. Rejected immediately.
//! - [`Error::IndexBuild`]: the new index generation could not be built. The
//!   previous generation stays published.
//!
//! # Example
//!
//! ```ignore
//! use music_catalog::error::{Error, Result};
//!
//! fn open(path: &Path) -> Result<()> {
//!     let meta = std::fs::metadata(path)?; // IO errors auto-convert
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level library error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A single file could not be decoded
    #[error("Parse error for {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A cue sheet has inconsistent offsets or references
    #[error("Validation error for {path}: {message}")]
    Validation { path: PathBuf, message: String },

    /// A scan is already running
    #[error("A scan is already running")]
    ScanInProgress,

    /// The scan was cancelled before it committed
    #[error("Scan cancelled")]
    ScanCancelled,

    /// Building the search index failed
    #[error("Index build error: {0}")]
    IndexBuild(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an index build error.
    pub fn index_build(message: impl Into<String>) -> Self {
        Self::IndexBuild(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error aborts a running scan.
    ///
    /// Parse and validation errors are per-file and only end up in the scan
    /// report; everything else ends the scan without committing.
    pub fn is_scan_fatal(&self) -> bool {
        match self {
            Error::Parse { .. } | Error::Validation { .. } => false,
            Error::WithContext { source, .. } => source.is_scan_fatal(),
            _ => true,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}
