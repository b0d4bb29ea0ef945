//! Scan outcome summary.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::Error;

/// A per-file problem that did not abort the scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanProblem {
    pub path: PathBuf,
    pub message: String,
}

impl ScanProblem {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build a problem from a per-file error, falling back to `path`.
    pub fn from_error(path: impl Into<PathBuf>, error: &Error) -> Self {
        match error {
            Error::Parse { path, message } | Error::Validation { path, message } => {
                Self::new(path.clone(), message.clone())
            }
            other => Self::new(path, other.to_string()),
        }
    }
}

/// Counts and problems of one completed scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub folders_scanned: usize,
    /// Entries created (whole files and sub-tracks)
    pub inserted: u64,
    /// Entries rewritten after a content change
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    /// Files skipped because they could not be decoded
    pub problems: Vec<ScanProblem>,
    /// Cue sheet issues
    pub warnings: Vec<ScanProblem>,
    pub elapsed_ms: u64,
    /// Index generation published after the commit
    pub index_generation: Option<u64>,
}

impl ScanReport {
    /// Total entries written by the scan.
    pub fn changed(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}
