//! Scan coordination.
//!
//! [`MediaScanner`] owns the scan state machine. One scan walks every
//! enabled folder, diffs what it finds against the catalog inside a single
//! [`CatalogTransaction`], commits, and then asks the [`SearchEngine`] for a
//! new index generation.
//!
//! ```text
//! Idle ─► Running ─► Committing ─► Idle
//!            │            │
//!            └──► Failed ◄┘──► Idle
//! ```
//!
//! Only one scan runs at a time: the [`ScanToken`] is taken before anything
//! is touched and a second request fails with [`Error::ScanInProgress`].

pub mod hash;
pub mod report;
pub mod state;

pub use report::{ScanProblem, ScanReport};
pub use state::{CancelFlag, ScanGate, ScanState, ScanStatus, ScanToken};

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{CatalogStore, CatalogTransaction, ExistingEntry};
use crate::error::{Error, Result};
use crate::metadata::{AudioCandidate, CueCandidate, TagExtractor, cue};
use crate::model::{MusicFolder, WHOLE_FILE};
use crate::scanner::{self, WalkedDirectory};
use crate::search::SearchEngine;

/// Runs scans of the configured folders.
pub struct MediaScanner {
    store: Arc<dyn CatalogStore>,
    search: Arc<SearchEngine>,
    folders: Vec<MusicFolder>,
    extractor: TagExtractor,
    gate: ScanGate,
    status: watch::Sender<ScanStatus>,
    transitions: broadcast::Sender<ScanState>,
}

/// A scan running in the background.
pub struct ScanHandle {
    cancel: CancelFlag,
    task: JoinHandle<Result<ScanReport>>,
}

impl ScanHandle {
    /// Ask the scan to stop. Nothing it did is committed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Wait for the scan to finish.
    pub async fn wait(self) -> Result<ScanReport> {
        self.task
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

impl MediaScanner {
    pub fn new(store: Arc<dyn CatalogStore>, search: Arc<SearchEngine>, config: &Config) -> Self {
        Self::with_folders(
            store,
            search,
            config.music_folders(),
            TagExtractor::new(config.library.enable_cue_indexing),
        )
    }

    pub fn with_folders(
        store: Arc<dyn CatalogStore>,
        search: Arc<SearchEngine>,
        folders: Vec<MusicFolder>,
        extractor: TagExtractor,
    ) -> Self {
        let (status, _) = watch::channel(ScanStatus::default());
        let (transitions, _) = broadcast::channel(16);
        Self {
            store,
            search,
            folders,
            extractor,
            gate: ScanGate::default(),
            status,
            transitions,
        }
    }

    pub fn folders(&self) -> &[MusicFolder] {
        &self.folders
    }

    pub fn status(&self) -> ScanStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanStatus> {
        self.status.subscribe()
    }

    /// Every state the scanner enters from now on, in order.
    ///
    /// Unlike [`subscribe`](Self::subscribe), short-lived states such as
    /// `Failed` are never coalesced away.
    pub fn state_changes(&self) -> broadcast::Receiver<ScanState> {
        self.transitions.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        self.gate.is_held()
    }

    /// True until one scan has ever committed.
    pub async fn never_scanned(&self) -> Result<bool> {
        self.store.never_scanned().await
    }

    /// Take the scan token without scanning.
    pub fn try_acquire(&self) -> Result<ScanToken> {
        self.gate.try_acquire()
    }

    /// Rebuild the search index from the committed catalog.
    pub async fn rebuild_index(&self) -> Result<u64> {
        self.search.rebuild(self.store.as_ref()).await
    }

    /// Run a scan on the current task.
    pub async fn scan(&self) -> Result<ScanReport> {
        let token = self.try_acquire()?;
        self.scan_with(token, &CancelFlag::new()).await
    }

    /// Start a scan in the background and return at once.
    ///
    /// Fails immediately with [`Error::ScanInProgress`] when a scan is
    /// already running.
    pub fn start_scan(self: &Arc<Self>) -> Result<ScanHandle> {
        let token = self.try_acquire()?;
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let scanner = Arc::clone(self);
        let task = tokio::spawn(async move { scanner.scan_with(token, &flag).await });
        Ok(ScanHandle { cancel, task })
    }

    /// Run a scan with an already acquired token.
    ///
    /// The token is held until the scanner is back to `Idle`.
    pub async fn scan_with(&self, token: ScanToken, cancel: &CancelFlag) -> Result<ScanReport> {
        let started = Instant::now();
        self.status.send_modify(|status| {
            status.files_seen = 0;
            status.current_folder = None;
            status.last_error = None;
        });
        self.set_state(ScanState::Running);
        info!(target: "scanner::scan", folders = self.folders.len(), "Scan started");

        let result = match self.run(cancel).await {
            Ok(mut report) => {
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                self.set_state(ScanState::Idle);
                info!(
                    target: "scanner::scan",
                    inserted = report.inserted,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    deleted = report.deleted,
                    changed = report.changed(),
                    problems = report.problems.len(),
                    elapsed_ms = report.elapsed_ms,
                    "Scan finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        };
        drop(token);
        result
    }

    async fn run(&self, cancel: &CancelFlag) -> Result<ScanReport> {
        // An empty list would prune every stored folder
        if self.folders.is_empty() {
            return Err(Error::config("no music folders configured"));
        }

        let mut report = ScanReport::default();
        let mut tx = self.store.begin().await?;
        let mut scanned = Vec::new();

        for folder in &self.folders {
            tx.sync_folder(folder).await?;
            if !folder.enabled {
                debug!(target: "scanner::scan", folder = %folder.path.display(), "Folder disabled, keeping entries");
                continue;
            }
            if !folder.path.is_dir() {
                warn!(target: "scanner::scan", folder = %folder.path.display(), "Folder root missing, keeping entries");
                report
                    .problems
                    .push(ScanProblem::new(&folder.path, "folder root is missing or not a directory"));
                continue;
            }

            self.status
                .send_modify(|status| status.current_folder = Some(folder.path_key()));
            tx.clear_present(folder.id).await?;
            self.walk_folder(tx.as_mut(), folder, cancel, &mut report).await?;

            let deleted = tx.delete_paths_not_in(folder.id).await?;
            debug!(target: "scanner::scan", folder = %folder.path.display(), deleted, "Folder reconciled");
            report.deleted += deleted;
            report.folders_scanned += 1;
            scanned.push(folder.id);
        }

        let configured: Vec<i64> = self.folders.iter().map(|f| f.id).collect();
        let removed = tx.delete_folders_not_in(&configured).await?;
        if removed > 0 {
            info!(target: "scanner::scan", removed, "Dropped folders no longer configured");
        }
        tx.refresh_aggregates().await?;

        if cancel.is_cancelled() {
            return Err(Error::ScanCancelled);
        }
        self.set_state(ScanState::Committing);
        tx.commit(Utc::now(), &scanned).await?;

        let generation = self.search.rebuild(self.store.as_ref()).await?;
        report.index_generation = Some(generation);
        Ok(report)
    }

    async fn walk_folder(
        &self,
        tx: &mut dyn CatalogTransaction,
        folder: &MusicFolder,
        cancel: &CancelFlag,
        report: &mut ScanReport,
    ) -> Result<()> {
        let mut batches = std::pin::pin!(scanner::scan(folder.path.clone()));

        while let Some(dir) = batches.next().await {
            if cancel.is_cancelled() {
                return Err(Error::ScanCancelled);
            }
            let (dir, cues) = self.associate_cues(dir).await?;

            for audio in &dir.audio_files {
                if cancel.is_cancelled() {
                    return Err(Error::ScanCancelled);
                }
                self.status.send_modify(|status| status.files_seen += 1);
                let cue = cues.get(audio).map(|cue| CueCandidate {
                    path: cue.clone(),
                    relative_path: scanner::relative_path(&folder.path, cue),
                });
                self.process_file(tx, folder, &dir, audio, cue, report).await?;
            }
        }
        Ok(())
    }

    /// Pair the directory's audio files with its cue sheets.
    async fn associate_cues(
        &self,
        dir: WalkedDirectory,
    ) -> Result<(WalkedDirectory, HashMap<PathBuf, PathBuf>)> {
        if !self.extractor.cue_indexing() || dir.cue_sheets.is_empty() {
            return Ok((dir, HashMap::new()));
        }
        tokio::task::spawn_blocking(move || {
            let cues = cue::associate(&dir.audio_files, &dir.cue_sheets);
            (dir, cues)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    /// Diff one audio file against its stored entries.
    async fn process_file(
        &self,
        tx: &mut dyn CatalogTransaction,
        folder: &MusicFolder,
        dir: &WalkedDirectory,
        path: &Path,
        cue: Option<CueCandidate>,
        report: &mut ScanReport,
    ) -> Result<()> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(target: "scanner::scan", path = %path.display(), error = %e, "Cannot stat file");
                report.problems.push(ScanProblem::new(path, e.to_string()));
                return Ok(());
            }
        };
        let cue_mtime = cue
            .as_ref()
            .and_then(|cue| std::fs::metadata(&cue.path).ok())
            .map(|meta| unix_mtime(&meta))
            .unwrap_or(0);
        let last_modified = unix_mtime(&meta).max(cue_mtime);

        let relative_path = scanner::relative_path(&folder.path, path);
        let existing = tx.find_entries(folder.id, &relative_path).await?;
        let ids: Vec<i64> = existing.iter().map(|e| e.id).collect();
        let whole = existing.iter().find(|e| e.start_position == WHOLE_FILE);
        let expected_index = cue.as_ref().map(|c| c.relative_path.clone());

        if let Some(whole) = whole
            && whole.last_modified == last_modified
            && whole.index_path == expected_index
        {
            tx.mark_present(&ids).await?;
            report.unchanged += ids.len() as u64;
            return Ok(());
        }

        let content_hash = {
            let audio = path.to_path_buf();
            let cue_path = cue.as_ref().map(|c| c.path.clone());
            tokio::task::spawn_blocking(move || hash::compute_content_hash(&audio, cue_path.as_deref()))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?
        };
        let content_hash = match content_hash {
            Ok(hash) => hash,
            Err(e) => {
                warn!(target: "scanner::scan", path = %path.display(), error = %e, "Cannot read file");
                report.problems.push(ScanProblem::new(path, e.to_string()));
                tx.mark_present(&ids).await?;
                return Ok(());
            }
        };

        if let Some(whole) = whole
            && whole.content_hash.as_deref() == Some(content_hash.as_str())
        {
            tx.touch(&ids, last_modified).await?;
            report.unchanged += ids.len() as u64;
            return Ok(());
        }

        let candidate = AudioCandidate {
            folder_id: folder.id,
            media_type: folder.folder_type.media_type(),
            path: path.to_path_buf(),
            relative_path,
            parent_path: dir.relative_path.clone(),
            cue,
            file_size: meta.len() as i64,
            last_modified,
            content_hash: Some(content_hash),
        };
        let extractor = self.extractor;
        let (candidate, extracted) = tokio::task::spawn_blocking(move || {
            let extracted = extractor.extract(&candidate);
            (candidate, extracted)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        let extracted = match extracted {
            Ok(extracted) => extracted,
            Err(e) if !e.is_scan_fatal() => {
                warn!(target: "scanner::scan", path = %path.display(), error = %e, "Skipping unreadable file");
                report.problems.push(ScanProblem::from_error(path, &e));
                tx.mark_present(&ids).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let warn_path = candidate.cue.as_ref().map_or(path, |c| c.path.as_path());
        report
            .warnings
            .extend(extracted.warnings.iter().map(|w| ScanProblem::from_error(warn_path, w)));

        for entry in &extracted.entries {
            tx.create_or_update(entry).await?;
            if is_stored(&existing, entry.start_position) {
                report.updated += 1;
            } else {
                report.inserted += 1;
            }
        }
        debug!(
            target: "scanner::scan",
            path = %path.display(),
            entries = extracted.entries.len(),
            "Extracted"
        );
        Ok(())
    }

    fn set_state(&self, next: ScanState) {
        debug_assert!(self.gate.is_held(), "scan state changed without the scan token");
        self.status.send_modify(|status| {
            if !status.state.can_move_to(next) {
                warn!(target: "scanner::scan", from = ?status.state, to = ?next, "Unexpected scan state transition");
            }
            debug!(target: "scanner::scan", from = ?status.state, to = ?next, "Scan state");
            status.state = next;
            if next == ScanState::Idle {
                status.current_folder = None;
            }
        });
        // No receivers is fine
        let _ = self.transitions.send(next);
    }

    fn fail(&self, e: &Error) {
        match e {
            Error::ScanCancelled => info!(target: "scanner::scan", "Scan cancelled, nothing committed"),
            _ => error!(target: "scanner::scan", error = %e, "Scan failed"),
        }
        self.set_state(ScanState::Failed);
        self.status
            .send_modify(|status| status.last_error = Some(e.to_string()));
        self.set_state(ScanState::Idle);
    }
}

fn is_stored(existing: &[ExistingEntry], start_position: f64) -> bool {
    existing.iter().any(|e| e.start_position == start_position)
}

fn unix_mtime(meta: &Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
