//! Deterministic traversal of one music folder.
//!
//! [`FolderWalker::walk`] yields one [`WalkedDirectory`] per directory that
//! holds audio files or cue sheets. Children are visited in lexicographic
//! order so two walks over the same tree produce the same sequence. Hidden
//! and system entries are skipped, and every directory is visited at most
//! once by canonical path, which also breaks symlink cycles.
//!
//! A subdirectory batch is emitted before the batch of its parent, since the
//! parent stays open until all of its children have been seen.

use futures::stream::Stream;
use std::collections::{HashSet, VecDeque};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use walkdir::{DirEntry, FilterEntry, WalkDir};

/// Audio file extensions picked up by the walker (lower-case).
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "opus", "spx", "m4a", "m4b", "mp4", "aac", "wav", "aif", "aiff",
    "aifc", "ape", "mpc", "wv",
];

/// Cue sheet extension.
pub const CUE_EXTENSION: &str = "cue";

/// Entry names skipped regardless of case (NAS metadata, OS litter).
const SYSTEM_ENTRIES: &[&str] = &[
    "@eadir",
    "thumbs.db",
    "desktop.ini",
    "$recycle.bin",
    "system volume information",
    "lost+found",
];

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
}

/// Whether the path has an allow-listed audio extension (case-insensitive).
pub fn is_audio_file(path: &Path) -> bool {
    lowercase_extension(path).is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether the path is a cue sheet.
pub fn is_cue_sheet(path: &Path) -> bool {
    lowercase_extension(path).is_some_and(|ext| ext == CUE_EXTENSION)
}

/// Hidden (dot-prefixed) or system entry.
pub fn is_excluded(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || SYSTEM_ENTRIES.contains(&name.to_lowercase().as_str())
}

/// Relative path of `path` under `root`, `/`-separated, `""` for the root.
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

/// Audio files and cue sheets found directly inside one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedDirectory {
    /// Absolute directory path
    pub path: PathBuf,
    /// Path relative to the folder root, `""` for the root itself
    pub relative_path: String,
    /// Audio files, sorted by name
    pub audio_files: Vec<PathBuf>,
    /// Cue sheets, sorted by name
    pub cue_sheets: Vec<PathBuf>,
}

impl WalkedDirectory {
    fn new(path: PathBuf, relative_path: String) -> Self {
        Self {
            path,
            relative_path,
            audio_files: Vec::new(),
            cue_sheets: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio_files.is_empty() && self.cue_sheets.is_empty()
    }
}

/// Walker over one folder root. Each call to [`walk`](Self::walk) starts a
/// fresh traversal.
#[derive(Debug, Clone)]
pub struct FolderWalker {
    root: PathBuf,
}

impl FolderWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Start a new lazy traversal.
    pub fn walk(&self) -> Walk {
        let inner = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(keep_entry as fn(&DirEntry) -> bool);

        Walk {
            root: self.root.clone(),
            inner,
            visited: HashSet::new(),
            open: Vec::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

fn keep_entry(entry: &DirEntry) -> bool {
    entry.depth() == 0 || !is_excluded(entry.file_name())
}

/// Lazy, finite traversal produced by [`FolderWalker::walk`].
pub struct Walk {
    root: PathBuf,
    inner: FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>,
    visited: HashSet<PathBuf>,
    /// Directories whose subtree is still being walked, with their depth
    open: Vec<(usize, WalkedDirectory)>,
    ready: VecDeque<WalkedDirectory>,
    done: bool,
}

impl Walk {
    /// Close every open directory at `depth` or deeper.
    fn close_from(&mut self, depth: usize) {
        while self.open.last().is_some_and(|(d, _)| *d >= depth) {
            if let Some((_, dir)) = self.open.pop()
                && !dir.is_empty()
            {
                self.ready.push_back(dir);
            }
        }
    }

    fn enter_directory(&mut self, entry: &DirEntry) {
        let canonical = match std::fs::canonicalize(entry.path()) {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "scanner::walk", path = %entry.path().display(), error = %e, "Cannot resolve directory, skipping");
                self.inner.skip_current_dir();
                return;
            }
        };

        if !self.visited.insert(canonical) {
            debug!(target: "scanner::walk", path = %entry.path().display(), "Directory already visited, skipping");
            self.inner.skip_current_dir();
            return;
        }

        self.close_from(entry.depth());
        let rel = relative_path(&self.root, entry.path());
        self.open.push((
            entry.depth(),
            WalkedDirectory::new(entry.path().to_path_buf(), rel),
        ));
    }

    fn add_file(&mut self, entry: &DirEntry) {
        self.close_from(entry.depth());
        let path = entry.path();
        let Some((_, dir)) = self.open.last_mut() else {
            return;
        };

        if is_audio_file(path) {
            trace!(target: "scanner::walk", path = %path.display(), "Audio file");
            dir.audio_files.push(path.to_path_buf());
        } else if is_cue_sheet(path) {
            trace!(target: "scanner::walk", path = %path.display(), "Cue sheet");
            dir.cue_sheets.push(path.to_path_buf());
        }
    }
}

impl Iterator for Walk {
    type Item = WalkedDirectory;

    fn next(&mut self) -> Option<WalkedDirectory> {
        loop {
            if let Some(dir) = self.ready.pop_front() {
                return Some(dir);
            }
            if self.done {
                return None;
            }

            match self.inner.next() {
                None => {
                    self.done = true;
                    self.close_from(0);
                }
                Some(Err(e)) => {
                    // Symlink loops surface here as well
                    warn!(target: "scanner::walk", error = %e, "Skipping unreadable entry");
                }
                Some(Ok(entry)) => {
                    if entry.file_type().is_dir() {
                        self.enter_directory(&entry);
                    } else if entry.file_type().is_file() {
                        self.add_file(&entry);
                    }
                }
            }
        }
    }
}

/// Walk `root` on a blocking thread and stream the directory batches.
///
/// The channel is bounded, so the walk never runs far ahead of the
/// consumer. Dropping the stream stops the walk.
pub fn scan(root: PathBuf) -> impl Stream<Item = WalkedDirectory> {
    let (tx, rx) = mpsc::channel(16);

    // Spawn a blocking task to perform the synchronous file system traversal
    tokio::task::spawn_blocking(move || {
        for dir in FolderWalker::new(root).walk() {
            // If the receiver is dropped, blocking_send returns an error and we stop.
            if tx.blocking_send(dir).is_err() {
                break;
            }
        }
    });

    // Convert the mpsc Receiver into a Stream
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|dir| (dir, rx))
    })
}
