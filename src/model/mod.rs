//! Core data models for the media catalog.
//!
//! Defines the primary entities: [`MusicFolder`], [`MediaFile`], [`Album`]
//! and [`Artist`].
//!
//! # Database Schema
//!
//! The models map to the following tables:
//! - `music_folder` - Configured roots, mirrored from the config file
//! - `media_file` - One row per playable track (whole file or cue sub-track)
//! - `album` / `album_folder` - Materialized aggregate over `media_file`
//! - `artist` / `artist_folder` - Materialized aggregate over `media_file`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Start position marking a whole-file entry (as opposed to a cue sub-track).
pub const WHOLE_FILE: f64 = -1.0;

/// Kind of content a [`MusicFolder`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    #[default]
    Media,
    Podcast,
}

impl FolderType {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderType::Media => "media",
            FolderType::Podcast => "podcast",
        }
    }

    /// Media type given to songs found in a folder of this type.
    pub fn media_type(&self) -> MediaType {
        match self {
            FolderType::Media => MediaType::Music,
            FolderType::Podcast => MediaType::Podcast,
        }
    }
}

impl std::str::FromStr for FolderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "media" => Ok(FolderType::Media),
            "podcast" => Ok(FolderType::Podcast),
            other => Err(format!("unknown folder type '{other}' (expected media or podcast)")),
        }
    }
}

/// Media type of a catalog entry, indexed as a raw keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Music,
    Podcast,
}

impl MediaType {
    /// Keyword used in storage and in the search index.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Music => "MUSIC",
            MediaType::Podcast => "PODCAST",
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PODCAST" => MediaType::Podcast,
            _ => MediaType::Music,
        })
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured filesystem root subject to scanning.
///
/// Owned by configuration and never modified while a scan runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicFolder {
    pub id: i64,
    pub path: PathBuf,
    pub name: String,
    pub folder_type: FolderType,
    pub enabled: bool,
    pub last_scanned: Option<DateTime<Utc>>,
}

impl MusicFolder {
    pub fn new(id: i64, path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            name: name.into(),
            folder_type: FolderType::Media,
            enabled: true,
            last_scanned: None,
        }
    }

    /// Folder path as indexed in the `folder` keyword field.
    pub fn path_key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// A playable track: a whole audio file or a cue-derived sub-track.
///
/// `(folder_id, relative_path, start_position)` is unique. Sub-tracks share
/// the relative path of their audio file and differ by `start_position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    /// Database ID (0 until persisted)
    pub id: i64,
    pub folder_id: i64,
    /// Path relative to the folder root, `/`-separated
    pub relative_path: String,
    /// Relative path of the containing directory, `""` at the folder root
    pub parent_path: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album_name: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    /// Lower-case file extension
    pub format: String,
    pub media_type: MediaType,
    /// Duration in seconds
    pub duration: Option<f64>,
    pub file_size: i64,
    /// [`WHOLE_FILE`] for whole files, offset in seconds for cue sub-tracks
    pub start_position: f64,
    /// Relative path of the cue sheet indexing this whole file
    pub index_path: Option<String>,
    pub mb_release_id: Option<String>,
    pub mb_recording_id: Option<String>,
    /// Unix seconds of the newest of the audio file and its cue sheet
    pub last_modified: i64,
    pub content_hash: Option<String>,
    pub present: bool,
}

impl MediaFile {
    /// Whether this entry is a cue sub-track.
    pub fn is_sub_track(&self) -> bool {
        self.start_position >= 0.0
    }

    /// Whether this whole-file entry is split into cue sub-tracks.
    pub fn is_cue_container(&self) -> bool {
        self.index_path.is_some()
    }
}

/// An album, recomputed from the media files after each commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub name: String,
    /// Album artist (or track artist); empty when unknown
    pub artist: String,
    /// Parent path of the album's tracks
    pub path: String,
    /// Lowest id among `folder_ids`
    pub folder_id: i64,
    /// Folders holding tracks of this album
    pub folder_ids: Vec<i64>,
    pub song_count: i64,
    pub duration: f64,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub mb_release_id: Option<String>,
}

/// An artist, recomputed from the media files after each commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub album_count: i64,
    pub song_count: i64,
    /// Folders contributing songs to this artist
    pub folder_ids: Vec<i64>,
}
