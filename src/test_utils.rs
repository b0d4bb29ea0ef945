//! Test utilities and fixtures.
//!
//! Provides temporary databases, catalog entry factories and small audio
//! fixtures written to disk.
//!
//! # Example
//!
//! ```ignore
//! use music_catalog::test_utils::{temp_db, write_wav};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     write_wav(&dir.path().join("a.wav"), 1.0);
//! }
//! ```

use std::path::Path;

use lofty::config::WriteOptions;
use lofty::tag::{Accessor, ItemKey, Tag, TagExt, TagType};
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::model::{MediaFile, MediaType, WHOLE_FILE};

/// A two-track cue sheet for `airsonic-test.wav` (at least 2 seconds long).
pub const TWO_TRACK_CUE: &str = r#"REM COMMENT "fixture"
PERFORMER "TestCueArtist"
TITLE "AirsonicTest"
FILE "airsonic-test.wav" WAVE
  TRACK 01 AUDIO
    TITLE "Handel"
    PERFORMER "Beecham"
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    TITLE "Second Movement"
    INDEX 01 00:01:00
"#;

/// Creates a temporary database with migrations applied.
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Creates an untagged whole-file entry at `relative_path`.
///
/// Customize with struct update syntax or by mutating the result.
pub fn mock_media_file(folder_id: i64, relative_path: &str) -> MediaFile {
    let parent_path = relative_path
        .rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .unwrap_or_default();
    let format = relative_path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    MediaFile {
        id: 0,
        folder_id,
        relative_path: relative_path.to_string(),
        parent_path,
        title: None,
        artist: None,
        album_artist: None,
        album_name: None,
        genre: None,
        year: None,
        track_number: None,
        disc_number: None,
        format,
        media_type: MediaType::Music,
        duration: Some(180.0),
        file_size: 1024,
        start_position: WHOLE_FILE,
        index_path: None,
        mb_release_id: None,
        mb_recording_id: None,
        last_modified: 1_700_000_000,
        content_hash: None,
        present: true,
    }
}

/// Writes a silent 8 kHz mono 16-bit PCM WAV file of `seconds` length.
pub fn write_wav(path: &Path, seconds: f64) {
    const SAMPLE_RATE: u32 = 8000;
    let data_len = (SAMPLE_RATE as f64 * seconds) as u32 * 2;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    bytes.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);

    std::fs::write(path, bytes).expect("Failed to write WAV fixture");
}

/// Tags written by [`write_tags`].
#[derive(Debug, Clone, Default)]
pub struct TestTags<'a> {
    pub title: Option<&'a str>,
    pub artist: Option<&'a str>,
    pub album: Option<&'a str>,
    pub album_artist: Option<&'a str>,
    pub genre: Option<&'a str>,
    pub mb_release_id: Option<&'a str>,
    pub year: Option<u32>,
    pub track: Option<u32>,
}

/// Replaces the tags of `path` with an ID3v2 tag holding `tags`.
pub fn write_tags(path: &Path, tags: &TestTags<'_>) {
    let mut tag = Tag::new(TagType::Id3v2);
    if let Some(title) = tags.title {
        tag.set_title(title.to_string());
    }
    if let Some(artist) = tags.artist {
        tag.set_artist(artist.to_string());
    }
    if let Some(album) = tags.album {
        tag.set_album(album.to_string());
    }
    if let Some(genre) = tags.genre {
        tag.set_genre(genre.to_string());
    }
    if let Some(year) = tags.year {
        tag.set_year(year);
    }
    if let Some(track) = tags.track {
        tag.set_track(track);
    }
    if let Some(album_artist) = tags.album_artist {
        tag.insert_text(ItemKey::AlbumArtist, album_artist.to_string());
    }
    if let Some(release_id) = tags.mb_release_id {
        tag.insert_text(ItemKey::MusicBrainzReleaseId, release_id.to_string());
    }
    tag.save_to_path(path, WriteOptions::default())
        .expect("Failed to write tags");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;
        let files = crate::db::get_all_media_files(&pool).await.unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_mock_media_file_derives_paths() {
        let file = mock_media_file(3, "Artist/Album/01.FLAC");
        assert_eq!(file.folder_id, 3);
        assert_eq!(file.parent_path, "Artist/Album");
        assert_eq!(file.format, "flac");
        assert_eq!(mock_media_file(1, "root.mp3").parent_path, "");
    }

    #[test]
    fn test_write_wav_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, 1.5);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44 + 24_000);
    }
}
