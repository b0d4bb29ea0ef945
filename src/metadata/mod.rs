//! Audio file metadata extraction.
//!
//! Uses the lofty crate for tag decoding (see [`format`]) and turns the raw
//! tags into catalog entries:
//! - Lenient normalization of numbers and empty strings
//! - Filename heuristics when tags are missing
//! - Cue sheet expansion into sub-tracks (see [`cue`])

pub mod cue;
pub mod format;

pub use format::{ContainerFormat, DecodeMetadata, RawTags};

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{MediaFile, MediaType, WHOLE_FILE};

/// An audio file found by the walk, with the facts the scan already knows.
#[derive(Debug, Clone)]
pub struct AudioCandidate {
    pub folder_id: i64,
    pub media_type: MediaType,
    /// Absolute path
    pub path: PathBuf,
    pub relative_path: String,
    pub parent_path: String,
    /// Associated cue sheet
    pub cue: Option<CueCandidate>,
    pub file_size: i64,
    pub last_modified: i64,
    pub content_hash: Option<String>,
}

/// A cue sheet associated with an [`AudioCandidate`].
#[derive(Debug, Clone, PartialEq)]
pub struct CueCandidate {
    pub path: PathBuf,
    pub relative_path: String,
}

/// Catalog entries produced from one audio file.
#[derive(Debug)]
pub struct Extracted {
    /// The whole-file entry first, then sub-tracks in order
    pub entries: Vec<MediaFile>,
    /// Cue sheet problems ([`Error::Validation`])
    pub warnings: Vec<Error>,
}

/// Turns audio files into catalog entries.
#[derive(Debug, Clone, Copy)]
pub struct TagExtractor {
    enable_cue_indexing: bool,
}

impl TagExtractor {
    pub fn new(enable_cue_indexing: bool) -> Self {
        Self {
            enable_cue_indexing,
        }
    }

    pub fn cue_indexing(&self) -> bool {
        self.enable_cue_indexing
    }

    /// Decode one audio file and expand its cue sheet.
    ///
    /// Fails with [`Error::Parse`] when the file cannot be decoded. Cue sheet
    /// problems never fail the file, they end up in [`Extracted::warnings`].
    pub fn extract(&self, candidate: &AudioCandidate) -> Result<Extracted> {
        let (container, raw) = format::read_tags(&candidate.path)?;
        debug!(target: "metadata", path = %candidate.path.display(), ?container, "Decoded tags");

        let mut whole = normalize(candidate, raw);
        let mut warnings = Vec::new();
        let mut sub_tracks = Vec::new();

        if let Some(cue_ref) = candidate.cue.as_ref().filter(|_| self.enable_cue_indexing) {
            match expand_cue(candidate, cue_ref, &whole) {
                Ok((tracks, issues)) => {
                    warnings.extend(issues);
                    if tracks.is_empty() {
                        warnings.push(Error::validation(&cue_ref.path, "no usable tracks"));
                    } else {
                        whole.index_path = Some(cue_ref.relative_path.clone());
                        sub_tracks = tracks;
                    }
                }
                Err(e) => warnings.push(e),
            }
        }

        for warning in &warnings {
            warn!(target: "metadata::cue", error = %warning, "Cue sheet problem");
        }

        let mut entries = Vec::with_capacity(1 + sub_tracks.len());
        entries.push(whole);
        entries.extend(sub_tracks);
        Ok(Extracted { entries, warnings })
    }
}

/// Parse the cue sheet and build one entry per usable track.
fn expand_cue(
    candidate: &AudioCandidate,
    cue_ref: &CueCandidate,
    whole: &MediaFile,
) -> Result<(Vec<MediaFile>, Vec<Error>)> {
    let text = cue::read_text(&cue_ref.path)
        .map_err(|e| Error::validation(&cue_ref.path, format!("cannot read: {e}")))?;
    let sheet = cue::parse(&text).map_err(|e| Error::validation(&cue_ref.path, e.to_string()))?;

    let audio_name = candidate
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(file) = sheet.file_for(&audio_name) else {
        return Ok((Vec::new(), Vec::new()));
    };

    let (tracks, issues) = cue::validate(file, whole.duration);
    let issues = issues
        .into_iter()
        .map(|message| Error::validation(&cue_ref.path, message))
        .collect();

    let album_artist = clean(sheet.performer.clone());
    let album_name = clean(sheet.title.clone());
    let genre = clean(sheet.genre.clone());
    let year = sheet.date.as_deref().and_then(parse_year);

    let entries = tracks
        .iter()
        .enumerate()
        .map(|(i, track)| {
            let end = tracks.get(i + 1).map(|next| next.start).or(whole.duration);
            MediaFile {
                id: 0,
                title: clean(track.title.clone()).or_else(|| Some(format!("Track {}", track.number))),
                artist: clean(track.performer.clone()).or_else(|| album_artist.clone()),
                album_artist: album_artist.clone(),
                album_name: album_name.clone(),
                genre: genre.clone(),
                year,
                track_number: i32::try_from(track.number).ok(),
                disc_number: None,
                duration: end.map(|end| end - track.start),
                start_position: track.start,
                index_path: None,
                mb_recording_id: None,
                ..whole.clone()
            }
        })
        .collect();

    Ok((entries, issues))
}

/// Build the whole-file entry from raw tags.
fn normalize(candidate: &AudioCandidate, raw: RawTags) -> MediaFile {
    let stem = candidate
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut track_number = raw.track.as_deref().and_then(parse_number);
    let title = match clean(raw.title) {
        Some(title) => title,
        None => {
            let (number, title) = title_from_filename(&stem);
            track_number = track_number.or(number);
            title
        }
    };

    MediaFile {
        id: 0,
        folder_id: candidate.folder_id,
        relative_path: candidate.relative_path.clone(),
        parent_path: candidate.parent_path.clone(),
        title: Some(title),
        artist: clean(raw.artist),
        album_artist: clean(raw.album_artist),
        album_name: clean(raw.album),
        genre: clean(raw.genre),
        year: raw.year.as_deref().and_then(parse_year),
        track_number,
        disc_number: raw.disc.as_deref().and_then(parse_number),
        format: extension(&candidate.path),
        media_type: candidate.media_type,
        duration: raw.duration,
        file_size: candidate.file_size,
        start_position: WHOLE_FILE,
        index_path: None,
        mb_release_id: clean(raw.mb_release_id),
        mb_recording_id: clean(raw.mb_recording_id),
        last_modified: candidate.last_modified,
        content_hash: candidate.content_hash.clone(),
        present: true,
    }
}

/// Lower-case file extension.
pub fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Trim, and treat blank strings as absent.
pub fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First run of four digits: `"2001-05-03"` gives 2001.
pub fn parse_year(text: &str) -> Option<i32> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |len| start + len);
        if end - start >= 4 {
            return text[start..start + 4].parse().ok();
        }
        start = end;
    }
    None
}

/// Leading positive integer: `"3/12"` gives 3.
pub fn parse_number(text: &str) -> Option<i32> {
    let text = text.trim();
    let digits = text.len() - text.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    text[..digits].parse().ok().filter(|n| *n > 0)
}

/// `"01 - Aria"` gives track 1 and title `"Aria"`; anything else is the
/// stem unchanged.
pub fn title_from_filename(stem: &str) -> (Option<i32>, String) {
    let rest = stem.trim_start_matches(|c: char| c.is_ascii_digit());
    let digits = stem.len() - rest.len();
    let title = rest.trim_start_matches([' ', '-', '.', '_']);

    if (1..=3).contains(&digits) && title.len() < rest.len() && !title.is_empty() {
        (parse_number(&stem[..digits]), title.to_string())
    } else {
        (None, stem.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestTags, write_tags, write_wav};
    use proptest::prelude::*;

    fn candidate(root: &Path, rel: &str, cue: Option<&str>) -> AudioCandidate {
        AudioCandidate {
            folder_id: 1,
            media_type: MediaType::Music,
            path: root.join(rel),
            relative_path: rel.to_string(),
            parent_path: String::new(),
            cue: cue.map(|c| CueCandidate {
                path: root.join(c),
                relative_path: c.to_string(),
            }),
            file_size: 0,
            last_modified: 1,
            content_hash: None,
        }
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2001"), Some(2001));
        assert_eq!(parse_year("2001-05-03"), Some(2001));
        assert_eq!(parse_year("12/1999"), Some(1999));
        assert_eq!(parse_year("c. 1970s"), Some(1970));
        assert_eq!(parse_year("unknown"), None);
        assert_eq!(parse_year("99"), None);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("3/12"), Some(3));
        assert_eq!(parse_number(" 07 "), Some(7));
        assert_eq!(parse_number("A1"), None);
        assert_eq!(parse_number("0"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_title_from_filename() {
        assert_eq!(title_from_filename("01 - Aria"), (Some(1), "Aria".to_string()));
        assert_eq!(title_from_filename("7.Intro"), (Some(7), "Intro".to_string()));
        assert_eq!(title_from_filename("airsonic-test"), (None, "airsonic-test".to_string()));
        assert_eq!(title_from_filename("1979"), (None, "1979".to_string()));
        assert_eq!(title_from_filename("01"), (None, "01".to_string()));
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean(Some("  x ".into())), Some("x".into()));
        assert_eq!(clean(Some("   ".into())), None);
        assert_eq!(clean(None), None);
    }

    #[test]
    fn test_untagged_wav_uses_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("airsonic-test.wav"), 1.0);

        let extracted = TagExtractor::new(true)
            .extract(&candidate(dir.path(), "airsonic-test.wav", None))
            .unwrap();
        assert_eq!(extracted.entries.len(), 1);

        let file = &extracted.entries[0];
        assert_eq!(file.title.as_deref(), Some("airsonic-test"));
        assert_eq!(file.format, "wav");
        assert_eq!(file.artist, None);
        assert_eq!(file.album_name, None);
        assert_eq!(file.track_number, None);
        assert_eq!(file.year, None);
        assert_eq!(file.start_position, WHOLE_FILE);
        assert!(file.index_path.is_none());
    }

    #[test]
    fn test_tagged_file_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("05 - Something.wav");
        write_wav(&path, 1.0);
        write_tags(
            &path,
            &TestTags {
                artist: Some("  Band "),
                album: Some("Record"),
                genre: Some("Rock"),
                year: Some(1994),
                mb_release_id: Some("2f0f1a0c-0000-4000-8000-000000000001"),
                ..Default::default()
            },
        );

        let extracted = TagExtractor::new(true)
            .extract(&candidate(dir.path(), "05 - Something.wav", None))
            .unwrap();
        let file = &extracted.entries[0];
        assert_eq!(file.title.as_deref(), Some("Something"));
        assert_eq!(file.track_number, Some(5));
        assert_eq!(file.artist.as_deref(), Some("Band"));
        assert_eq!(file.year, Some(1994));
        assert_eq!(
            file.mb_release_id.as_deref(),
            Some("2f0f1a0c-0000-4000-8000-000000000001")
        );
    }

    #[test]
    fn test_cue_expansion() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("airsonic-test.wav"), 3.0);
        std::fs::write(dir.path().join("airsonic-test.cue"), crate::test_utils::TWO_TRACK_CUE).unwrap();

        let extracted = TagExtractor::new(true)
            .extract(&candidate(dir.path(), "airsonic-test.wav", Some("airsonic-test.cue")))
            .unwrap();
        assert!(extracted.warnings.is_empty());
        assert_eq!(extracted.entries.len(), 3);

        let whole = &extracted.entries[0];
        assert_eq!(whole.start_position, WHOLE_FILE);
        assert_eq!(whole.index_path.as_deref(), Some("airsonic-test.cue"));

        let first = &extracted.entries[1];
        assert_eq!(first.title.as_deref(), Some("Handel"));
        assert_eq!(first.artist.as_deref(), Some("Beecham"));
        assert_eq!(first.album_artist.as_deref(), Some("TestCueArtist"));
        assert_eq!(first.album_name.as_deref(), Some("AirsonicTest"));
        assert_eq!(first.track_number, Some(1));
        assert_eq!(first.year, None);
        assert_eq!(first.start_position, 0.0);
        assert!(first.index_path.is_none());
        assert_eq!(first.relative_path, "airsonic-test.wav");
        assert!((first.duration.unwrap() - 1.0).abs() < 1e-9);

        let second = &extracted.entries[2];
        assert_eq!(second.artist.as_deref(), Some("TestCueArtist"));
        assert!(second.start_position > first.start_position);
        assert!((second.duration.unwrap() - 2.0).abs() < 0.1);
    }

    #[test]
    fn test_cue_disabled_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("airsonic-test.wav"), 3.0);
        std::fs::write(dir.path().join("airsonic-test.cue"), crate::test_utils::TWO_TRACK_CUE).unwrap();

        let extracted = TagExtractor::new(false)
            .extract(&candidate(dir.path(), "airsonic-test.wav", Some("airsonic-test.cue")))
            .unwrap();
        assert_eq!(extracted.entries.len(), 1);
        assert!(extracted.entries[0].index_path.is_none());
    }

    #[test]
    fn test_broken_cue_keeps_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("a.wav"), 1.0);
        std::fs::write(dir.path().join("a.cue"), "FILE \"a.wav\" WAVE\nTRACK xx AUDIO\n").unwrap();

        let extracted = TagExtractor::new(true)
            .extract(&candidate(dir.path(), "a.wav", Some("a.cue")))
            .unwrap();
        assert_eq!(extracted.entries.len(), 1);
        assert!(extracted.entries[0].index_path.is_none());
        assert_eq!(extracted.warnings.len(), 1);
        assert!(matches!(extracted.warnings[0], Error::Validation { .. }));
    }

    #[test]
    fn test_cue_beyond_length_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("a.wav"), 1.0);
        std::fs::write(
            dir.path().join("a.cue"),
            "FILE \"a.wav\" WAVE\nTRACK 01 AUDIO\nINDEX 01 05:00:00\n",
        )
        .unwrap();

        let extracted = TagExtractor::new(true)
            .extract(&candidate(dir.path(), "a.wav", Some("a.cue")))
            .unwrap();
        assert_eq!(extracted.entries.len(), 1);
        assert!(extracted.entries[0].index_path.is_none());
        assert_eq!(extracted.warnings.len(), 2);
    }

    #[test]
    fn test_unparsable_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.mp3"), b"not audio at all").unwrap();
        let err = TagExtractor::new(true)
            .extract(&candidate(dir.path(), "bad.mp3", None))
            .unwrap_err();
        assert!(!err.is_scan_fatal());
    }

    proptest! {
        #[test]
        fn prop_parse_number_never_panics(s in "\\PC*") {
            let _ = parse_number(&s);
            let _ = parse_year(&s);
            let _ = title_from_filename(&s);
        }

        #[test]
        fn prop_year_roundtrips(year in 1000i32..=9999) {
            prop_assert_eq!(parse_year(&format!("{year}-01-01")), Some(year));
        }
    }
}
