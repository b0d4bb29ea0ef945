//! Cue sheet parsing, validation and association with audio files.
//!
//! A cue sheet splits one audio file into sub-tracks. Only the commands
//! needed for cataloguing are interpreted: `REM GENRE`, `REM DATE`,
//! `PERFORMER`, `TITLE`, `FILE`, `TRACK` and `INDEX 01`. Everything else is
//! ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// CD frames per second, the unit of the last `INDEX` time component.
const FRAMES_PER_SECOND: f64 = 75.0;

/// Structural problems that make a cue sheet unusable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CueError {
    #[error("no FILE command")]
    NoFile,

    #[error("no TRACK command")]
    NoTracks,

    #[error("line {0}: TRACK before any FILE")]
    TrackOutsideFile(usize),

    #[error("line {line}: invalid track number {value:?}")]
    BadTrackNumber { line: usize, value: String },

    #[error("line {line}: invalid INDEX time {value:?}")]
    BadIndexTime { line: usize, value: String },

    #[error("track {0} has no INDEX 01")]
    MissingIndex(u32),
}

/// A parsed cue sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueSheet {
    pub title: Option<String>,
    pub performer: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub files: Vec<CueFile>,
}

/// One `FILE` block.
#[derive(Debug, Clone, PartialEq)]
pub struct CueFile {
    pub name: String,
    pub tracks: Vec<CueTrack>,
}

/// One `TRACK` block.
#[derive(Debug, Clone, PartialEq)]
pub struct CueTrack {
    pub number: u32,
    pub title: Option<String>,
    pub performer: Option<String>,
    /// `INDEX 01` offset in seconds
    pub start: f64,
}

impl CueSheet {
    /// The `FILE` block describing `audio_name`, compared case-insensitively
    /// on the file name. A sheet associated by stem falls back to its first
    /// block.
    pub fn file_for(&self, audio_name: &str) -> Option<&CueFile> {
        self.files
            .iter()
            .find(|f| reference_name(&f.name).eq_ignore_ascii_case(audio_name))
            .or_else(|| self.files.first())
    }
}

/// Split one line into words, keeping quoted arguments together.
fn tokenize(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_word = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                if quoted {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
                quoted = !quoted;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = !quoted || in_word;
            }
        }
    }

    if in_word || quoted {
        words.push(current);
    }
    words
}

/// Parse `mm:ss:ff` into seconds.
fn parse_time(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    let frames: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || seconds >= 60 || f64::from(frames) >= FRAMES_PER_SECOND {
        return None;
    }
    Some(f64::from(minutes) * 60.0 + f64::from(seconds) + f64::from(frames) / FRAMES_PER_SECOND)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse cue sheet text.
pub fn parse(text: &str) -> Result<CueSheet, CueError> {
    let mut sheet = CueSheet::default();
    let mut file: Option<CueFile> = None;
    let mut track: Option<(CueTrack, bool)> = None;

    // Close the current track into the current file
    fn finish_track(
        file: &mut Option<CueFile>,
        track: &mut Option<(CueTrack, bool)>,
    ) -> Result<(), CueError> {
        if let Some((t, has_index)) = track.take() {
            if !has_index {
                return Err(CueError::MissingIndex(t.number));
            }
            if let Some(f) = file.as_mut() {
                f.tracks.push(t);
            }
        }
        Ok(())
    }

    let text = text.trim_start_matches('\u{feff}');
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let words = tokenize(line);
        let Some(command) = words.first() else {
            continue;
        };

        match command.to_ascii_uppercase().as_str() {
            "REM" => match words.get(1).map(|w| w.to_ascii_uppercase()).as_deref() {
                Some("GENRE") => sheet.genre = non_empty(words.get(2)),
                Some("DATE") => sheet.date = non_empty(words.get(2)),
                _ => {}
            },
            "TITLE" => match track.as_mut() {
                Some((t, _)) => t.title = non_empty(words.get(1)),
                None if file.is_none() => sheet.title = non_empty(words.get(1)),
                None => {}
            },
            "PERFORMER" => match track.as_mut() {
                Some((t, _)) => t.performer = non_empty(words.get(1)),
                None if file.is_none() => sheet.performer = non_empty(words.get(1)),
                None => {}
            },
            "FILE" => {
                finish_track(&mut file, &mut track)?;
                if let Some(f) = file.take() {
                    sheet.files.push(f);
                }
                file = Some(CueFile {
                    name: words.get(1).cloned().unwrap_or_default(),
                    tracks: Vec::new(),
                });
            }
            "TRACK" => {
                if file.is_none() {
                    return Err(CueError::TrackOutsideFile(line_no));
                }
                finish_track(&mut file, &mut track)?;
                let value = words.get(1).cloned().unwrap_or_default();
                let number = value
                    .parse()
                    .map_err(|_| CueError::BadTrackNumber { line: line_no, value })?;
                track = Some((
                    CueTrack {
                        number,
                        title: None,
                        performer: None,
                        start: 0.0,
                    },
                    false,
                ));
            }
            "INDEX" => {
                let is_start = words.get(1).and_then(|n| n.parse::<u32>().ok()) == Some(1);
                if let (true, Some((t, has_index))) = (is_start, track.as_mut()) {
                    let value = words.get(2).cloned().unwrap_or_default();
                    t.start = parse_time(&value)
                        .ok_or(CueError::BadIndexTime { line: line_no, value })?;
                    *has_index = true;
                }
            }
            _ => {}
        }
    }

    finish_track(&mut file, &mut track)?;
    if let Some(f) = file.take() {
        sheet.files.push(f);
    }

    if sheet.files.is_empty() {
        return Err(CueError::NoFile);
    }
    if sheet.files.iter().all(|f| f.tracks.is_empty()) {
        return Err(CueError::NoTracks);
    }
    Ok(sheet)
}

/// Keep the tracks whose offsets are strictly increasing and inside the
/// audio duration (when known). Returns the kept tracks and one message per
/// dropped track.
pub fn validate(file: &CueFile, duration: Option<f64>) -> (Vec<CueTrack>, Vec<String>) {
    let mut kept: Vec<CueTrack> = Vec::with_capacity(file.tracks.len());
    let mut issues = Vec::new();

    for track in &file.tracks {
        if let Some(prev) = kept.last()
            && track.start <= prev.start
        {
            issues.push(format!(
                "track {} starts at {:.3}s, not after track {} at {:.3}s",
                track.number, track.start, prev.number, prev.start
            ));
            continue;
        }
        if let Some(total) = duration
            && track.start >= total
        {
            issues.push(format!(
                "track {} starts at {:.3}s, beyond the audio length of {:.3}s",
                track.number, track.start, total
            ));
            continue;
        }
        kept.push(track.clone());
    }

    (kept, issues)
}

/// File name part of a `FILE` reference (which may carry directories).
fn reference_name(reference: &str) -> &str {
    reference
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(reference)
}

/// `FILE` references of a cue sheet, read leniently so broken sheets can
/// still be associated (and reported).
pub fn referenced_files(text: &str) -> Vec<String> {
    text.lines()
        .map(tokenize)
        .filter(|words| {
            words
                .first()
                .is_some_and(|w| w.eq_ignore_ascii_case("FILE"))
        })
        .filter_map(|words| words.get(1).map(|name| reference_name(name).to_string()))
        .collect()
}

/// Read a cue sheet as text, tolerating non UTF-8 bytes.
pub fn read_text(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn stem_lower(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_lowercase())
}

/// Pair the audio files of one directory with their cue sheets.
///
/// A cue sheet claims the audio files its `FILE` commands name
/// (case-insensitively); remaining audio files are paired with a cue sheet
/// of the same stem. Each audio file gets at most one cue sheet.
pub fn associate(audio_files: &[PathBuf], cue_sheets: &[PathBuf]) -> HashMap<PathBuf, PathBuf> {
    let mut pairs: HashMap<PathBuf, PathBuf> = HashMap::new();

    for cue in cue_sheets {
        let text = match read_text(cue) {
            Ok(text) => text,
            Err(e) => {
                warn!(target: "metadata::cue", path = %cue.display(), error = %e, "Cannot read cue sheet");
                continue;
            }
        };

        for name in referenced_files(&text) {
            let target = audio_files.iter().find(|audio| {
                audio
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(&name))
            });
            if let Some(audio) = target
                && !pairs.contains_key(audio)
            {
                debug!(target: "metadata::cue", audio = %audio.display(), cue = %cue.display(), "Cue sheet references audio file");
                pairs.insert(audio.clone(), cue.clone());
            }
        }
    }

    for audio in audio_files {
        if pairs.contains_key(audio) {
            continue;
        }
        let stem = stem_lower(audio);
        if let Some(cue) = cue_sheets.iter().find(|cue| stem.is_some() && stem_lower(cue) == stem) {
            pairs.insert(audio.clone(), cue.clone());
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SHEET: &str = r#"REM GENRE "Classical"
REM DATE 1959
PERFORMER "TestCueArtist"
TITLE "AirsonicTest"
FILE "airsonic-test.wav" WAVE
  TRACK 01 AUDIO
    TITLE "Handel"
    PERFORMER "Beecham"
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    TITLE "Bach"
    INDEX 00 00:01:00
    INDEX 01 00:01:37
"#;

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(
            tokenize(r#"FILE "my file.wav" WAVE"#),
            vec!["FILE", "my file.wav", "WAVE"]
        );
        assert_eq!(tokenize(r#"TITLE """#), vec!["TITLE", ""]);
        assert_eq!(tokenize("   INDEX 01 00:00:00\r"), vec!["INDEX", "01", "00:00:00"]);
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("00:00:00"), Some(0.0));
        assert_eq!(parse_time("01:02:00"), Some(62.0));
        assert_eq!(parse_time("00:01:75"), None);
        assert_eq!(parse_time("00:61:00"), None);
        assert_eq!(parse_time("abc"), None);
        let t = parse_time("04:09:15").unwrap();
        assert!((t - 249.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_sheet() {
        let sheet = parse(SHEET).unwrap();
        assert_eq!(sheet.title.as_deref(), Some("AirsonicTest"));
        assert_eq!(sheet.performer.as_deref(), Some("TestCueArtist"));
        assert_eq!(sheet.genre.as_deref(), Some("Classical"));
        assert_eq!(sheet.date.as_deref(), Some("1959"));
        assert_eq!(sheet.files.len(), 1);

        let tracks = &sheet.files[0].tracks;
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title.as_deref(), Some("Handel"));
        assert_eq!(tracks[0].performer.as_deref(), Some("Beecham"));
        assert_eq!(tracks[1].performer, None);
        assert!((tracks[1].start - (1.0 + 37.0 / 75.0)).abs() < 1e-9);
    }

    #[test]
    fn test_parse_with_bom_and_crlf() {
        let text = format!("\u{feff}{}", SHEET.replace('\n', "\r\n"));
        let sheet = parse(&text).unwrap();
        assert_eq!(sheet.files[0].name, "airsonic-test.wav");
        assert_eq!(sheet.files[0].tracks.len(), 2);
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(parse("TITLE \"x\"\n"), Err(CueError::NoFile));
        assert_eq!(parse("FILE \"a.wav\" WAVE\n"), Err(CueError::NoTracks));
        assert_eq!(
            parse("TRACK 01 AUDIO\nFILE \"a.wav\" WAVE\n"),
            Err(CueError::TrackOutsideFile(1))
        );
        assert!(matches!(
            parse("FILE \"a.wav\" WAVE\nTRACK 01 AUDIO\nINDEX 01 zz:00:00\n"),
            Err(CueError::BadIndexTime { line: 3, .. })
        ));
        assert_eq!(
            parse("FILE \"a.wav\" WAVE\nTRACK 01 AUDIO\nTITLE \"x\"\n"),
            Err(CueError::MissingIndex(1))
        );
    }

    #[test]
    fn test_validate_drops_inconsistent_tracks() {
        let file = CueFile {
            name: "a.wav".into(),
            tracks: [(1, 0.0), (2, 30.0), (3, 20.0), (4, 50.0), (5, 120.0)]
                .into_iter()
                .map(|(number, start)| CueTrack {
                    number,
                    title: None,
                    performer: None,
                    start,
                })
                .collect(),
        };

        let (kept, issues) = validate(&file, Some(100.0));
        let numbers: Vec<u32> = kept.iter().map(|t| t.number).collect();
        assert_eq!(numbers, vec![1, 2, 4]);
        assert_eq!(issues.len(), 2);

        let (kept, issues) = validate(&file, None);
        assert_eq!(kept.len(), 4);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_file_for_matches_reference_or_first() {
        let sheet = parse(
            "FILE \"dir\\One.WAV\" WAVE\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n\
             FILE \"two.wav\" WAVE\nTRACK 02 AUDIO\nINDEX 01 00:00:00\n",
        )
        .unwrap();
        assert_eq!(sheet.file_for("two.wav").unwrap().tracks[0].number, 2);
        assert_eq!(sheet.file_for("one.wav").unwrap().tracks[0].number, 1);
        assert_eq!(sheet.file_for("other.flac").unwrap().name, "dir\\One.WAV");
    }

    #[test]
    fn test_associate_by_reference_then_stem() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let image = root.join("Image.FLAC");
        let live = root.join("live.flac");
        let lone = root.join("lone.mp3");
        for audio in [&image, &live, &lone] {
            fs::write(audio, b"").unwrap();
        }

        let disc = root.join("disc.cue");
        fs::write(&disc, "FILE \"image.flac\" WAVE\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n").unwrap();
        let live_cue = root.join("live.cue");
        fs::write(&live_cue, "FILE \"live.wav\" WAVE\n").unwrap();

        let audio = vec![image.clone(), live.clone(), lone.clone()];
        let pairs = associate(&audio, &[disc.clone(), live_cue.clone()]);

        assert_eq!(pairs.get(&image), Some(&disc));
        assert_eq!(pairs.get(&live), Some(&live_cue));
        assert_eq!(pairs.get(&lone), None);
    }
}
