//! Container detection and tag decoding.
//!
//! The container is identified from its leading bytes, never from the file
//! extension, and each [`ContainerFormat`] decodes its own tags through the
//! [`DecodeMetadata`] capability.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use lofty::file::{AudioFile, FileType, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};

use crate::error::{Error, Result};

/// Bytes inspected when sniffing a container.
const SNIFF_LEN: u64 = 512;

/// Supported audio containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    Mpeg,
    Aac,
    Flac,
    Mp4,
    Vorbis,
    Opus,
    Speex,
    Wav,
    Aiff,
    Ape,
    Musepack,
    WavPack,
}

/// Tags as stored in the file, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    /// Year or full date text
    pub year: Option<String>,
    /// Track number text, possibly `n/total`
    pub track: Option<String>,
    pub disc: Option<String>,
    pub mb_release_id: Option<String>,
    pub mb_recording_id: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
}

/// Decode the tags of one container.
pub trait DecodeMetadata {
    fn decode<R: Read + Seek>(&self, reader: R) -> std::result::Result<RawTags, String>;
}

impl ContainerFormat {
    /// Identify the container from the start of `reader`, which is rewound
    /// afterwards.
    pub fn sniff<R: Read + Seek>(reader: &mut R) -> std::io::Result<Option<Self>> {
        let mut header = Vec::with_capacity(SNIFF_LEN as usize);
        reader.by_ref().take(SNIFF_LEN).read_to_end(&mut header)?;

        let format = match Self::detect(&header) {
            Some(Detected::Format(format)) => Some(format),
            Some(Detected::Id3 { offset }) => {
                reader.seek(SeekFrom::Start(offset))?;
                let mut after = Vec::with_capacity(16);
                reader.by_ref().take(16).read_to_end(&mut after)?;
                Some(match Self::detect(&after) {
                    Some(Detected::Format(ContainerFormat::Flac)) => ContainerFormat::Flac,
                    Some(Detected::Format(ContainerFormat::Aac)) => ContainerFormat::Aac,
                    _ => ContainerFormat::Mpeg,
                })
            }
            None => None,
        };

        reader.seek(SeekFrom::Start(0))?;
        Ok(format)
    }

    fn detect(header: &[u8]) -> Option<Detected> {
        let at = |offset: usize, magic: &[u8]| header.get(offset..offset + magic.len()) == Some(magic);

        if at(0, b"ID3") && header.len() >= 10 {
            // Syncsafe tag size, plus the optional footer
            let size = header[6..10]
                .iter()
                .fold(0u64, |acc, b| (acc << 7) | u64::from(b & 0x7f));
            let footer = if header[5] & 0x10 != 0 { 10 } else { 0 };
            return Some(Detected::Id3 {
                offset: 10 + size + footer,
            });
        }

        let format = if at(0, b"fLaC") {
            ContainerFormat::Flac
        } else if at(4, b"ftyp") {
            ContainerFormat::Mp4
        } else if at(0, b"OggS") {
            return Self::detect_ogg(header).map(Detected::Format);
        } else if at(0, b"RIFF") && at(8, b"WAVE") {
            ContainerFormat::Wav
        } else if at(0, b"FORM") && (at(8, b"AIFF") || at(8, b"AIFC")) {
            ContainerFormat::Aiff
        } else if at(0, b"MAC ") {
            ContainerFormat::Ape
        } else if at(0, b"MPCK") || at(0, b"MP+") {
            ContainerFormat::Musepack
        } else if at(0, b"wvpk") {
            ContainerFormat::WavPack
        } else if header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0 {
            // Frame sync: layer bits 00 mean ADTS
            if header[1] & 0x06 == 0 {
                ContainerFormat::Aac
            } else {
                ContainerFormat::Mpeg
            }
        } else {
            return None;
        };
        Some(Detected::Format(format))
    }

    /// Codec of the first Ogg page.
    fn detect_ogg(header: &[u8]) -> Option<ContainerFormat> {
        let segments = usize::from(*header.get(26)?);
        let payload = header.get(27 + segments..)?;
        if payload.starts_with(b"\x01vorbis") {
            Some(ContainerFormat::Vorbis)
        } else if payload.starts_with(b"OpusHead") {
            Some(ContainerFormat::Opus)
        } else if payload.starts_with(b"Speex   ") {
            Some(ContainerFormat::Speex)
        } else {
            None
        }
    }

    fn file_type(self) -> FileType {
        match self {
            ContainerFormat::Mpeg => FileType::Mpeg,
            ContainerFormat::Aac => FileType::Aac,
            ContainerFormat::Flac => FileType::Flac,
            ContainerFormat::Mp4 => FileType::Mp4,
            ContainerFormat::Vorbis => FileType::Vorbis,
            ContainerFormat::Opus => FileType::Opus,
            ContainerFormat::Speex => FileType::Speex,
            ContainerFormat::Wav => FileType::Wav,
            ContainerFormat::Aiff => FileType::Aiff,
            ContainerFormat::Ape => FileType::Ape,
            ContainerFormat::Musepack => FileType::Mpc,
            ContainerFormat::WavPack => FileType::WavPack,
        }
    }
}

enum Detected {
    Format(ContainerFormat),
    /// ID3v2 prefix; the real container starts at `offset`
    Id3 { offset: u64 },
}

fn text(tag: &Tag, key: &ItemKey) -> Option<String> {
    tag.get_string(key).map(|s| s.to_string())
}

impl DecodeMetadata for ContainerFormat {
    fn decode<R: Read + Seek>(&self, reader: R) -> std::result::Result<RawTags, String> {
        let tagged_file = Probe::with_file_type(reader, self.file_type())
            .read()
            .map_err(|e| e.to_string())?;

        let duration = tagged_file.properties().duration().as_secs_f64();
        let mut raw = RawTags {
            duration: (duration > 0.0).then_some(duration),
            ..RawTags::default()
        };

        // Get the primary tag, or fall back to the first available tag
        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            return Ok(raw);
        };

        raw.title = tag.title().map(|s| s.to_string());
        raw.artist = tag.artist().map(|s| s.to_string());
        raw.album = tag.album().map(|s| s.to_string());
        raw.genre = tag.genre().map(|s| s.to_string());
        raw.album_artist = text(tag, &ItemKey::AlbumArtist);
        raw.year = text(tag, &ItemKey::RecordingDate).or_else(|| tag.year().map(|y| y.to_string()));
        raw.track = text(tag, &ItemKey::TrackNumber).or_else(|| tag.track().map(|n| n.to_string()));
        raw.disc = text(tag, &ItemKey::DiscNumber).or_else(|| tag.disk().map(|n| n.to_string()));
        raw.mb_release_id = text(tag, &ItemKey::MusicBrainzReleaseId);
        raw.mb_recording_id = text(tag, &ItemKey::MusicBrainzRecordingId);

        Ok(raw)
    }
}

/// Sniff and decode one audio file.
///
/// An unknown signature or a decoder failure is a [`Error::Parse`].
pub fn read_tags(path: &Path) -> Result<(ContainerFormat, RawTags)> {
    let file = File::open(path).map_err(|e| Error::parse(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    let format = ContainerFormat::sniff(&mut reader)
        .map_err(|e| Error::parse(path, e.to_string()))?
        .ok_or_else(|| Error::parse(path, "unrecognised container signature"))?;

    let raw = format
        .decode(reader)
        .map_err(|message| Error::parse(path, message))?;
    Ok((format, raw))
}
