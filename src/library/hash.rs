//! Content hashing for change detection.
//!
//! Large audio files are hashed partially: the size plus the first and last
//! megabyte. An associated cue sheet is hashed in full on top of that, so an
//! edited cue re-extracts the file even when the audio is untouched.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK_SIZE: u64 = 1024 * 1024;

/// Partial SHA-256 of an audio file combined with its cue sheet, as a
/// lowercase hex string.
pub fn compute_content_hash(audio: &Path, cue: Option<&Path>) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    update_partial(&mut hasher, audio)?;
    if let Some(cue) = cue {
        hasher.update(b"cue");
        hasher.update(std::fs::read(cue)?);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn update_partial(hasher: &mut Sha256, path: &Path) -> std::io::Result<()> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    hasher.update(file_size.to_le_bytes());

    if file_size <= CHUNK_SIZE * 2 {
        let mut buffer = Vec::with_capacity(file_size as usize);
        file.read_to_end(&mut buffer)?;
        hasher.update(&buffer);
    } else {
        let mut buffer = vec![0u8; CHUNK_SIZE as usize];
        file.read_exact(&mut buffer)?;
        hasher.update(&buffer);

        file.seek(SeekFrom::End(-(CHUNK_SIZE as i64)))?;
        file.read_exact(&mut buffer)?;
        hasher.update(&buffer);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_same_content_same_hash() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        std::fs::write(&a, b"Hello, world!").unwrap();
        std::fs::write(&b, b"Hello, world!").unwrap();

        let hash = compute_content_hash(&a, None).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_content_hash(&b, None).unwrap());

        std::fs::write(&b, b"Hello, World!").unwrap();
        assert_ne!(hash, compute_content_hash(&b, None).unwrap());
    }

    #[test]
    fn test_large_file_middle_is_sampled_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.flac");
        let mut data = vec![7u8; (CHUNK_SIZE * 3) as usize];
        std::fs::write(&path, &data).unwrap();
        let before = compute_content_hash(&path, None).unwrap();

        data[(CHUNK_SIZE + 10) as usize] = 8;
        std::fs::write(&path, &data).unwrap();
        assert_eq!(before, compute_content_hash(&path, None).unwrap());

        data[0] = 9;
        std::fs::write(&path, &data).unwrap();
        assert_ne!(before, compute_content_hash(&path, None).unwrap());
    }

    #[test]
    fn test_cue_changes_content_hash() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("album.wav");
        let cue = dir.path().join("album.cue");
        std::fs::write(&audio, b"RIFF").unwrap();
        std::fs::write(&cue, "TRACK 01 AUDIO").unwrap();

        let plain = compute_content_hash(&audio, None).unwrap();

        let with_cue = compute_content_hash(&audio, Some(&cue)).unwrap();
        assert_ne!(plain, with_cue);

        std::fs::write(&cue, "TRACK 02 AUDIO").unwrap();
        assert_ne!(with_cue, compute_content_hash(&audio, Some(&cue)).unwrap());
    }
}
