//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\music-catalog\config.toml
//! - macOS: ~/Library/Application Support/music-catalog/config.toml
//! - Linux: ~/.config/music-catalog/config.toml
//!
//! The configuration owns the list of music folders and the cue indexing
//! flag; both are read once per scan and never changed while it runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::{FolderType, MusicFolder};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database settings
    pub database: DatabaseConfig,

    /// Library settings
    pub library: LibraryConfig,

    /// Search settings
    pub search: SearchConfig,
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(crate::db::DEFAULT_DB_NAME),
        }
    }
}

/// Library management settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Music folders, scanned in id order
    pub folders: Vec<FolderConfig>,

    /// Expand cue sheets into sub-tracks
    pub enable_cue_indexing: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            enable_cue_indexing: true,
        }
    }
}

/// One configured music folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    pub id: i64,
    pub path: PathBuf,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub folder_type: FolderType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Page size used when a caller does not ask for one
    pub default_count: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_count: 20 }
    }
}

impl Config {
    /// Configured folders as [`MusicFolder`]s, ordered by id.
    ///
    /// Folders without a name are named after the last path component.
    pub fn music_folders(&self) -> Vec<MusicFolder> {
        let mut folders: Vec<MusicFolder> = self
            .library
            .folders
            .iter()
            .map(|f| MusicFolder {
                id: f.id,
                path: f.path.clone(),
                name: f.name.clone().unwrap_or_else(|| {
                    f.path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| f.path.display().to_string())
                }),
                folder_type: f.folder_type,
                enabled: f.enabled,
                last_scanned: None,
            })
            .collect();
        folders.sort_by_key(|f| f.id);
        folders
    }

    /// Reject duplicate folder ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids: Vec<i64> = self.library.folders.iter().map(|f| f.id).collect();
        ids.sort_unstable();
        if let Some(w) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::DuplicateFolderId(w[0]));
        }
        Ok(())
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("music-catalog"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location.
///
/// A missing file yields the defaults.
pub fn load() -> Result<Config, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    load_from(&path)
}

/// Load configuration from a specific file.
///
/// Only a missing file falls back to the defaults. A file that exists but
/// cannot be read or parsed is an error.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::info!(target: "config", "No config file found at {:?}, using defaults", path);
        return Ok(Config::default());
    }

    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let config = toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
    tracing::info!(target: "config", "Loaded config from {:?}", path);
    Ok(config)
}

/// Save configuration to a specific file.
///
/// Creates the parent directory if it doesn't exist.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!(target: "config", "Saved config to {:?}", path);
    Ok(())
}

/// Save configuration to the default location.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("Duplicate music folder id {0}")]
    DuplicateFolderId(i64),
}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        crate::error::Error::config(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[database]"));
        assert!(toml.contains("[library]"));
        assert!(toml.contains("[search]"));
    }

    #[test]
    fn test_folders_parse_with_defaults() {
        let toml = r#"
[library]
enable_cue_indexing = false

[[library.folders]]
id = 20
path = "/var/music2"
type = "podcast"

[[library.folders]]
id = 10
path = "/var/music1"
name = "Music"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(!config.library.enable_cue_indexing);

        let folders = config.music_folders();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0].id, 10);
        assert_eq!(folders[0].name, "Music");
        assert_eq!(folders[0].folder_type, FolderType::Media);
        assert!(folders[0].enabled);
        assert_eq!(folders[1].name, "music2");
        assert_eq!(folders[1].folder_type, FolderType::Podcast);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[search]\ndefault_count = 5\n").unwrap();
        assert_eq!(config.search.default_count, 5);
        assert!(config.library.enable_cue_indexing);
        assert!(config.library.folders.is_empty());
    }

    #[test]
    fn test_duplicate_folder_ids_rejected() {
        let mut config = Config::default();
        for path in ["/a", "/b"] {
            config.library.folders.push(FolderConfig {
                id: 1,
                path: PathBuf::from(path),
                name: None,
                folder_type: FolderType::Media,
                enabled: true,
            });
        }
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateFolderId(1))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.library.folders.push(FolderConfig {
            id: 3,
            path: PathBuf::from("/music"),
            name: Some("Main".into()),
            folder_type: FolderType::Media,
            enabled: false,
        });
        save_to(&config, &path).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.library.folders.len(), 1);
        assert!(!loaded.library.folders[0].enabled);
        assert_eq!(loaded.music_folders()[0].name, "Main");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.search.default_count, 20);
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[library.folders]\nid = 1\n").unwrap();

        assert!(matches!(load_from(&path), Err(ConfigError::Parse(..))));
    }
}
