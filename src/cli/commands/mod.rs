//! CLI command definitions and dispatch.
//!
//! Each group of subcommands lives in its own submodule:
//! - `scan`: scanning, scan status and folder configuration
//! - `search`: index queries and random sampling
//! - `browse`: catalog listings

mod browse;
mod scan;
mod search;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::runtime::Runtime;

use music_catalog::config::{self, Config};
use music_catalog::db::{self, SqliteCatalog};
use music_catalog::model::{Album, Artist, FolderType, MediaFile, MusicFolder};
use music_catalog::search::{IndexType, NameField, SearchEngine};

pub use browse::{cmd_albums, cmd_artists, cmd_children, cmd_genre};
pub use scan::{cmd_add_folder, cmd_folders, cmd_scan, cmd_status};
pub use search::{cmd_random_albums, cmd_random_songs, cmd_search, cmd_search_by_name};

/// Music Catalog CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the OS config directory)
    #[arg(long, global = true, env = "MUSIC_CATALOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding the configured one
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan every configured folder (Ctrl+C cancels without committing)
    Scan,
    /// Show whether the catalog was ever scanned and what it holds
    Status,
    /// List configured music folders
    Folders,
    /// Add a music folder to the configuration file
    AddFolder {
        /// Folder root
        path: PathBuf,
        /// Folder id (defaults to one past the highest configured id)
        #[arg(long)]
        id: Option<i64>,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Folder type: media or podcast
        #[arg(long = "type", default_value = "media")]
        folder_type: FolderType,
    },
    /// Ranked search (artist, artist-id3, album, album-id3, song)
    Search {
        index_type: IndexType,
        query: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        count: Option<usize>,
        /// Restrict to these folder ids (default: all configured folders)
        #[arg(long = "folder")]
        folders: Vec<i64>,
    },
    /// Raw match on one field (artist, album, title)
    SearchByName { field: NameField, text: String },
    /// Random songs
    RandomSongs {
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Exact genre
        #[arg(long)]
        genre: Option<String>,
        #[arg(long)]
        from_year: Option<i32>,
        #[arg(long)]
        to_year: Option<i32>,
        #[arg(long = "folder")]
        folders: Vec<i64>,
    },
    /// Random albums
    RandomAlbums {
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Scope by folder id instead of folder path
        #[arg(long)]
        id3: bool,
        #[arg(long = "folder")]
        folders: Vec<i64>,
    },
    /// List artists by name
    Artists {
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        count: Option<i64>,
        #[arg(long = "folder")]
        folders: Vec<i64>,
    },
    /// List albums
    Albums {
        #[arg(long)]
        alphabetical: bool,
        #[arg(long)]
        by_year: bool,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        count: Option<i64>,
        #[arg(long = "folder")]
        folders: Vec<i64>,
    },
    /// List songs of one genre
    Genre {
        genre: String,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        count: Option<i64>,
        #[arg(long = "folder")]
        folders: Vec<i64>,
    },
    /// List entries under a directory of a folder
    Children {
        folder_id: i64,
        /// Directory relative to the folder root
        #[arg(default_value = "")]
        parent: String,
        #[arg(short, long)]
        recursive: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    // Folder edits touch only the config file
    if let Commands::AddFolder {
        path,
        id,
        name,
        folder_type,
    } = &cli.command
    {
        return cmd_add_folder(cli.config.as_deref(), path, *id, name.clone(), *folder_type);
    }

    let rt = Runtime::new()?;
    let app = rt.block_on(App::open(cli))?;

    match &cli.command {
        Commands::Scan => cmd_scan(&rt, &app),
        Commands::Status => cmd_status(&rt, &app),
        Commands::Folders => cmd_folders(&rt, &app),
        Commands::AddFolder { .. } => unreachable!("handled before opening the catalog"),
        Commands::Search {
            index_type,
            query,
            offset,
            count,
            folders,
        } => cmd_search(&rt, &app, *index_type, query, *offset, *count, folders),
        Commands::SearchByName { field, text } => cmd_search_by_name(&rt, &app, *field, text),
        Commands::RandomSongs {
            count,
            genre,
            from_year,
            to_year,
            folders,
        } => cmd_random_songs(&rt, &app, *count, genre.clone(), *from_year, *to_year, folders),
        Commands::RandomAlbums { count, id3, folders } => {
            cmd_random_albums(&rt, &app, *count, *id3, folders)
        }
        Commands::Artists {
            offset,
            count,
            folders,
        } => cmd_artists(&rt, &app, *offset, *count, folders),
        Commands::Albums {
            alphabetical,
            by_year,
            offset,
            count,
            folders,
        } => cmd_albums(&rt, &app, *alphabetical, *by_year, *offset, *count, folders),
        Commands::Genre {
            genre,
            offset,
            count,
            folders,
        } => cmd_genre(&rt, &app, genre, *offset, *count, folders),
        Commands::Children {
            folder_id,
            parent,
            recursive,
        } => cmd_children(&rt, &app, *folder_id, parent, *recursive),
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Configuration and catalog shared by the commands.
pub(crate) struct App {
    pub config: Config,
    pub catalog: Arc<SqliteCatalog>,
    pub json: bool,
}

impl App {
    async fn open(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = load_config(cli.config.as_deref())?;
        if let Some(db) = &cli.db {
            config.database.path = db.clone();
        }
        config.validate()?;

        let pool = db::init_db(&db::db_url(Some(&config.database.path))).await?;
        Ok(Self {
            config,
            catalog: Arc::new(SqliteCatalog::new(pool)),
            json: cli.json,
        })
    }

    /// A search engine serving the committed catalog.
    pub async fn search_engine(&self) -> anyhow::Result<SearchEngine> {
        let engine = SearchEngine::new();
        engine.rebuild(self.catalog.as_ref()).await?;
        Ok(engine)
    }

    /// The configured folders named by `ids`, or all of them.
    pub fn folders(&self, ids: &[i64]) -> anyhow::Result<Vec<MusicFolder>> {
        let all = self.config.music_folders();
        if ids.is_empty() {
            return Ok(all);
        }
        ids.iter()
            .map(|id| {
                all.iter()
                    .find(|f| f.id == *id)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("No music folder with id {id}"))
            })
            .collect()
    }

    pub fn folder_ids(&self, ids: &[i64]) -> anyhow::Result<Vec<i64>> {
        Ok(self.folders(ids)?.iter().map(|f| f.id).collect())
    }

    pub fn page_size(&self, count: Option<i64>) -> i64 {
        count.unwrap_or(self.config.search.default_count as i64)
    }

    /// Print `value` as JSON, or through `text` otherwise.
    pub fn print<T: Serialize + ?Sized>(&self, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }
}

pub(crate) fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => config::load_from(path)?,
        None => config::load()?,
    };
    Ok(config)
}

pub(crate) fn song_line(song: &MediaFile) -> String {
    let position = if song.is_sub_track() {
        format!(" @{:.2}s", song.start_position)
    } else {
        String::new()
    };
    format!(
        "{:>6}  {} - {}  [{}]{}",
        song.id,
        song.artist.as_deref().unwrap_or("Unknown Artist"),
        song.title.as_deref().unwrap_or(&song.relative_path),
        song.album_name.as_deref().unwrap_or("-"),
        position
    )
}

pub(crate) fn album_line(album: &Album) -> String {
    let year = album.year.map(|y| format!(" ({y})")).unwrap_or_default();
    format!(
        "{:>6}  {} - {}{}  {} songs",
        album.id,
        if album.artist.is_empty() { "Unknown Artist" } else { &album.artist },
        album.name,
        year,
        album.song_count
    )
}

pub(crate) fn artist_line(artist: &Artist) -> String {
    format!(
        "{:>6}  {}  {} albums, {} songs",
        artist.id, artist.name, artist.album_count, artist.song_count
    )
}
