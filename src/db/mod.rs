//! Database module for catalog persistence.
//!
//! Uses SQLx with SQLite for lightweight, embedded database storage.
//! This module owns the connection setup and the read side of the catalog:
//! - Folder, media file, album and artist listings
//! - Folder-scoped paging queries used by browsing views
//! - Scan metadata (`last_scan`)
//!
//! The write side lives in [`store`], behind the [`store::CatalogStore`]
//! and [`store::CatalogTransaction`] traits.
//!
//! # Example
//!
//! ```ignore
//! use music_catalog::db::{init_db, get_artists};
//!
//! let pool = init_db("sqlite:music_catalog.db").await?;
//! let artists = get_artists(&pool, 0, 20, &[1, 2]).await?;
//! ```

pub mod store;

pub use store::{CatalogStore, CatalogTransaction, ExistingEntry, SqliteCatalog};

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

use crate::model::{Album, Artist, FolderType, MediaFile, MusicFolder};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "music_catalog.db";

/// `scan_meta` key holding the time of the last committed scan.
pub const LAST_SCAN_KEY: &str = "last_scan";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist and opens it in WAL mode,
/// so readers keep seeing the last committed catalog while a scan holds
/// the write transaction.
///
/// # Errors
///
/// Returns an error if:
/// - The URL is malformed
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> crate::error::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::debug!(target: "db", url = db_url, "Database ready");
    Ok(pool)
}

// ============================================================================
// Database Row Types
// ============================================================================

/// Database row for the `music_folder` table.
#[derive(Debug, sqlx::FromRow)]
struct MusicFolderRow {
    id: i64,
    path: String,
    name: String,
    folder_type: String,
    enabled: bool,
    last_scanned: Option<String>,
}

impl From<MusicFolderRow> for MusicFolder {
    fn from(row: MusicFolderRow) -> Self {
        MusicFolder {
            id: row.id,
            path: row.path.into(),
            name: row.name,
            folder_type: row.folder_type.parse().unwrap_or(FolderType::Media),
            enabled: row.enabled,
            last_scanned: row.last_scanned.as_deref().and_then(parse_timestamp),
        }
    }
}

/// Database row for the `media_file` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MediaFileRow {
    id: i64,
    folder_id: i64,
    relative_path: String,
    parent_path: String,
    title: Option<String>,
    artist: Option<String>,
    album_artist: Option<String>,
    album_name: Option<String>,
    genre: Option<String>,
    year: Option<i32>,
    track_number: Option<i32>,
    disc_number: Option<i32>,
    format: String,
    media_type: String,
    duration: Option<f64>,
    file_size: i64,
    start_position: f64,
    index_path: Option<String>,
    mb_release_id: Option<String>,
    mb_recording_id: Option<String>,
    last_modified: i64,
    content_hash: Option<String>,
    present: bool,
}

impl From<MediaFileRow> for MediaFile {
    fn from(row: MediaFileRow) -> Self {
        MediaFile {
            id: row.id,
            folder_id: row.folder_id,
            relative_path: row.relative_path,
            parent_path: row.parent_path,
            title: row.title,
            artist: row.artist,
            album_artist: row.album_artist,
            album_name: row.album_name,
            genre: row.genre,
            year: row.year,
            track_number: row.track_number,
            disc_number: row.disc_number,
            format: row.format,
            media_type: row
                .media_type
                .parse()
                .unwrap_or(crate::model::MediaType::Music),
            duration: row.duration,
            file_size: row.file_size,
            start_position: row.start_position,
            index_path: row.index_path,
            mb_release_id: row.mb_release_id,
            mb_recording_id: row.mb_recording_id,
            last_modified: row.last_modified,
            content_hash: row.content_hash,
            present: row.present,
        }
    }
}

/// Database row for the `album` table.
#[derive(Debug, sqlx::FromRow)]
struct AlbumRow {
    id: i64,
    name: String,
    artist: String,
    path: String,
    folder_id: i64,
    song_count: i64,
    duration: f64,
    year: Option<i32>,
    genre: Option<String>,
    mb_release_id: Option<String>,
}

impl AlbumRow {
    fn into_album(self, folder_ids: Vec<i64>) -> Album {
        Album {
            id: self.id,
            name: self.name,
            artist: self.artist,
            path: self.path,
            folder_id: self.folder_id,
            folder_ids,
            song_count: self.song_count,
            duration: self.duration,
            year: self.year,
            genre: self.genre,
            mb_release_id: self.mb_release_id,
        }
    }
}

/// Database row for the `artist` table.
#[derive(Debug, sqlx::FromRow)]
struct ArtistRow {
    id: i64,
    name: String,
    album_count: i64,
    song_count: i64,
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) const MEDIA_FILE_COLUMNS: &str = "id, folder_id, relative_path, parent_path, title, \
     artist, album_artist, album_name, genre, year, track_number, disc_number, format, \
     media_type, duration, file_size, start_position, index_path, mb_release_id, \
     mb_recording_id, last_modified, content_hash, present";

const ALBUM_COLUMNS: &str =
    "id, name, artist, path, folder_id, song_count, duration, year, genre, mb_release_id";

/// Append `column IN (?, ?, ...)` with one bind per value.
fn push_in_list(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, values: &[i64]) {
    qb.push(column);
    qb.push(" IN (");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(*value);
    }
    separated.push_unseparated(")");
}

// ============================================================================
// Folders and scan metadata
// ============================================================================

/// Get all persisted music folders, ordered by id.
pub async fn get_music_folders(pool: &SqlitePool) -> sqlx::Result<Vec<MusicFolder>> {
    let rows = sqlx::query_as::<_, MusicFolderRow>(
        "SELECT id, path, name, folder_type, enabled, last_scanned FROM music_folder ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(MusicFolder::from).collect())
}

/// Time of the last committed scan, `None` if no scan ever committed.
pub async fn get_last_scan(pool: &SqlitePool) -> sqlx::Result<Option<DateTime<Utc>>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM scan_meta WHERE key = ?")
        .bind(LAST_SCAN_KEY)
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|(value,)| parse_timestamp(&value)))
}

// ============================================================================
// Full listings (index builds)
// ============================================================================

/// Get every media file, ordered by id.
pub async fn get_all_media_files(pool: &SqlitePool) -> sqlx::Result<Vec<MediaFile>> {
    let sql = format!("SELECT {MEDIA_FILE_COLUMNS} FROM media_file ORDER BY id");
    let rows = sqlx::query_as::<_, MediaFileRow>(&sql).fetch_all(pool).await?;
    Ok(rows.into_iter().map(MediaFile::from).collect())
}

/// Get every album, ordered by id.
pub async fn get_all_albums(pool: &SqlitePool) -> sqlx::Result<Vec<Album>> {
    let sql = format!("SELECT {ALBUM_COLUMNS} FROM album ORDER BY id");
    let rows = sqlx::query_as::<_, AlbumRow>(&sql).fetch_all(pool).await?;
    attach_album_folders(pool, rows).await
}

/// Get every artist with its folder set, ordered by id.
pub async fn get_all_artists(pool: &SqlitePool) -> sqlx::Result<Vec<Artist>> {
    let rows = sqlx::query_as::<_, ArtistRow>(
        "SELECT id, name, album_count, song_count FROM artist ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    attach_artist_folders(pool, rows).await
}

/// Folder ids per owner from a link table (`album_folder`, `artist_folder`).
async fn folder_links(
    pool: &SqlitePool,
    table: &str,
    owner: &str,
    ids: &[i64],
) -> sqlx::Result<HashMap<i64, Vec<i64>>> {
    let mut folders: HashMap<i64, Vec<i64>> = HashMap::new();
    if ids.is_empty() {
        return Ok(folders);
    }

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {owner}, folder_id FROM {table} WHERE "));
    push_in_list(&mut qb, owner, ids);
    qb.push(format!(" ORDER BY {owner}, folder_id"));
    let links: Vec<(i64, i64)> = qb.build_query_as().fetch_all(pool).await?;

    for (owner_id, folder_id) in links {
        folders.entry(owner_id).or_default().push(folder_id);
    }
    Ok(folders)
}

async fn attach_album_folders(pool: &SqlitePool, rows: Vec<AlbumRow>) -> sqlx::Result<Vec<Album>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut folders = folder_links(pool, "album_folder", "album_id", &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let folder_ids = folders.remove(&row.id).unwrap_or_default();
            row.into_album(folder_ids)
        })
        .collect())
}

async fn attach_artist_folders(
    pool: &SqlitePool,
    rows: Vec<ArtistRow>,
) -> sqlx::Result<Vec<Artist>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut folders = folder_links(pool, "artist_folder", "artist_id", &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| Artist {
            folder_ids: folders.remove(&row.id).unwrap_or_default(),
            id: row.id,
            name: row.name,
            album_count: row.album_count,
            song_count: row.song_count,
        })
        .collect())
}

// ============================================================================
// Lookups by id (result rendering)
// ============================================================================

/// Get media files by id, in the order of `ids`. Unknown ids are skipped.
pub async fn get_media_files_by_ids(pool: &SqlitePool, ids: &[i64]) -> sqlx::Result<Vec<MediaFile>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {MEDIA_FILE_COLUMNS} FROM media_file WHERE "));
    push_in_list(&mut qb, "id", ids);
    let rows: Vec<MediaFileRow> = qb.build_query_as().fetch_all(pool).await?;
    Ok(reorder(ids, rows.into_iter().map(MediaFile::from), |f| f.id))
}

/// Get albums by id, in the order of `ids`. Unknown ids are skipped.
pub async fn get_albums_by_ids(pool: &SqlitePool, ids: &[i64]) -> sqlx::Result<Vec<Album>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {ALBUM_COLUMNS} FROM album WHERE "));
    push_in_list(&mut qb, "id", ids);
    let rows: Vec<AlbumRow> = qb.build_query_as().fetch_all(pool).await?;
    let albums = attach_album_folders(pool, rows).await?;
    Ok(reorder(ids, albums, |a| a.id))
}

/// Get artists by id, in the order of `ids`. Unknown ids are skipped.
pub async fn get_artists_by_ids(pool: &SqlitePool, ids: &[i64]) -> sqlx::Result<Vec<Artist>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb =
        QueryBuilder::<Sqlite>::new("SELECT id, name, album_count, song_count FROM artist WHERE ");
    push_in_list(&mut qb, "id", ids);
    let rows: Vec<ArtistRow> = qb.build_query_as().fetch_all(pool).await?;
    let artists = attach_artist_folders(pool, rows).await?;
    Ok(reorder(ids, artists, |a| a.id))
}

fn reorder<T>(ids: &[i64], items: impl IntoIterator<Item = T>, key: impl Fn(&T) -> i64) -> Vec<T> {
    let mut by_id: HashMap<i64, T> = items.into_iter().map(|item| (key(&item), item)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

// ============================================================================
// Browsing views
// ============================================================================

/// List the entries under `parent_path` in one folder.
///
/// Non-recursive listings return the direct children only; recursive
/// listings include every descendant. Ordered by path, then start position.
pub async fn list_children(
    pool: &SqlitePool,
    parent_path: &str,
    folder_id: i64,
    recursive: bool,
) -> sqlx::Result<Vec<MediaFile>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {MEDIA_FILE_COLUMNS} FROM media_file WHERE folder_id = "
    ));
    qb.push_bind(folder_id);

    if !recursive {
        qb.push(" AND parent_path = ").push_bind(parent_path.to_string());
    } else if !parent_path.is_empty() {
        qb.push(" AND (parent_path = ")
            .push_bind(parent_path.to_string())
            .push(" OR parent_path LIKE ")
            .push_bind(format!("{}/%", escape_like(parent_path)))
            .push(" ESCAPE '\\')");
    }
    qb.push(" ORDER BY parent_path, relative_path, start_position");

    let rows: Vec<MediaFileRow> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().map(MediaFile::from).collect())
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Page through the artists having songs in any of `folders`, by name.
pub async fn get_artists(
    pool: &SqlitePool,
    offset: i64,
    count: i64,
    folders: &[i64],
) -> sqlx::Result<Vec<Artist>> {
    if folders.is_empty() || count <= 0 {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, name, album_count, song_count FROM artist \
         WHERE id IN (SELECT artist_id FROM artist_folder WHERE ",
    );
    push_in_list(&mut qb, "folder_id", folders);
    qb.push(") ORDER BY name COLLATE NOCASE, id LIMIT ")
        .push_bind(count)
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows: Vec<ArtistRow> = qb.build_query_as().fetch_all(pool).await?;
    attach_artist_folders(pool, rows).await
}

/// Page through the albums of `folders`.
///
/// `by_year` orders by year (unknown years last) then name, `alphabetical`
/// by name, and with neither flag albums come in creation order.
pub async fn get_albums(
    pool: &SqlitePool,
    offset: i64,
    count: i64,
    alphabetical: bool,
    by_year: bool,
    folders: &[i64],
) -> sqlx::Result<Vec<Album>> {
    if folders.is_empty() || count <= 0 {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {ALBUM_COLUMNS} FROM album \
         WHERE id IN (SELECT album_id FROM album_folder WHERE "
    ));
    push_in_list(&mut qb, "folder_id", folders);
    qb.push(")");
    qb.push(match (by_year, alphabetical) {
        (true, _) => " ORDER BY year IS NULL, year, name COLLATE NOCASE, id",
        (false, true) => " ORDER BY name COLLATE NOCASE, id",
        (false, false) => " ORDER BY id",
    });
    qb.push(" LIMIT ")
        .push_bind(count)
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows: Vec<AlbumRow> = qb.build_query_as().fetch_all(pool).await?;
    attach_album_folders(pool, rows).await
}

/// Page through the songs of `folders` whose genre equals `genre` exactly.
pub async fn get_songs_by_genre(
    pool: &SqlitePool,
    genre: &str,
    offset: i64,
    count: i64,
    folders: &[i64],
) -> sqlx::Result<Vec<MediaFile>> {
    if folders.is_empty() || count <= 0 {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {MEDIA_FILE_COLUMNS} FROM media_file WHERE index_path IS NULL AND genre = "
    ));
    qb.push_bind(genre.to_string()).push(" AND ");
    push_in_list(&mut qb, "folder_id", folders);
    qb.push(" ORDER BY id LIMIT ")
        .push_bind(count)
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows: Vec<MediaFileRow> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().map(MediaFile::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_media_file, temp_db};

    async fn seed(pool: &SqlitePool) -> Vec<i64> {
        let catalog = SqliteCatalog::new(pool.clone());
        let mut tx = catalog.begin().await.unwrap();
        tx.sync_folder(&MusicFolder::new(1, "/music/a", "A")).await.unwrap();
        tx.sync_folder(&MusicFolder::new(2, "/music/b", "B")).await.unwrap();

        let mut ids = Vec::new();
        for (folder, path, artist, album, genre, year) in [
            (1, "Rock/x/01.mp3", "Xeno", "Zenith", "Rock", Some(1999)),
            (1, "Rock/x/02.mp3", "Xeno", "Zenith", "Rock", Some(1999)),
            (1, "Jazz/y.mp3", "Yale", "Alpha", "Jazz", None),
            (2, "z.mp3", "Zed", "Middle", "Rock", Some(1970)),
        ] {
            let mut file = mock_media_file(folder, path);
            file.artist = Some(artist.into());
            file.album_name = Some(album.into());
            file.genre = Some(genre.into());
            file.year = year;
            ids.push(tx.create_or_update(&file).await.unwrap());
        }
        tx.refresh_aggregates().await.unwrap();
        tx.commit(Utc::now(), &[1, 2]).await.unwrap();
        ids
    }

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(&db_url(Some(&db_path))).await.expect("Failed to init db");
        assert!(db_path.exists());

        assert!(get_all_media_files(&pool).await.unwrap().is_empty());
        assert!(get_last_scan(&pool).await.unwrap().is_none());
    }

    #[test]
    fn test_db_url() {
        assert_eq!(db_url(None), "sqlite:music_catalog.db");
        assert_eq!(
            db_url(Some(std::path::Path::new("/tmp/x.db"))),
            "sqlite:/tmp/x.db"
        );
    }

    #[tokio::test]
    async fn test_list_children_recursive_and_flat() {
        let (pool, _dir) = temp_db().await;
        seed(&pool).await;

        let root = list_children(&pool, "", 1, false).await.unwrap();
        assert!(root.is_empty());

        let rock = list_children(&pool, "Rock", 1, true).await.unwrap();
        assert_eq!(rock.len(), 2);
        assert_eq!(rock[0].relative_path, "Rock/x/01.mp3");

        let everything = list_children(&pool, "", 1, true).await.unwrap();
        assert_eq!(everything.len(), 3);

        let direct = list_children(&pool, "Rock/x", 1, false).await.unwrap();
        assert_eq!(direct.len(), 2);
    }

    #[tokio::test]
    async fn test_browsing_respects_folders() {
        let (pool, _dir) = temp_db().await;
        seed(&pool).await;

        let artists = get_artists(&pool, 0, 10, &[1]).await.unwrap();
        let names: Vec<&str> = artists.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Xeno", "Yale"]);
        assert_eq!(artists[0].folder_ids, vec![1]);

        let both = get_artists(&pool, 1, 10, &[1, 2]).await.unwrap();
        assert_eq!(both.len(), 2);
        assert!(get_artists(&pool, 0, 10, &[]).await.unwrap().is_empty());

        let rock = get_songs_by_genre(&pool, "Rock", 0, 10, &[1]).await.unwrap();
        assert_eq!(rock.len(), 2);
        let rock_all = get_songs_by_genre(&pool, "Rock", 0, 10, &[1, 2]).await.unwrap();
        assert_eq!(rock_all.len(), 3);
        assert!(get_songs_by_genre(&pool, "rock", 0, 10, &[1, 2]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_album_orderings() {
        let (pool, _dir) = temp_db().await;
        seed(&pool).await;

        let alpha = get_albums(&pool, 0, 10, true, false, &[1, 2]).await.unwrap();
        let names: Vec<&str> = alpha.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Middle", "Zenith"]);

        let by_year = get_albums(&pool, 0, 10, false, true, &[1, 2]).await.unwrap();
        let names: Vec<&str> = by_year.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Middle", "Zenith", "Alpha"]);

        let paged = get_albums(&pool, 1, 1, true, false, &[1, 2]).await.unwrap();
        assert_eq!(paged[0].name, "Middle");
    }

    #[tokio::test]
    async fn test_lookup_by_ids_keeps_order() {
        let (pool, _dir) = temp_db().await;
        let ids = seed(&pool).await;

        let wanted = vec![ids[2], 9999, ids[0]];
        let files = get_media_files_by_ids(&pool, &wanted).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, ids[2]);
        assert_eq!(files[1].id, ids[0]);
    }
}
