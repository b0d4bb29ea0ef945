//! Catalog persistence traits and their SQLite implementation.
//!
//! A scan talks to the catalog through one [`CatalogTransaction`]: every
//! mutation of the scan goes into it and becomes visible only on
//! [`CatalogTransaction::commit`]. Dropping the transaction rolls it back.
//!
//! Liveness is tracked with the `present` column: [`clear_present`] resets
//! it for every row of the folder, each entry seen by the walk sets it again,
//! and [`delete_paths_not_in`] removes the rows still unmarked.
//!
//! [`clear_present`]: CatalogTransaction::clear_present
//! [`delete_paths_not_in`]: CatalogTransaction::delete_paths_not_in

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use tracing::debug;

use super::LAST_SCAN_KEY;
use crate::error::{Result, ResultExt};
use crate::model::{Album, Artist, MediaFile, MusicFolder};

/// Stored state of one catalog row, used for change detection.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ExistingEntry {
    pub id: i64,
    pub start_position: f64,
    pub last_modified: i64,
    pub content_hash: Option<String>,
    pub index_path: Option<String>,
}

/// Read access to the committed catalog and the entry point for writes.
///
/// Implement this trait to substitute the storage in tests.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Open the single write transaction of a scan.
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>>;

    async fn music_folders(&self) -> Result<Vec<MusicFolder>>;

    async fn all_media_files(&self) -> Result<Vec<MediaFile>>;

    async fn all_albums(&self) -> Result<Vec<Album>>;

    async fn all_artists(&self) -> Result<Vec<Artist>>;

    async fn media_files_by_ids(&self, ids: &[i64]) -> Result<Vec<MediaFile>>;

    async fn albums_by_ids(&self, ids: &[i64]) -> Result<Vec<Album>>;

    async fn artists_by_ids(&self, ids: &[i64]) -> Result<Vec<Artist>>;

    async fn list_children(
        &self,
        parent_path: &str,
        folder_id: i64,
        recursive: bool,
    ) -> Result<Vec<MediaFile>>;

    async fn get_artists(&self, offset: i64, count: i64, folders: &[i64]) -> Result<Vec<Artist>>;

    async fn get_albums(
        &self,
        offset: i64,
        count: i64,
        alphabetical: bool,
        by_year: bool,
        folders: &[i64],
    ) -> Result<Vec<Album>>;

    async fn get_songs_by_genre(
        &self,
        genre: &str,
        offset: i64,
        count: i64,
        folders: &[i64],
    ) -> Result<Vec<MediaFile>>;

    /// Time of the last committed scan.
    async fn last_scanned(&self) -> Result<Option<DateTime<Utc>>>;

    /// True until one scan has ever committed.
    async fn never_scanned(&self) -> Result<bool> {
        Ok(self.last_scanned().await?.is_none())
    }
}

/// The pending mutations of one scan.
#[async_trait]
pub trait CatalogTransaction: Send {
    /// Upsert the folder row.
    async fn sync_folder(&mut self, folder: &MusicFolder) -> Result<()>;

    /// Clear the `present` flag of every entry of the folder before a walk.
    async fn clear_present(&mut self, folder_id: i64) -> Result<()>;

    /// Stored rows for one relative path (whole file and sub-tracks).
    async fn find_entries(
        &mut self,
        folder_id: i64,
        relative_path: &str,
    ) -> Result<Vec<ExistingEntry>>;

    /// Insert or update one entry, keyed by folder, path and start position.
    /// The entry is marked present. Returns its id.
    async fn create_or_update(&mut self, file: &MediaFile) -> Result<i64>;

    /// Mark unchanged entries as present.
    async fn mark_present(&mut self, ids: &[i64]) -> Result<()>;

    /// Mark entries present and record a new modification time.
    async fn touch(&mut self, ids: &[i64], last_modified: i64) -> Result<()>;

    /// Delete the entries of the folder not marked present since
    /// [`clear_present`](Self::clear_present). Returns the number deleted.
    async fn delete_paths_not_in(&mut self, folder_id: i64) -> Result<u64>;

    /// Delete folders (and their entries) missing from `folder_ids`.
    async fn delete_folders_not_in(&mut self, folder_ids: &[i64]) -> Result<u64>;

    /// Recompute albums and artists from the media files.
    async fn refresh_aggregates(&mut self) -> Result<()>;

    /// Record the scan time on `scanned_folders` and commit everything.
    async fn commit(
        self: Box<Self>,
        scanned_at: DateTime<Utc>,
        scanned_folders: &[i64],
    ) -> Result<()>;
}

/// [`CatalogStore`] backed by a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>> {
        let tx = self.pool.begin().await.with_context("opening scan transaction")?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn music_folders(&self) -> Result<Vec<MusicFolder>> {
        Ok(super::get_music_folders(&self.pool).await?)
    }

    async fn all_media_files(&self) -> Result<Vec<MediaFile>> {
        Ok(super::get_all_media_files(&self.pool).await?)
    }

    async fn all_albums(&self) -> Result<Vec<Album>> {
        Ok(super::get_all_albums(&self.pool).await?)
    }

    async fn all_artists(&self) -> Result<Vec<Artist>> {
        Ok(super::get_all_artists(&self.pool).await?)
    }

    async fn media_files_by_ids(&self, ids: &[i64]) -> Result<Vec<MediaFile>> {
        Ok(super::get_media_files_by_ids(&self.pool, ids).await?)
    }

    async fn albums_by_ids(&self, ids: &[i64]) -> Result<Vec<Album>> {
        Ok(super::get_albums_by_ids(&self.pool, ids).await?)
    }

    async fn artists_by_ids(&self, ids: &[i64]) -> Result<Vec<Artist>> {
        Ok(super::get_artists_by_ids(&self.pool, ids).await?)
    }

    async fn list_children(
        &self,
        parent_path: &str,
        folder_id: i64,
        recursive: bool,
    ) -> Result<Vec<MediaFile>> {
        Ok(super::list_children(&self.pool, parent_path, folder_id, recursive).await?)
    }

    async fn get_artists(&self, offset: i64, count: i64, folders: &[i64]) -> Result<Vec<Artist>> {
        Ok(super::get_artists(&self.pool, offset, count, folders).await?)
    }

    async fn get_albums(
        &self,
        offset: i64,
        count: i64,
        alphabetical: bool,
        by_year: bool,
        folders: &[i64],
    ) -> Result<Vec<Album>> {
        Ok(super::get_albums(&self.pool, offset, count, alphabetical, by_year, folders).await?)
    }

    async fn get_songs_by_genre(
        &self,
        genre: &str,
        offset: i64,
        count: i64,
        folders: &[i64],
    ) -> Result<Vec<MediaFile>> {
        Ok(super::get_songs_by_genre(&self.pool, genre, offset, count, folders).await?)
    }

    async fn last_scanned(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(super::get_last_scan(&self.pool).await?)
    }
}

/// Write transaction over the SQLite catalog.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

// ============================================================================
// Aggregate SQL
// ============================================================================

// Cue container rows (whole files carrying an index_path) are represented by
// their sub-tracks and never counted.

const UPSERT_ALBUMS: &str = r#"
    INSERT INTO album (name, artist, path, folder_id, song_count, duration, year, genre, mb_release_id)
    SELECT album_name,
           COALESCE(album_artist, artist, ''),
           MIN(parent_path),
           MIN(folder_id),
           COUNT(*),
           COALESCE(SUM(duration), 0),
           MIN(year),
           MAX(genre),
           MAX(mb_release_id)
    FROM media_file
    WHERE album_name IS NOT NULL AND index_path IS NULL
    GROUP BY album_name, COALESCE(album_artist, artist, '')
    ON CONFLICT(artist, name) DO UPDATE SET
        path = excluded.path,
        folder_id = excluded.folder_id,
        song_count = excluded.song_count,
        duration = excluded.duration,
        year = excluded.year,
        genre = excluded.genre,
        mb_release_id = excluded.mb_release_id
"#;

const DELETE_EMPTY_ALBUMS: &str = r#"
    DELETE FROM album
    WHERE NOT EXISTS (
        SELECT 1 FROM media_file m
        WHERE m.index_path IS NULL
          AND m.album_name = album.name
          AND COALESCE(m.album_artist, m.artist, '') = album.artist
    )
"#;

const REBUILD_ALBUM_FOLDERS: &str = r#"
    INSERT INTO album_folder (album_id, folder_id)
    SELECT DISTINCT a.id, m.folder_id
    FROM media_file m
    JOIN album a ON a.name = m.album_name
                AND a.artist = COALESCE(m.album_artist, m.artist, '')
    WHERE m.index_path IS NULL
"#;

const UPSERT_ARTISTS: &str = r#"
    INSERT INTO artist (name, album_count, song_count)
    SELECT COALESCE(album_artist, artist),
           COUNT(DISTINCT album_name),
           COUNT(*)
    FROM media_file
    WHERE COALESCE(album_artist, artist) IS NOT NULL AND index_path IS NULL
    GROUP BY COALESCE(album_artist, artist)
    ON CONFLICT(name) DO UPDATE SET
        album_count = excluded.album_count,
        song_count = excluded.song_count
"#;

const DELETE_EMPTY_ARTISTS: &str = r#"
    DELETE FROM artist
    WHERE NOT EXISTS (
        SELECT 1 FROM media_file m
        WHERE m.index_path IS NULL
          AND COALESCE(m.album_artist, m.artist) = artist.name
    )
"#;

const REBUILD_ARTIST_FOLDERS: &str = r#"
    INSERT INTO artist_folder (artist_id, folder_id)
    SELECT DISTINCT a.id, m.folder_id
    FROM media_file m
    JOIN artist a ON a.name = COALESCE(m.album_artist, m.artist)
    WHERE m.index_path IS NULL
"#;

#[async_trait]
impl CatalogTransaction for SqliteTransaction {
    async fn sync_folder(&mut self, folder: &MusicFolder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO music_folder (id, path, name, folder_type, enabled)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                name = excluded.name,
                folder_type = excluded.folder_type,
                enabled = excluded.enabled
            "#,
        )
        .bind(folder.id)
        .bind(folder.path_key())
        .bind(&folder.name)
        .bind(folder.folder_type.as_str())
        .bind(folder.enabled)
        .execute(&mut *self.tx)
        .await
        .with_context(format!("syncing folder {}", folder.id))?;
        Ok(())
    }

    async fn clear_present(&mut self, folder_id: i64) -> Result<()> {
        sqlx::query("UPDATE media_file SET present = 0 WHERE folder_id = ?")
            .bind(folder_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_entries(
        &mut self,
        folder_id: i64,
        relative_path: &str,
    ) -> Result<Vec<ExistingEntry>> {
        let entries = sqlx::query_as::<_, ExistingEntry>(
            r#"
            SELECT id, start_position, last_modified, content_hash, index_path
            FROM media_file
            WHERE folder_id = ? AND relative_path = ?
            ORDER BY start_position
            "#,
        )
        .bind(folder_id)
        .bind(relative_path)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(entries)
    }

    async fn create_or_update(&mut self, file: &MediaFile) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO media_file (
                folder_id, relative_path, parent_path, title, artist, album_artist,
                album_name, genre, year, track_number, disc_number, format, media_type,
                duration, file_size, start_position, index_path, mb_release_id,
                mb_recording_id, last_modified, content_hash, present
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(folder_id, relative_path, start_position) DO UPDATE SET
                parent_path = excluded.parent_path,
                title = excluded.title,
                artist = excluded.artist,
                album_artist = excluded.album_artist,
                album_name = excluded.album_name,
                genre = excluded.genre,
                year = excluded.year,
                track_number = excluded.track_number,
                disc_number = excluded.disc_number,
                format = excluded.format,
                media_type = excluded.media_type,
                duration = excluded.duration,
                file_size = excluded.file_size,
                index_path = excluded.index_path,
                mb_release_id = excluded.mb_release_id,
                mb_recording_id = excluded.mb_recording_id,
                last_modified = excluded.last_modified,
                content_hash = excluded.content_hash,
                present = 1
            RETURNING id
            "#,
        )
        .bind(file.folder_id)
        .bind(&file.relative_path)
        .bind(&file.parent_path)
        .bind(&file.title)
        .bind(&file.artist)
        .bind(&file.album_artist)
        .bind(&file.album_name)
        .bind(&file.genre)
        .bind(file.year)
        .bind(file.track_number)
        .bind(file.disc_number)
        .bind(&file.format)
        .bind(file.media_type.as_str())
        .bind(file.duration)
        .bind(file.file_size)
        .bind(file.start_position)
        .bind(&file.index_path)
        .bind(&file.mb_release_id)
        .bind(&file.mb_recording_id)
        .bind(file.last_modified)
        .bind(&file.content_hash)
        .fetch_one(&mut *self.tx)
        .await
        .with_context(format!("writing {}", file.relative_path))?;

        Ok(row.0)
    }

    async fn mark_present(&mut self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE media_file SET present = 1 WHERE ");
        super::push_in_list(&mut qb, "id", ids);
        qb.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn touch(&mut self, ids: &[i64], last_modified: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE media_file SET present = 1, last_modified = ");
        qb.push_bind(last_modified).push(" WHERE ");
        super::push_in_list(&mut qb, "id", ids);
        qb.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn delete_paths_not_in(&mut self, folder_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM media_file WHERE folder_id = ? AND present = 0")
            .bind(folder_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_folders_not_in(&mut self, folder_ids: &[i64]) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM music_folder");
        if !folder_ids.is_empty() {
            qb.push(" WHERE NOT ");
            super::push_in_list(&mut qb, "id", folder_ids);
        }
        let result = qb.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn refresh_aggregates(&mut self) -> Result<()> {
        for sql in [
            UPSERT_ALBUMS,
            DELETE_EMPTY_ALBUMS,
            "DELETE FROM album_folder",
            REBUILD_ALBUM_FOLDERS,
            UPSERT_ARTISTS,
            DELETE_EMPTY_ARTISTS,
            "DELETE FROM artist_folder",
            REBUILD_ARTIST_FOLDERS,
        ] {
            sqlx::query(sql)
                .execute(&mut *self.tx)
                .await
                .with_context("refreshing aggregates")?;
        }
        debug!(target: "db", "Aggregates refreshed");
        Ok(())
    }

    async fn commit(
        self: Box<Self>,
        scanned_at: DateTime<Utc>,
        scanned_folders: &[i64],
    ) -> Result<()> {
        let mut tx = self.tx;
        let stamp = scanned_at.to_rfc3339();

        if !scanned_folders.is_empty() {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE music_folder SET last_scanned = ");
            qb.push_bind(stamp.clone()).push(" WHERE ");
            super::push_in_list(&mut qb, "id", scanned_folders);
            qb.build().execute(&mut *tx).await?;
        }

        sqlx::query(
            "INSERT INTO scan_meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(LAST_SCAN_KEY)
        .bind(&stamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.with_context("committing scan")?;
        Ok(())
    }
}
