//! Full-text search over the committed catalog.
//!
//! The [`SearchEngine`] publishes one [`IndexGeneration`] at a time. Readers
//! clone the current `Arc` and keep searching it even while a rebuild swaps
//! in a newer generation; the old one is freed once the last reader drops
//! it.
//!
//! Queries are compiled by [`QueryFactory`] and every search that takes a
//! folder list is restricted to those folders.

pub mod index;
pub mod query;

pub use index::{Document, IndexBuilder, IndexGeneration, tokenize};
pub use query::{
    Field, IndexType, NameField, Query, QueryFactory, RandomSearchCriteria, SearchCriteria,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::db::CatalogStore;
use crate::error::{Error, Result};
use crate::model::MusicFolder;

/// One page of ranked search hits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub ids: Vec<i64>,
    /// Matches before paging
    pub total_hits: usize,
    pub offset: usize,
}

/// Executes compiled queries against the published index generation.
pub struct SearchEngine {
    current: RwLock<Arc<IndexGeneration>>,
    next_generation: AtomicU64,
    stale: AtomicBool,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchEngine {
    /// An engine serving an empty generation 0.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexGeneration::default())),
            next_generation: AtomicU64::new(1),
            stale: AtomicBool::new(false),
        }
    }

    /// The published generation.
    pub fn current(&self) -> Arc<IndexGeneration> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Whether the last rebuild failed and the index lags the catalog.
    pub fn index_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Build a new generation from the committed catalog and publish it.
    ///
    /// On failure the previous generation stays published and the index is
    /// flagged stale until a later rebuild succeeds.
    pub async fn rebuild(&self, store: &dyn CatalogStore) -> Result<u64> {
        match self.build_from(store).await {
            Ok(index) => {
                let generation = index.generation;
                self.publish(index);
                self.stale.store(false, Ordering::Release);
                Ok(generation)
            }
            Err(e) => {
                self.stale.store(true, Ordering::Release);
                error!(target: "search::index", error = %e, "Index rebuild failed, keeping previous generation");
                Err(match e {
                    Error::IndexBuild(_) => e,
                    other => Error::index_build(other.to_string()),
                })
            }
        }
    }

    async fn build_from(&self, store: &dyn CatalogStore) -> Result<IndexGeneration> {
        let folders = store.music_folders().await?;
        let files = store.all_media_files().await?;
        let albums = store.all_albums().await?;
        let artists = store.all_artists().await?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || {
            IndexBuilder::build(generation, &files, &albums, &artists, &folders)
        })
        .await
        .map_err(|e| Error::index_build(e.to_string()))?
    }

    /// Swap in `index` unless a newer generation is already published.
    pub fn publish(&self, index: IndexGeneration) {
        let mut current = self.current.write();
        if index.generation < current.generation {
            debug!(target: "search::index", generation = index.generation, "Discarding outdated generation");
            return;
        }
        info!(
            target: "search::index",
            generation = index.generation,
            songs = index.songs.len(),
            albums = index.albums.len(),
            artists = index.artists.len(),
            "Published index generation"
        );
        *current = Arc::new(index);
    }

    /// Ranked, paged search restricted to `folders`.
    pub fn search(
        &self,
        criteria: &SearchCriteria,
        folders: &[MusicFolder],
        index_type: IndexType,
    ) -> SearchResult {
        let query = QueryFactory::search(criteria, folders, index_type);
        let index = self.current();
        let hits = index.matches(index.documents(index_type), &query);

        SearchResult {
            total_hits: hits.len(),
            ids: hits
                .into_iter()
                .skip(criteria.offset)
                .take(criteria.count)
                .map(|(id, _)| id)
                .collect(),
            offset: criteria.offset,
        }
    }

    /// Raw match on one field, without folder scoping or paging.
    pub fn search_by_name(&self, field: NameField, text: &str) -> Vec<i64> {
        let query = QueryFactory::search_by_name(field, text);
        let index = self.current();
        let documents = match field {
            NameField::Artist => &index.artists,
            NameField::Album => &index.albums,
            NameField::Title => &index.songs,
        };
        index
            .matches(documents, &query)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Up to `criteria.count` random songs matching the criteria.
    pub fn get_random_songs(&self, criteria: &RandomSearchCriteria) -> Vec<i64> {
        self.get_random_songs_with_rng(criteria, &mut rand::rng())
    }

    pub fn get_random_songs_with_rng<R: Rng + ?Sized>(
        &self,
        criteria: &RandomSearchCriteria,
        rng: &mut R,
    ) -> Vec<i64> {
        let index = self.current();
        sample(&index.songs, &QueryFactory::random_songs(criteria), criteria.count, rng)
    }

    /// Up to `count` random albums of `folders`, scoped by folder path.
    pub fn get_random_albums(&self, count: usize, folders: &[MusicFolder]) -> Vec<i64> {
        self.get_random_albums_with_rng(count, folders, &mut rand::rng())
    }

    pub fn get_random_albums_with_rng<R: Rng + ?Sized>(
        &self,
        count: usize,
        folders: &[MusicFolder],
        rng: &mut R,
    ) -> Vec<i64> {
        let index = self.current();
        sample(&index.albums, &QueryFactory::random_albums(folders), count, rng)
    }

    /// Up to `count` random albums of `folders`, scoped by folder id.
    pub fn get_random_albums_id3(&self, count: usize, folders: &[MusicFolder]) -> Vec<i64> {
        self.get_random_albums_id3_with_rng(count, folders, &mut rand::rng())
    }

    pub fn get_random_albums_id3_with_rng<R: Rng + ?Sized>(
        &self,
        count: usize,
        folders: &[MusicFolder],
        rng: &mut R,
    ) -> Vec<i64> {
        let index = self.current();
        sample(&index.albums, &QueryFactory::random_albums_id3(folders), count, rng)
    }
}

/// Uniform sample without replacement from every match.
fn sample<R: Rng + ?Sized>(documents: &[Document], query: &Query, count: usize, rng: &mut R) -> Vec<i64> {
    let matches: Vec<i64> = documents
        .iter()
        .filter(|doc| doc.score(query).is_some())
        .map(|doc| doc.id)
        .collect();
    debug!(target: "search::query", %query, matches = matches.len(), count, "Random sample");
    matches.choose_multiple(rng, count).copied().collect()
}
