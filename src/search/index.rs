//! In-memory index generations.
//!
//! An [`IndexGeneration`] is an immutable snapshot built from the whole
//! committed catalog. Text fields (title, artist, album) are stored as
//! lower-cased tokens. Keyword fields (genre, media type, folder path and
//! folder id) keep their raw value and only match exactly. The year is kept
//! as a number for range queries.

use std::collections::HashMap;

use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::debug;

use super::query::{Field, IndexType, Occur, Query};
use crate::error::{Error, Result};
use crate::model::{Album, Artist, MediaFile, MusicFolder};

/// Lower-case `text` and split it on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

type Values = SmallVec<[String; 4]>;

/// One indexed song, album or artist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub id: i64,
    fields: HashMap<Field, Values>,
    year: Option<i32>,
}

impl Document {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Add the tokens of `text` to a text field.
    pub fn text(mut self, field: Field, text: Option<&str>) -> Self {
        if let Some(text) = text {
            self.fields.entry(field).or_default().extend(tokenize(text));
        }
        self
    }

    /// Add a raw keyword value.
    pub fn keyword(mut self, field: Field, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.fields.entry(field).or_default().push(value.to_string());
        }
        self
    }

    pub fn year(mut self, year: Option<i32>) -> Self {
        self.year = year;
        self
    }

    /// Index the folder both by path and by id.
    fn folder(self, folder: &MusicFolder) -> Self {
        let id = folder.id.to_string();
        self.keyword(Field::Folder, Some(&folder.path_key()))
            .keyword(Field::FolderId, Some(&id))
    }

    fn values(&self, field: Field) -> &[String] {
        self.fields.get(&field).map(|values| values.as_slice()).unwrap_or(&[])
    }

    /// Score of the document for `query`, `None` when it does not match.
    ///
    /// Leaf clauses score 1.0, boosts multiply, booleans add up their
    /// matching clauses.
    pub fn score(&self, query: &Query) -> Option<f32> {
        match query {
            Query::Term { field, value } => self.values(*field).contains(value).then_some(1.0),
            Query::Prefix { field, prefix } => self
                .values(*field)
                .iter()
                .any(|token| token.starts_with(prefix.as_str()))
                .then_some(1.0),
            Query::Range {
                field: Field::Year,
                lower,
                upper,
            } => self
                .year
                .filter(|year| (*lower..=*upper).contains(year))
                .map(|_| 1.0),
            Query::Range { .. } => None,
            Query::Boost(inner, boost) => self.score(inner).map(|score| score * boost),
            Query::Boolean(clauses) => {
                let mut total = 0.0;
                let mut matched = false;
                for clause in clauses {
                    match (clause.occur, self.score(&clause.query)) {
                        (Occur::Must, None) => return None,
                        (_, Some(score)) => {
                            total += score;
                            matched = true;
                        }
                        (Occur::Should, None) => {}
                    }
                }
                matched.then_some(total)
            }
        }
    }
}

/// An immutable, versioned snapshot of the index.
#[derive(Debug, Default)]
pub struct IndexGeneration {
    pub generation: u64,
    pub songs: Vec<Document>,
    pub albums: Vec<Document>,
    pub artists: Vec<Document>,
}

impl IndexGeneration {
    /// Documents searched by a query of `index_type`.
    pub fn documents(&self, index_type: IndexType) -> &[Document] {
        match index_type {
            IndexType::Artist | IndexType::ArtistId3 => &self.artists,
            IndexType::Album | IndexType::AlbumId3 => &self.albums,
            IndexType::Song => &self.songs,
        }
    }

    /// Matching documents as `(id, score)`, best first, ties by id.
    pub fn matches(&self, documents: &[Document], query: &Query) -> Vec<(i64, f32)> {
        let mut hits: Vec<(i64, f32)> = documents
            .iter()
            .filter_map(|doc| doc.score(query).map(|score| (doc.id, score)))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits
    }
}

/// Builds index generations from catalog contents.
pub struct IndexBuilder;

impl IndexBuilder {
    /// Build generation `generation`.
    ///
    /// Whole files split by a cue sheet are left out, their sub-tracks are
    /// indexed instead. Fails when an entry refers to an unknown folder.
    pub fn build(
        generation: u64,
        files: &[MediaFile],
        albums: &[Album],
        artists: &[Artist],
        folders: &[MusicFolder],
    ) -> Result<IndexGeneration> {
        let folders: HashMap<i64, &MusicFolder> = folders.iter().map(|f| (f.id, f)).collect();
        let folder = |id: i64| {
            folders
                .get(&id)
                .copied()
                .ok_or_else(|| Error::index_build(format!("unknown music folder {id}")))
        };

        let songs = files
            .par_iter()
            .filter(|file| !file.is_cue_container())
            .map(|file| -> Result<Document> {
                Ok(Document::new(file.id)
                    .text(Field::Title, file.title.as_deref())
                    .text(Field::Artist, file.artist.as_deref())
                    .text(Field::Album, file.album_name.as_deref())
                    .keyword(Field::Genre, file.genre.as_deref())
                    .keyword(Field::MediaType, Some(file.media_type.as_str()))
                    .year(file.year)
                    .folder(folder(file.folder_id)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let albums = albums
            .par_iter()
            .map(|album| {
                let doc = Document::new(album.id)
                    .text(Field::Album, Some(&album.name))
                    .text(Field::Artist, Some(&album.artist))
                    .keyword(Field::Genre, album.genre.as_deref())
                    .year(album.year);
                album
                    .folder_ids
                    .iter()
                    .try_fold(doc, |doc, id| -> Result<Document> { Ok(doc.folder(folder(*id)?)) })
            })
            .collect::<Result<Vec<_>>>()?;

        let artists = artists
            .par_iter()
            .map(|artist| {
                let doc = Document::new(artist.id).text(Field::Artist, Some(&artist.name));
                artist
                    .folder_ids
                    .iter()
                    .try_fold(doc, |doc, id| -> Result<Document> { Ok(doc.folder(folder(*id)?)) })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            target: "search::index",
            generation,
            songs = songs.len(),
            albums = albums.len(),
            artists = artists.len(),
            "Built index generation"
        );
        Ok(IndexGeneration {
            generation,
            songs,
            albums,
            artists,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mock_media_file;
    use proptest::prelude::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
        assert_eq!(tokenize("AC/DC"), vec!["ac", "dc"]);
        assert_eq!(tokenize("  Björk  "), vec!["björk"]);
        assert!(tokenize(" - ").is_empty());
    }

    #[test]
    fn test_boolean_scoring() {
        let doc = Document::new(1)
            .text(Field::Album, Some("Abc Road"))
            .text(Field::Artist, Some("Abc"));

        let both = Query::should([
            Query::prefix(Field::Album, "abc").boosted(1.1),
            Query::prefix(Field::Artist, "abc"),
        ]);
        let score = doc.score(&both).unwrap();
        assert!((score - 2.1).abs() < 1e-6);

        assert_eq!(doc.score(&Query::must([Query::prefix(Field::Title, "abc")])), None);
        assert_eq!(doc.score(&Query::should([])), None);
        assert_eq!(doc.score(&Query::must([Query::should([])])), None);
    }

    #[test]
    fn test_keywords_match_exactly() {
        let doc = Document::new(1).keyword(Field::Genre, Some("Classic Rock")).year(Some(1975));
        assert!(doc.score(&Query::term(Field::Genre, "Classic Rock")).is_some());
        assert!(doc.score(&Query::term(Field::Genre, "classic rock")).is_none());
        assert!(doc.score(&Query::prefix(Field::Genre, "Classic")).is_some());

        let range = |lower, upper| Query::Range {
            field: Field::Year,
            lower,
            upper,
        };
        assert!(doc.score(&range(1975, 1975)).is_some());
        assert!(doc.score(&range(i32::MIN, 1974)).is_none());
        assert!(Document::new(2).score(&range(i32::MIN, i32::MAX)).is_none());
    }

    #[test]
    fn test_build_skips_cue_containers() {
        let folders = vec![MusicFolder::new(1, "/m", "M")];
        let mut whole = mock_media_file(1, "a.flac");
        whole.id = 1;
        whole.index_path = Some("a.cue".into());
        let mut sub = mock_media_file(1, "a.flac");
        sub.id = 2;
        sub.start_position = 0.0;

        let index = IndexBuilder::build(7, &[whole, sub], &[], &[], &folders).unwrap();
        assert_eq!(index.generation, 7);
        assert_eq!(index.songs.len(), 1);
        assert_eq!(index.songs[0].id, 2);
        assert_eq!(index.songs[0].values(Field::Folder), ["/m".to_string()]);
        assert_eq!(index.songs[0].values(Field::FolderId), ["1".to_string()]);
    }

    #[test]
    fn test_build_rejects_unknown_folder() {
        let file = mock_media_file(9, "a.flac");
        let err = IndexBuilder::build(1, &[file], &[], &[], &[]).unwrap_err();
        assert!(matches!(err, Error::IndexBuild(_)));
    }

    #[test]
    fn test_artist_indexed_in_every_folder() {
        let folders = vec![MusicFolder::new(1, "/a", "A"), MusicFolder::new(2, "/b", "B")];
        let artist = Artist {
            id: 5,
            name: "Band".into(),
            album_count: 2,
            song_count: 4,
            folder_ids: vec![1, 2],
        };
        let index = IndexBuilder::build(1, &[], &[], &[artist], &folders).unwrap();
        let doc = &index.artists[0];
        assert_eq!(doc.values(Field::FolderId), ["1".to_string(), "2".to_string()]);
        assert!(doc.score(&Query::term(Field::Folder, "/b")).is_some());
    }

    proptest! {
        #[test]
        fn prop_tokens_are_lowercase_alphanumeric(text in "[ -~]{0,40}") {
            for token in tokenize(&text) {
                prop_assert!(!token.is_empty());
                prop_assert!(token.chars().all(char::is_alphanumeric));
                prop_assert_eq!(token.to_lowercase(), token.clone());
            }
        }
    }
}
