//! Compiled queries and the factory that builds them.
//!
//! A [`Query`] renders in Lucene syntax through [`Display`](std::fmt::Display),
//! which makes compiled queries easy to log and to assert on:
//!
//! ```text
//! +(+((album:abc*)^1.1 artist:abc*)) +(folder:/var/music1)
//! +mediaType:MUSIC +genre:Classic Rock +year:[1900 TO 2147483647] +(folder:/var/music1)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::index::tokenize;
use crate::model::{MediaType, MusicFolder};

/// Weight of the primary field over the artist fallback.
pub const PRIMARY_FIELD_BOOST: f32 = 1.1;

/// Indexed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Artist,
    Album,
    Genre,
    MediaType,
    Year,
    /// Folder path keyword
    Folder,
    /// Folder id keyword
    FolderId,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Artist => "artist",
            Field::Album => "album",
            Field::Genre => "genre",
            Field::MediaType => "mediaType",
            Field::Year => "year",
            Field::Folder => "folder",
            Field::FolderId => "folderId",
        }
    }
}

/// Whether a boolean clause is required or optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occur {
    Must,
    Should,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub occur: Occur,
    pub query: Query,
}

/// A compiled query.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Exact value (token for text fields, raw value for keywords)
    Term { field: Field, value: String },
    /// Token prefix
    Prefix { field: Field, prefix: String },
    /// Inclusive numeric range
    Range { field: Field, lower: i32, upper: i32 },
    Boost(Box<Query>, f32),
    Boolean(Vec<Clause>),
}

impl Query {
    pub fn term(field: Field, value: impl Into<String>) -> Self {
        Query::Term {
            field,
            value: value.into(),
        }
    }

    pub fn prefix(field: Field, prefix: impl Into<String>) -> Self {
        Query::Prefix {
            field,
            prefix: prefix.into(),
        }
    }

    pub fn must(queries: impl IntoIterator<Item = Query>) -> Self {
        Self::boolean(Occur::Must, queries)
    }

    pub fn should(queries: impl IntoIterator<Item = Query>) -> Self {
        Self::boolean(Occur::Should, queries)
    }

    fn boolean(occur: Occur, queries: impl IntoIterator<Item = Query>) -> Self {
        Query::Boolean(
            queries
                .into_iter()
                .map(|query| Clause { occur, query })
                .collect(),
        )
    }

    pub fn boosted(self, boost: f32) -> Self {
        Query::Boost(Box::new(self), boost)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Term { field, value } => write!(f, "{}:{}", field.name(), value),
            Query::Prefix { field, prefix } => write!(f, "{}:{}*", field.name(), prefix),
            Query::Range {
                field,
                lower,
                upper,
            } => write!(f, "{}:[{} TO {}]", field.name(), lower, upper),
            Query::Boost(inner, boost) => write!(f, "({inner})^{boost}"),
            Query::Boolean(clauses) => {
                for (i, clause) in clauses.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    if clause.occur == Occur::Must {
                        f.write_str("+")?;
                    }
                    match &clause.query {
                        nested @ Query::Boolean(_) => write!(f, "({nested})")?,
                        other => write!(f, "{other}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Query shape: which documents are searched and how folders are scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    Artist,
    ArtistId3,
    Album,
    AlbumId3,
    Song,
}

impl IndexType {
    /// Folder-id scoped ("ID3") variants.
    pub fn is_id3(&self) -> bool {
        matches!(self, IndexType::ArtistId3 | IndexType::AlbumId3)
    }

    /// Primary text field and whether the artist field is a fallback.
    fn fields(&self) -> (Field, bool) {
        match self {
            IndexType::Artist | IndexType::ArtistId3 => (Field::Artist, false),
            IndexType::Album | IndexType::AlbumId3 => (Field::Album, true),
            IndexType::Song => (Field::Title, true),
        }
    }
}

impl std::str::FromStr for IndexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "ARTIST" => Ok(IndexType::Artist),
            "ARTIST_ID3" => Ok(IndexType::ArtistId3),
            "ALBUM" => Ok(IndexType::Album),
            "ALBUM_ID3" => Ok(IndexType::AlbumId3),
            "SONG" => Ok(IndexType::Song),
            other => Err(format!("unknown index type: {other}")),
        }
    }
}

/// Field matched by [`QueryFactory::search_by_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameField {
    Artist,
    Album,
    Title,
}

impl NameField {
    pub fn field(&self) -> Field {
        match self {
            NameField::Artist => Field::Artist,
            NameField::Album => Field::Album,
            NameField::Title => Field::Title,
        }
    }
}

impl std::str::FromStr for NameField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "artist" => Ok(NameField::Artist),
            "album" => Ok(NameField::Album),
            "title" => Ok(NameField::Title),
            other => Err(format!("unknown field: {other}")),
        }
    }
}

/// Free-text search with paging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub query: String,
    pub offset: usize,
    pub count: usize,
}

/// Filters for random song sampling.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RandomSearchCriteria {
    pub count: usize,
    /// Exact genre
    pub genre: Option<String>,
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
    pub folders: Vec<MusicFolder>,
}

/// Builds [`Query`] values from search criteria.
pub struct QueryFactory;

impl QueryFactory {
    /// Every token required, each token matched as a prefix on the primary
    /// field (boosted) or the artist field, scoped to `folders`.
    pub fn search(criteria: &SearchCriteria, folders: &[MusicFolder], index_type: IndexType) -> Query {
        let (primary, artist_fallback) = index_type.fields();

        let tokens = tokenize(&criteria.query).into_iter().map(|token| {
            if artist_fallback {
                Query::should([
                    Query::prefix(primary, token.clone()).boosted(PRIMARY_FIELD_BOOST),
                    Query::prefix(Field::Artist, token),
                ])
            } else {
                Query::prefix(primary, token)
            }
        });

        let query = Query::must([
            Query::must(tokens),
            Self::folder_scope(folders, index_type.is_id3()),
        ]);
        trace!(target: "search::query", %query, ?index_type, "Compiled search");
        query
    }

    /// All tokens optional; the last one is matched as a prefix.
    pub fn search_by_name(field: NameField, text: &str) -> Query {
        let tokens = tokenize(text);
        let last = tokens.len().saturating_sub(1);
        Query::should(tokens.into_iter().enumerate().map(|(i, token)| {
            if i == last {
                Query::prefix(field.field(), token)
            } else {
                Query::term(field.field(), token)
            }
        }))
    }

    /// Music only, optional exact genre and year range, scoped to the
    /// criteria folders.
    pub fn random_songs(criteria: &RandomSearchCriteria) -> Query {
        let mut clauses = vec![Query::term(Field::MediaType, MediaType::Music.as_str())];

        if let Some(genre) = &criteria.genre {
            clauses.push(Query::term(Field::Genre, genre.clone()));
        }
        if criteria.from_year.is_some() || criteria.to_year.is_some() {
            clauses.push(Query::Range {
                field: Field::Year,
                lower: criteria.from_year.unwrap_or(i32::MIN),
                upper: criteria.to_year.unwrap_or(i32::MAX),
            });
        }
        clauses.push(Self::folder_scope(&criteria.folders, false));

        Query::must(clauses)
    }

    /// Albums of `folders`, scoped by folder path.
    pub fn random_albums(folders: &[MusicFolder]) -> Query {
        Query::should([Self::folder_scope(folders, false)])
    }

    /// Albums of `folders`, scoped by folder id.
    pub fn random_albums_id3(folders: &[MusicFolder]) -> Query {
        Query::should([Self::folder_scope(folders, true)])
    }

    /// OR of the folders the caller may see.
    fn folder_scope(folders: &[MusicFolder], by_id: bool) -> Query {
        Query::should(folders.iter().map(|folder| {
            if by_id {
                Query::term(Field::FolderId, folder.id.to_string())
            } else {
                Query::term(Field::Folder, folder.path_key())
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn folders() -> Vec<MusicFolder> {
        vec![
            MusicFolder::new(10, "/var/music1", "Music1"),
            MusicFolder::new(20, "/var/music2", "Music2"),
        ]
    }

    fn criteria(query: &str) -> SearchCriteria {
        SearchCriteria {
            query: query.into(),
            offset: 0,
            count: 10,
        }
    }

    #[test]
    fn test_search_artist() {
        let one = &folders()[..1];
        let query = QueryFactory::search(&criteria("ABC DEF"), one, IndexType::Artist);
        assert_eq!(
            query.to_string(),
            "+(+artist:abc* +artist:def*) +(folder:/var/music1)"
        );

        let query = QueryFactory::search(&criteria("abc"), &folders(), IndexType::Artist);
        assert_eq!(
            query.to_string(),
            "+(+artist:abc*) +(folder:/var/music1 folder:/var/music2)"
        );
    }

    #[test]
    fn test_search_artist_id3() {
        let query = QueryFactory::search(&criteria("abc"), &folders(), IndexType::ArtistId3);
        assert_eq!(query.to_string(), "+(+artist:abc*) +(folderId:10 folderId:20)");
    }

    #[test]
    fn test_search_album_boosts_primary_field() {
        let one = &folders()[..1];
        let query = QueryFactory::search(&criteria("ABC DEF"), one, IndexType::Album);
        assert_eq!(
            query.to_string(),
            "+(+((album:abc*)^1.1 artist:abc*) +((album:def*)^1.1 artist:def*)) +(folder:/var/music1)"
        );

        let query = QueryFactory::search(&criteria("abc"), &folders(), IndexType::AlbumId3);
        assert_eq!(
            query.to_string(),
            "+(+((album:abc*)^1.1 artist:abc*)) +(folderId:10 folderId:20)"
        );
    }

    #[test]
    fn test_search_song() {
        let query = QueryFactory::search(&criteria("abc"), &folders()[1..], IndexType::Song);
        assert_eq!(
            query.to_string(),
            "+(+((title:abc*)^1.1 artist:abc*)) +(folder:/var/music2)"
        );
    }

    #[test]
    fn test_search_tokenizes_punctuation() {
        let query = QueryFactory::search(&criteria("AC/DC"), &folders()[..1], IndexType::Artist);
        assert_eq!(query.to_string(), "+(+artist:ac* +artist:dc*) +(folder:/var/music1)");
    }

    #[test]
    fn test_search_by_name() {
        let query = QueryFactory::search_by_name(NameField::Artist, "ABC DEF");
        assert_eq!(query.to_string(), "artist:abc artist:def*");
        let query = QueryFactory::search_by_name(NameField::Album, "abc");
        assert_eq!(query.to_string(), "album:abc*");
    }

    #[test]
    fn test_random_songs() {
        let mut criteria = RandomSearchCriteria {
            count: 50,
            genre: Some("Classic Rock".into()),
            from_year: Some(1900),
            to_year: Some(2000),
            folders: folders()[..1].to_vec(),
        };
        assert_eq!(
            QueryFactory::random_songs(&criteria).to_string(),
            "+mediaType:MUSIC +genre:Classic Rock +year:[1900 TO 2000] +(folder:/var/music1)"
        );

        criteria.to_year = None;
        assert_eq!(
            QueryFactory::random_songs(&criteria).to_string(),
            "+mediaType:MUSIC +genre:Classic Rock +year:[1900 TO 2147483647] +(folder:/var/music1)"
        );

        criteria.from_year = None;
        criteria.to_year = Some(2000);
        assert_eq!(
            QueryFactory::random_songs(&criteria).to_string(),
            "+mediaType:MUSIC +genre:Classic Rock +year:[-2147483648 TO 2000] +(folder:/var/music1)"
        );

        criteria.to_year = None;
        criteria.genre = None;
        criteria.folders = folders();
        assert_eq!(
            QueryFactory::random_songs(&criteria).to_string(),
            "+mediaType:MUSIC +(folder:/var/music1 folder:/var/music2)"
        );
    }

    #[test]
    fn test_random_albums() {
        assert_eq!(
            QueryFactory::random_albums(&folders()).to_string(),
            "(folder:/var/music1 folder:/var/music2)"
        );
        assert_eq!(
            QueryFactory::random_albums_id3(&folders()).to_string(),
            "(folderId:10 folderId:20)"
        );
    }

    #[test]
    fn test_index_type_parsing() {
        assert_eq!("album-id3".parse::<IndexType>().unwrap(), IndexType::AlbumId3);
        assert_eq!("SONG".parse::<IndexType>().unwrap(), IndexType::Song);
        assert!("playlist".parse::<IndexType>().is_err());
    }

    proptest! {
        #[test]
        fn prop_every_token_is_required(words in proptest::collection::vec("[a-z]{1,8}", 1..5)) {
            let text = words.join(" ");
            let query = QueryFactory::search(&criteria(&text), &folders(), IndexType::Artist);
            let Query::Boolean(top) = &query else { panic!("boolean expected") };
            let Query::Boolean(tokens) = &top[0].query else { panic!("boolean expected") };
            prop_assert_eq!(tokens.len(), words.len());
            prop_assert!(tokens.iter().all(|c| c.occur == Occur::Must));
            prop_assert!(top.iter().all(|c| c.occur == Occur::Must));
        }
    }
}
