//! Search and random sampling commands.

use serde::Serialize;
use tokio::runtime::Runtime;

use music_catalog::db::CatalogStore;
use music_catalog::model::{Album, Artist, MediaFile};
use music_catalog::search::{IndexType, NameField, RandomSearchCriteria, SearchCriteria};

use super::{App, album_line, artist_line, song_line};

/// Resolved entries, ordered as the index returned them.
#[derive(Serialize)]
#[serde(untagged)]
enum Entries {
    Songs(Vec<MediaFile>),
    Albums(Vec<Album>),
    Artists(Vec<Artist>),
}

impl Entries {
    fn print(&self) {
        match self {
            Entries::Songs(songs) => songs.iter().for_each(|s| println!("{}", song_line(s))),
            Entries::Albums(albums) => albums.iter().for_each(|a| println!("{}", album_line(a))),
            Entries::Artists(artists) => artists.iter().for_each(|a| println!("{}", artist_line(a))),
        }
    }

    fn len(&self) -> usize {
        match self {
            Entries::Songs(v) => v.len(),
            Entries::Albums(v) => v.len(),
            Entries::Artists(v) => v.len(),
        }
    }
}

#[derive(Serialize)]
struct Page {
    total_hits: usize,
    offset: usize,
    items: Entries,
}

async fn resolve(app: &App, index_type: IndexType, ids: &[i64]) -> anyhow::Result<Entries> {
    let catalog = app.catalog.as_ref();
    Ok(match index_type {
        IndexType::Song => Entries::Songs(catalog.media_files_by_ids(ids).await?),
        IndexType::Album | IndexType::AlbumId3 => Entries::Albums(catalog.albums_by_ids(ids).await?),
        IndexType::Artist | IndexType::ArtistId3 => {
            Entries::Artists(catalog.artists_by_ids(ids).await?)
        }
    })
}

/// Ranked search restricted to the given folders.
pub fn cmd_search(
    rt: &Runtime,
    app: &App,
    index_type: IndexType,
    query: &str,
    offset: usize,
    count: Option<usize>,
    folder_ids: &[i64],
) -> anyhow::Result<()> {
    rt.block_on(async {
        let engine = app.search_engine().await?;
        let folders = app.folders(folder_ids)?;
        let criteria = SearchCriteria {
            query: query.to_string(),
            offset,
            count: count.unwrap_or(app.config.search.default_count),
        };

        let result = engine.search(&criteria, &folders, index_type);
        let page = Page {
            total_hits: result.total_hits,
            offset: result.offset,
            items: resolve(app, index_type, &result.ids).await?,
        };
        app.print(&page, |page| {
            page.items.print();
            println!(
                "{} of {} hits from offset {}",
                page.items.len(),
                page.total_hits,
                page.offset
            );
        })
    })
}

/// Raw field match, unscoped and unpaged.
pub fn cmd_search_by_name(rt: &Runtime, app: &App, field: NameField, text: &str) -> anyhow::Result<()> {
    rt.block_on(async {
        let engine = app.search_engine().await?;
        let ids = engine.search_by_name(field, text);
        let index_type = match field {
            NameField::Artist => IndexType::Artist,
            NameField::Album => IndexType::Album,
            NameField::Title => IndexType::Song,
        };
        let entries = resolve(app, index_type, &ids).await?;
        app.print(&entries, Entries::print)
    })
}

/// Random songs matching genre, year range and folders.
pub fn cmd_random_songs(
    rt: &Runtime,
    app: &App,
    count: usize,
    genre: Option<String>,
    from_year: Option<i32>,
    to_year: Option<i32>,
    folder_ids: &[i64],
) -> anyhow::Result<()> {
    rt.block_on(async {
        let engine = app.search_engine().await?;
        let criteria = RandomSearchCriteria {
            count,
            genre,
            from_year,
            to_year,
            folders: app.folders(folder_ids)?,
        };
        let ids = engine.get_random_songs(&criteria);
        let entries = resolve(app, IndexType::Song, &ids).await?;
        app.print(&entries, Entries::print)
    })
}

/// Random albums of the given folders.
pub fn cmd_random_albums(
    rt: &Runtime,
    app: &App,
    count: usize,
    id3: bool,
    folder_ids: &[i64],
) -> anyhow::Result<()> {
    rt.block_on(async {
        let engine = app.search_engine().await?;
        let folders = app.folders(folder_ids)?;
        let ids = if id3 {
            engine.get_random_albums_id3(count, &folders)
        } else {
            engine.get_random_albums(count, &folders)
        };
        let entries = resolve(app, IndexType::Album, &ids).await?;
        app.print(&entries, Entries::print)
    })
}
