//! Catalog listing commands.

use tokio::runtime::Runtime;

use music_catalog::db::CatalogStore;

use super::{App, album_line, artist_line, song_line};

/// List artists alphabetically.
pub fn cmd_artists(
    rt: &Runtime,
    app: &App,
    offset: i64,
    count: Option<i64>,
    folder_ids: &[i64],
) -> anyhow::Result<()> {
    rt.block_on(async {
        let folders = app.folder_ids(folder_ids)?;
        let artists = app
            .catalog
            .get_artists(offset, app.page_size(count), &folders)
            .await?;
        app.print(&artists, |artists| {
            artists.iter().for_each(|a| println!("{}", artist_line(a)))
        })
    })
}

/// List albums, by name or by year when asked.
pub fn cmd_albums(
    rt: &Runtime,
    app: &App,
    alphabetical: bool,
    by_year: bool,
    offset: i64,
    count: Option<i64>,
    folder_ids: &[i64],
) -> anyhow::Result<()> {
    rt.block_on(async {
        let folders = app.folder_ids(folder_ids)?;
        let albums = app
            .catalog
            .get_albums(offset, app.page_size(count), alphabetical, by_year, &folders)
            .await?;
        app.print(&albums, |albums| {
            albums.iter().for_each(|a| println!("{}", album_line(a)))
        })
    })
}

/// List songs with exactly this genre.
pub fn cmd_genre(
    rt: &Runtime,
    app: &App,
    genre: &str,
    offset: i64,
    count: Option<i64>,
    folder_ids: &[i64],
) -> anyhow::Result<()> {
    rt.block_on(async {
        let folders = app.folder_ids(folder_ids)?;
        let songs = app
            .catalog
            .get_songs_by_genre(genre, offset, app.page_size(count), &folders)
            .await?;
        app.print(&songs, |songs| {
            songs.iter().for_each(|s| println!("{}", song_line(s)))
        })
    })
}

/// List the entries directly under (or, recursively, below) a directory.
pub fn cmd_children(
    rt: &Runtime,
    app: &App,
    folder_id: i64,
    parent: &str,
    recursive: bool,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let parent = parent.trim_matches('/');
        let children = app.catalog.list_children(parent, folder_id, recursive).await?;
        app.print(&children, |children| {
            if children.is_empty() {
                println!("Nothing under '{parent}' in folder {folder_id}");
            }
            children.iter().for_each(|s| println!("{}", song_line(s)))
        })
    })
}
