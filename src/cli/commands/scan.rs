//! Scanning, scan status and folder configuration commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::info;

use music_catalog::config::{self, FolderConfig};
use music_catalog::db::CatalogStore;
use music_catalog::library::{MediaScanner, ScanReport, ScanState};
use music_catalog::model::{FolderType, MusicFolder};
use music_catalog::search::SearchEngine;

use super::{App, load_config};

/// Scan every configured folder, cancelling on Ctrl+C.
pub fn cmd_scan(rt: &Runtime, app: &App) -> anyhow::Result<()> {
    rt.block_on(async {
        let search = Arc::new(SearchEngine::new());
        let scanner = Arc::new(MediaScanner::new(app.catalog.clone(), search, &app.config));
        if scanner.folders().is_empty() {
            anyhow::bail!("No music folders configured, use add-folder first");
        }

        let mut states = scanner.state_changes();
        let handle = scanner.start_scan()?;
        let cancel = handle.cancel_flag();
        let mut status = scanner.subscribe();
        let mut wait = std::pin::pin!(handle.wait());
        let mut last_printed = 0;

        let report = loop {
            tokio::select! {
                result = &mut wait => break result?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("\nCancelling scan...");
                    cancel.cancel();
                }
                Ok(state) = states.recv() => {
                    if state == ScanState::Committing && !app.json {
                        eprintln!("\nCommitting...");
                    }
                }
                Ok(()) = status.changed() => {
                    let seen = status.borrow_and_update().files_seen;
                    if !app.json && seen >= last_printed + 100 {
                        last_printed = seen;
                        eprint!("\rScanned {seen} files...");
                    }
                }
            }
        };

        app.print(&report, print_report)
    })
}

fn print_report(report: &ScanReport) {
    println!(
        "\nScan complete: {} folders, {} new, {} updated, {} unchanged, {} deleted in {} ms",
        report.folders_scanned,
        report.inserted,
        report.updated,
        report.unchanged,
        report.deleted,
        report.elapsed_ms
    );
    if report.changed() == 0 {
        println!("Catalog already up to date");
    }
    for problem in &report.problems {
        println!("  Skipped {}: {}", problem.path.display(), problem.message);
    }
    for warning in &report.warnings {
        println!("  Cue sheet {}: {}", warning.path.display(), warning.message);
    }
    if let Some(generation) = report.index_generation {
        println!("Search index generation {generation}");
    }
}

#[derive(Serialize)]
struct CatalogStatus {
    never_scanned: bool,
    last_scanned: Option<DateTime<Utc>>,
    songs: usize,
    albums: usize,
    artists: usize,
}

/// Show whether the catalog was ever scanned and what it holds.
pub fn cmd_status(rt: &Runtime, app: &App) -> anyhow::Result<()> {
    rt.block_on(async {
        let catalog = app.catalog.as_ref();
        let last_scanned = catalog.last_scanned().await?;
        let songs = catalog
            .all_media_files()
            .await?
            .iter()
            .filter(|f| !f.is_cue_container())
            .count();
        let status = CatalogStatus {
            never_scanned: last_scanned.is_none(),
            last_scanned,
            songs,
            albums: catalog.all_albums().await?.len(),
            artists: catalog.all_artists().await?.len(),
        };

        app.print(&status, |s| {
            match s.last_scanned {
                Some(at) => println!("Last scan: {}", at.to_rfc3339()),
                None => println!("Never scanned"),
            }
            println!("{} songs, {} albums, {} artists", s.songs, s.albums, s.artists);
        })
    })
}

/// List configured folders with their last scan time.
pub fn cmd_folders(rt: &Runtime, app: &App) -> anyhow::Result<()> {
    rt.block_on(async {
        let persisted = app.catalog.music_folders().await?;
        let folders: Vec<MusicFolder> = app
            .config
            .music_folders()
            .into_iter()
            .map(|mut folder| {
                folder.last_scanned = persisted
                    .iter()
                    .find(|p| p.id == folder.id)
                    .and_then(|p| p.last_scanned);
                folder
            })
            .collect();

        app.print(&folders, |folders| {
            if folders.is_empty() {
                println!("No music folders configured");
            }
            for folder in folders {
                let scanned = folder
                    .last_scanned
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:>4}  {:<20} {} ({}, {}, last scan: {})",
                    folder.id,
                    folder.name,
                    folder.path.display(),
                    folder.folder_type.as_str(),
                    if folder.enabled { "enabled" } else { "disabled" },
                    scanned
                );
            }
        })
    })
}

/// Add a music folder to the configuration file.
pub fn cmd_add_folder(
    config_path: Option<&Path>,
    path: &Path,
    id: Option<i64>,
    name: Option<String>,
    folder_type: FolderType,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    let id = id.unwrap_or_else(|| {
        config.library.folders.iter().map(|f| f.id).max().unwrap_or(0) + 1
    });
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));

    config.library.folders.push(FolderConfig {
        id,
        path: path.clone(),
        name,
        folder_type,
        enabled: true,
    });
    config.validate()?;

    match config_path {
        Some(p) => config::save_to(&config, p)?,
        None => config::save(&config)?,
    }
    info!(target: "config", id, path = %path.display(), "Added music folder");
    println!("Added folder {id}: {}", path.display());
    Ok(())
}
