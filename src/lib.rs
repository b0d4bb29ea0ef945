//! Music Catalog - media library scanning and search.
//!
//! Turns configured music folders into a catalog of songs, albums and
//! artists persisted in SQLite, and keeps an in-memory full-text index of
//! that catalog for fielded, folder-scoped and random searches.
//!
//! - [`scanner`]: deterministic folder walks
//! - [`metadata`]: tag decoding and cue sheet expansion
//! - [`db`]: the catalog store
//! - [`library`]: scan coordination
//! - [`search`]: index generations and queries

pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod metadata;
pub mod model;
pub mod scanner;
pub mod search;
#[cfg(test)]
pub mod test_utils;
