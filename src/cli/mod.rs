//! Command-line interface for music-catalog.
//!
//! Every command opens the catalog named by the configuration (or `--db`),
//! prints its result as text or, with `--json`, as JSON on stdout.

mod commands;

pub use commands::{Cli, Commands, run_command};
