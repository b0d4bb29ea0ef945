//! Music Catalog command-line interface.

mod cli;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Library events are logged under subsystem targets, not module paths.
const DEFAULT_FILTER: &str =
    "music_catalog=info,scanner=info,metadata=info,search=info,db=info,config=info";

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(default_filter())
        .init();

    cli::run_command(&args)
}
