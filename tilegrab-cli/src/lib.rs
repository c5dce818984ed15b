//! Command-line interface for the tilegrab harvester.
//!
//! One invocation runs the whole pipeline: plan the tile grid from the
//! configured extent, download missing tiles into the cache, merge the
//! cache into a staging store, and persist the deduplicated output with
//! its spatial index. Either phase can be skipped to resume a partial
//! run.
#![forbid(unsafe_code)]

use std::{fs, path::PathBuf, time::Instant};

use clap::Parser;
use log::{info, warn};
use tilegrab_core::RunConfig;
use tilegrab_data::{HttpTileSource, SqliteFeatureStore, TokioSleeper, combine, download_tiles, finalize};

mod error;

pub use error::CliError;

/// Run the tilegrab CLI with the current process arguments.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    execute(&cli)
}

#[derive(Debug, Parser)]
#[command(
    name = "tilegrab",
    about = "Download a WFS layer tile by tile and merge it into one dataset",
    version
)]
struct Cli {
    /// Path to the run configuration (JSON).
    #[arg(value_name = "config")]
    config: PathBuf,
    /// Skip the download phase and merge whatever the cache holds.
    #[arg(long)]
    no_download: bool,
    /// Stop after the download phase without merging.
    #[arg(long)]
    no_combine: bool,
}

fn execute(cli: &Cli) -> Result<(), CliError> {
    let started = Instant::now();
    let config = RunConfig::load(&cli.config)?;
    fs::create_dir_all(&config.tmpdir).map_err(|source| CliError::CacheDir {
        path: config.tmpdir.clone(),
        source,
    })?;

    if cli.no_download {
        info!("download phase disabled; using the existing cache");
    } else {
        download(&config)?;
    }

    if cli.no_combine {
        info!("combine phase disabled; leaving the cache as downloaded");
    } else {
        merge(&config)?;
    }

    info!("finished in {:.2}s", started.elapsed().as_secs_f64());
    Ok(())
}

fn download(config: &RunConfig) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| CliError::Runtime { source })?;
    let source = HttpTileSource::new();
    let report = runtime.block_on(download_tiles(&source, config, &TokioSleeper))?;
    info!(
        "download phase: {} tiles fetched, {} already cached",
        report.fetched, report.skipped
    );
    if let Some(abort) = report.aborted {
        warn!(
            "download stopped early at {}: {}; merging the tiles cached so far",
            abort.tile.display(),
            abort.error
        );
    }
    Ok(())
}

fn merge(config: &RunConfig) -> Result<(), CliError> {
    let mut store = SqliteFeatureStore::open(config)?;
    let report = combine(config, &mut store)?;
    info!(
        "combine phase: {} features imported, {} empty tiles, {} duplicates skipped",
        report.imported, report.skipped_empty, report.skipped_duplicates
    );
    let summary = finalize(&mut store, config)?;
    info!(
        "wrote {} rows and {} index entries to {}",
        summary.rows,
        summary.indexed,
        config.container_path().display()
    );
    Ok(())
}
