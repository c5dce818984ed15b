//! Error types emitted by the tilegrab CLI.

use std::path::PathBuf;

use thiserror::Error;
use tilegrab_core::{ConfigError, StoreError};
use tilegrab_data::{CombineError, DownloadError};

/// Errors emitted by the tilegrab CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// The run configuration could not be loaded.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    /// The tile cache directory could not be created.
    #[error("failed to create tile cache directory {path:?}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The async runtime for the download phase could not be built.
    #[error("failed to start the download runtime: {source}")]
    Runtime {
        #[source]
        source: std::io::Error,
    },
    /// The download phase failed outside its retry protocol.
    #[error(transparent)]
    Download(#[from] DownloadError),
    /// The combine phase failed.
    #[error(transparent)]
    Combine(#[from] CombineError),
    /// Persisting the merged output failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
