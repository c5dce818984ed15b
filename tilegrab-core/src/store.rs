//! Vector-store adapter boundary driven by the merge engine.
//!
//! The underlying vector-format engine (reading tile documents,
//! reprojecting, persisting, indexing) is treated as an opaque
//! collaborator behind this trait. `tilegrab-data` ships a
//! SQLite-backed implementation; tests can substitute their own.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Outcome of importing one tile document into the staging dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Features inserted into the staging dataset.
    pub imported: u64,
    /// Features skipped because of a unique-key conflict. Skips are
    /// recovered locally per feature and never abort the batch.
    pub skipped: u64,
}

/// Outcome of persisting the staging dataset to its final location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    /// Rows written to the output container.
    pub rows: u64,
    /// Entries written to the spatial index artefact.
    pub indexed: u64,
}

/// Errors surfaced by a [`VectorStore`] implementation.
///
/// Sources are boxed so adapters built on different engines share one
/// error surface.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Creating or preparing the staging dataset failed.
    #[error("failed to initialise the staging dataset: {source}")]
    Staging {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Reading or importing a tile document failed.
    #[error("failed to import tile {path:?}: {source}")]
    Import {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The deduplication pass failed.
    #[error("failed to deduplicate by {field}: {source}")]
    Dedup {
        field: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A pre-existing output file could not be removed before writing.
    /// Fatal: the run must not fall back to overwriting in place.
    #[error("failed to delete existing output {path:?}: {source}")]
    OutputDeletion {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Writing the final container or its spatial index failed.
    #[error("failed to persist output to {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Mutable handle to the staging dataset built during the combine
/// phase.
///
/// The staging buffer is created at the start of Combine, owned
/// exclusively by the merge engine, handed by reference to the
/// finaliser, and released once the final output is persisted.
pub trait VectorStore {
    /// Import the features of one cached tile document.
    ///
    /// Per-feature unique-key conflicts are tolerated and counted in
    /// the summary rather than failing the batch.
    fn import_tile(&mut self, path: &Path) -> Result<ImportSummary, StoreError>;

    /// Remove all rows sharing a key value except the one with the
    /// smallest internal row identifier. Returns the number of rows
    /// removed.
    fn dedup_by(&mut self, field: &str) -> Result<u64, StoreError>;

    /// Persist the staging dataset to `output` and write the spatial
    /// index artefact to `index`.
    ///
    /// Any pre-existing file at `output` is deleted first; failure to
    /// delete is [`StoreError::OutputDeletion`] and aborts the phase.
    fn persist(&mut self, output: &Path, index: &Path) -> Result<PersistSummary, StoreError>;
}
