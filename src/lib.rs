//! Facade crate for the tilegrab WFS harvest pipeline.
//!
//! This crate re-exports the core domain types together with the fetch,
//! merge, and storage machinery so downstream tooling can depend on a
//! single crate.

#![forbid(unsafe_code)]

pub use tilegrab_core::{
    AxisConvention, BoundingBox, BoundingBoxError, ConfigError, CountTotals, ImportSummary,
    PersistSummary, RunConfig, StoreError, TileCounts, TileSpec, VectorStore, plan_tiles,
};

pub use tilegrab_data::{
    CombineReport, DownloadReport, HttpTileSource, SqliteFeatureStore, TileSource, TransportError,
    combine, download_tiles, finalize,
};
