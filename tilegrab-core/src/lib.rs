//! Core domain types for the tilegrab WFS harvest pipeline.
//!
//! Responsibilities:
//! - Model bounding boxes, tile grids, and the axis conventions that
//!   govern request and cache-file coordinate ordering.
//! - Track server-reported feature counts across the fetch and merge
//!   phases.
//! - Define the run configuration and the vector-store adapter trait
//!   that the merge engine drives.
//!
//! Boundaries:
//! - No I/O beyond loading configuration and the persisted spatial
//!   index artefact; network and XML handling live in `tilegrab-data`.

#![forbid(unsafe_code)]

mod bbox;
mod config;
mod counts;
mod grid;
mod index;
mod store;

pub use bbox::{BoundingBox, BoundingBoxError};
pub use config::{ConfigError, RunConfig};
pub use counts::{CountTotals, TileCounts};
pub use grid::{AxisConvention, TileSpec, plan_tiles, tile_file_name};
pub use index::{
    IndexedFeature, SpatialIndexError, SpatialIndexWriteError, build_rtree, load_spatial_index,
    write_spatial_index,
};
pub use store::{ImportSummary, PersistSummary, StoreError, VectorStore};
