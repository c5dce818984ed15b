//! I/O layer of the tile harvester.
//!
//! Responsibilities: issuing WFS GetFeature requests and caching the
//! responses on disk, reading the cached tile documents back, merging
//! them into a staging store, and persisting the final container with
//! its spatial index. The pure domain types (tile planning, counts,
//! configuration, the store trait) live in `tilegrab-core`; this crate
//! supplies the implementations that touch the network and the
//! filesystem.

#![forbid(unsafe_code)]

mod fetch;
mod gml;
mod merge;
mod proj;
mod source;
mod store;
#[cfg(test)]
mod test_support;

pub use fetch::{
    DownloadAbort, DownloadError, DownloadReport, Sleeper, TokioSleeper, download_tiles,
    request_url,
};
pub use gml::{GmlError, RawFeature, annotate_root_counts, read_features, read_root_counts};
pub use merge::{CombineError, CombineReport, combine, finalize};
pub use proj::Projection;
pub use source::{DEFAULT_USER_AGENT, HttpTileSource, TileSource, TransportError};
pub use store::SqliteFeatureStore;
