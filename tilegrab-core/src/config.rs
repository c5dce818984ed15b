//! Run configuration consumed by the fetch and merge phases.
//!
//! The configuration is an explicit immutable value threaded through
//! every component; there is no global state. Parsing is strict about
//! structural errors but defers protocol knowledge (version strings,
//! CRS codes) to the components that interpret them.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{AxisConvention, BoundingBox, TileSpec, grid::tile_file_name};

/// Extension of the final output container.
const CONTAINER_EXTENSION: &str = "sqlite";

/// Configuration for one harvest run.
///
/// # Examples
/// ```
/// let raw = r#"{
///     "url": "https://wfs.example.test/service",
///     "version": "2.0.0",
///     "layer": "cadastre:parcels",
///     "projection": "EPSG:4326",
///     "bbox": {"west": -8.7, "south": 41.1, "east": -8.5, "north": 41.3},
///     "size": 0.1,
///     "interval": 2.0,
///     "tmpdir": "/tmp/tiles",
///     "outputfile": "/data/parcels.gml",
///     "uniqueid_field": "gml_id"
/// }"#;
/// let config: tilegrab_core::RunConfig = serde_json::from_str(raw).unwrap();
/// assert_eq!(config.output_basename(), "parcels");
/// assert_eq!(config.uniqueid_field(), Some("gml_id"));
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Base URL of the WFS endpoint.
    pub url: String,
    /// WFS protocol version string, e.g. `2.0.0`.
    pub version: String,
    /// Qualified layer (type) name to request.
    pub layer: String,
    /// CRS code requested from the server, e.g. `EPSG:4326`.
    pub projection: String,
    /// Extent to harvest, in the configured projection.
    pub bbox: BoundingBox,
    /// Tile edge length in projection units.
    pub size: f64,
    /// Politeness delay between requests in seconds; `0` disables it.
    #[serde(default)]
    pub interval: f64,
    /// Directory holding per-tile cache files across runs.
    pub tmpdir: PathBuf,
    /// Configured output file; its basename and extension also shape
    /// the cache file names.
    pub outputfile: PathBuf,
    /// Field whose value must be unique in the final output. The
    /// literal `none` (any case) means no deduplication.
    #[serde(default)]
    uniqueid_field: Option<String>,
}

/// Errors raised when loading or validating a [`RunConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The configuration document could not be decoded.
    #[error("failed to parse configuration from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The tile size was zero, negative, or non-finite.
    #[error("tile size {size} must be a positive finite number")]
    InvalidSize { size: f64 },
    /// The request interval was negative or non-finite.
    #[error("request interval {interval} must be zero or a positive finite number")]
    InvalidInterval { interval: f64 },
    /// The output file has no usable basename.
    #[error("output file {path:?} has no basename to derive cache names from")]
    MissingOutputName { path: PathBuf },
}

impl RunConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate numeric fields and derived-name requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(ConfigError::InvalidSize { size: self.size });
        }
        if !self.interval.is_finite() || self.interval < 0.0 {
            return Err(ConfigError::InvalidInterval {
                interval: self.interval,
            });
        }
        if self.output_basename().is_empty() {
            return Err(ConfigError::MissingOutputName {
                path: self.outputfile.clone(),
            });
        }
        Ok(())
    }

    /// Axis convention resolved once from the configured CRS.
    pub fn axis_convention(&self) -> AxisConvention {
        AxisConvention::from_crs(&self.projection)
    }

    /// Basename of the configured output file, without extension.
    pub fn output_basename(&self) -> String {
        self.outputfile
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Extension of the configured output file, dot included; cache
    /// files reuse it so tile documents keep their native suffix.
    pub fn output_extension(&self) -> String {
        self.outputfile
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Cache path for one tile of the plan.
    pub fn tile_path(&self, tile: &TileSpec) -> PathBuf {
        self.tmpdir.join(tile_file_name(
            &self.output_basename(),
            tile.origin_x,
            tile.origin_y,
            &self.output_extension(),
        ))
    }

    /// Cache path of the seed tile.
    ///
    /// Derived exactly once, from the bounding box minimum corner
    /// ordered by the run's axis convention. This is the same
    /// derivation the planner and fetcher use, so the merge phase
    /// always finds the tile the fetch phase wrote.
    pub fn seed_path(&self) -> PathBuf {
        let (x, y) = self
            .axis_convention()
            .order(self.bbox.west(), self.bbox.south());
        self.tmpdir.join(tile_file_name(
            &self.output_basename(),
            x,
            y,
            &self.output_extension(),
        ))
    }

    /// Final output container path: the configured output file with its
    /// extension replaced by the container format's.
    pub fn container_path(&self) -> PathBuf {
        self.outputfile.with_extension(CONTAINER_EXTENSION)
    }

    /// Path of the persisted spatial index artefact, next to the
    /// container.
    pub fn index_path(&self) -> PathBuf {
        let mut name = self.container_path().into_os_string();
        name.push(".idx");
        PathBuf::from(name)
    }

    /// Configured unique-key field, with the `none` sentinel mapped to
    /// "no deduplication".
    pub fn uniqueid_field(&self) -> Option<&str> {
        self.uniqueid_field
            .as_deref()
            .filter(|field| !field.is_empty() && !field.eq_ignore_ascii_case("none"))
    }

    /// Politeness delay between requests, when one is configured.
    pub fn request_interval(&self) -> Option<Duration> {
        (self.interval > 0.0).then(|| Duration::from_secs_f64(self.interval))
    }

    /// Whether the server's protocol version reports counts through the
    /// split `numberReturned`/`numberMatched` attributes.
    ///
    /// The split attributes arrived with version 2.0.0, so the major
    /// component decides; an unparsable version is treated as pre-2.0.
    pub fn reports_split_counts(&self) -> bool {
        self.version
            .split('.')
            .next()
            .and_then(|major| major.trim().parse::<u32>().ok())
            .is_some_and(|major| major >= 2)
    }
}
