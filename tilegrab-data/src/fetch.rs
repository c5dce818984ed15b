//! The download phase: one request per planned tile, cached on disk.
//!
//! The cache file name is the idempotency key — a tile whose file
//! already exists is never re-requested, which makes repeated runs
//! resumable. A transport failure is retried exactly once after a
//! fixed cooldown; a second failure aborts the download phase for the
//! whole run while leaving previously cached tiles in place.

use std::{
    fs::{self, File},
    path::PathBuf,
    time::Duration,
};

use async_trait::async_trait;
use log::{info, warn};
use tilegrab_core::{RunConfig, TileSpec, plan_tiles};

use crate::gml::{self, GmlError};
use crate::source::{TileSource, TransportError};

/// Cooldown slept between the first failure and the single retry.
const RETRY_COOLDOWN: Duration = Duration::from_secs(10);

/// Suspension seam for the cooldown and politeness sleeps.
///
/// Production uses [`TokioSleeper`]; tests substitute a recording stub
/// so retry scenarios run instantly.
#[async_trait(?Send)]
pub trait Sleeper {
    /// Suspend the download loop for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Default)]
pub struct TokioSleeper;

#[async_trait(?Send)]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Why the download phase stopped early.
#[derive(Debug)]
pub struct DownloadAbort {
    /// Cache path of the tile whose retry failed.
    pub tile: PathBuf,
    /// The transport error reported by the retry.
    pub error: TransportError,
}

/// Outcome of the download phase.
#[derive(Debug, Default)]
pub struct DownloadReport {
    /// Tiles fetched over the network in this run.
    pub fetched: u64,
    /// Tiles skipped because their cache file already existed.
    pub skipped: u64,
    /// Present when a tile failed twice and the phase stopped early.
    /// Tiles cached before the abort remain valid for a later combine.
    pub aborted: Option<DownloadAbort>,
}

/// Errors that end the download phase outside the retry protocol.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// A cache file could not be created or removed.
    #[error("failed to write cache file {path:?}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A fetched tile document could not be parsed.
    #[error(transparent)]
    Document(#[from] GmlError),
}

/// Fetch every planned tile that is not already cached.
///
/// Tiles are fetched strictly sequentially. After each network fetch
/// the tile's root counts are parsed and logged, and the configured
/// politeness interval (when > 0) is slept before the next request.
pub async fn download_tiles<S: TileSource + ?Sized>(
    source: &S,
    config: &RunConfig,
    sleeper: &dyn Sleeper,
) -> Result<DownloadReport, DownloadError> {
    let tiles = plan_tiles(&config.bbox, config.size, config.axis_convention());
    info!(
        "planned {} tiles of size {} over the configured extent",
        tiles.len(),
        config.size
    );

    let mut report = DownloadReport::default();
    for tile in &tiles {
        let path = config.tile_path(tile);
        if path.exists() {
            info!("cache hit, skipping {}", path.display());
            report.skipped += 1;
            continue;
        }

        let url = request_url(config, tile);
        info!("fetching {} from {url}", path.display());
        match fetch_with_retry(source, &url, &path, sleeper).await? {
            Ok(bytes) => {
                report.fetched += 1;
                log_tile_counts(config, &path, bytes)?;
            }
            Err(error) => {
                warn!("second failure, stopping download; cached tiles will still merge");
                report.aborted = Some(DownloadAbort {
                    tile: path,
                    error,
                });
                return Ok(report);
            }
        }

        if let Some(interval) = config.request_interval() {
            info!("waiting {}s before the next request", interval.as_secs_f64());
            sleeper.sleep(interval).await;
        }
    }

    Ok(report)
}

/// Build the GetFeature request for one tile.
///
/// The BBOX corners are emitted in the axis-convention order the
/// planner produced, so the request and the cache file name always
/// agree on coordinate roles.
pub fn request_url(config: &RunConfig, tile: &TileSpec) -> String {
    format!(
        "{url}?service=WFS&request=GetFeature&version={version}&typeNames={layer}&srsName={srid}&BBOX={west},{south},{east},{north}",
        url = config.url,
        version = config.version,
        layer = config.layer,
        srid = config.projection,
        west = tile.origin_x,
        south = tile.origin_y,
        east = tile.max_x(),
        north = tile.max_y(),
    )
}

/// One fetch attempt plus at most one retry after the cooldown.
///
/// The outer `Result` carries non-transport failures; the inner one is
/// the typed fetch outcome: `Ok(bytes)` on success, `Err(transport)`
/// after the retry also failed. On any failed attempt the partially
/// written cache file is removed so a later run re-requests the tile.
async fn fetch_with_retry<S: TileSource + ?Sized>(
    source: &S,
    url: &str,
    path: &std::path::Path,
    sleeper: &dyn Sleeper,
) -> Result<Result<u64, TransportError>, DownloadError> {
    match fetch_once(source, url, path).await? {
        Ok(bytes) => Ok(Ok(bytes)),
        Err(first) => {
            warn!(
                "transport failure for {}: {first}; cooling down {}s before retrying \
                 (consider a smaller size or a bigger interval)",
                path.display(),
                RETRY_COOLDOWN.as_secs()
            );
            sleeper.sleep(RETRY_COOLDOWN).await;
            fetch_once(source, url, path).await
        }
    }
}

async fn fetch_once<S: TileSource + ?Sized>(
    source: &S,
    url: &str,
    path: &std::path::Path,
) -> Result<Result<u64, TransportError>, DownloadError> {
    let mut file = File::create(path).map_err(|source| DownloadError::Cache {
        path: path.to_path_buf(),
        source,
    })?;
    match source.fetch_tile(url, &mut file).await {
        Ok(bytes) => Ok(Ok(bytes)),
        Err(error) => {
            drop(file);
            remove_partial(path)?;
            Ok(Err(error))
        }
    }
}

fn remove_partial(path: &std::path::Path) -> Result<(), DownloadError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DownloadError::Cache {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn log_tile_counts(
    config: &RunConfig,
    path: &std::path::Path,
    bytes: u64,
) -> Result<(), DownloadError> {
    let counts = gml::read_root_counts(path)?;
    if config.reports_split_counts() {
        info!(
            "{}: {bytes} bytes, returned={:?} matched={:?}",
            path.display(),
            counts.returned,
            counts.matched
        );
    } else {
        info!(
            "{}: {bytes} bytes, numberOfFeatures={:?}",
            path.display(),
            counts.of_features
        );
    }
    // A zero count never deletes a cache file; genuinely empty tiles
    // stay cached so later runs do not re-request them.
    Ok(())
}
