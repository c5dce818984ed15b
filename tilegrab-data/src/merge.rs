//! The combine phase: fold cached tiles into one staged dataset.
//!
//! The seed tile (the plan's first tile) anchors the merge: its counts
//! decide which count kinds are tracked for the run, and its document
//! is the one whose root counts are rewritten with the aggregated
//! totals. Tiles whose tracked counts are all zero are skipped without
//! touching the store.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use tilegrab_core::{CountTotals, PersistSummary, RunConfig, StoreError, TileCounts, VectorStore};

use crate::gml::{self, GmlError};

/// Outcome of a combine pass over the tile cache.
#[derive(Debug)]
pub struct CombineReport {
    /// Aggregated counts across every merged tile.
    pub totals: CountTotals,
    /// Features imported into the staging store.
    pub imported: u64,
    /// Tiles skipped because every tracked count was zero.
    pub skipped_empty: u64,
    /// Features skipped by the store as unique-key duplicates.
    pub skipped_duplicates: u64,
    /// The seed document with its root counts rewritten to the
    /// aggregated totals. In-memory only; the cached seed tile on disk
    /// is never modified.
    pub annotated_seed: Vec<u8>,
}

/// Errors raised while combining cached tiles.
#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    /// The seed tile is missing from the cache, so there is nothing to
    /// anchor the merge on.
    #[error("seed tile {path:?} is not in the cache; run the download phase first")]
    MissingSeed { path: PathBuf },
    /// The tile cache directory could not be scanned.
    #[error("failed to scan tile cache {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A cached tile document could not be read or parsed.
    #[error(transparent)]
    Document(#[from] GmlError),
    /// The staging store rejected an import.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Merge every cached tile of this run into `store`.
///
/// The seed tile is imported first; the remaining tiles matching the
/// run's cache-name pattern follow in lexicographic order so repeated
/// runs stage rows identically.
pub fn combine(
    config: &RunConfig,
    store: &mut dyn VectorStore,
) -> Result<CombineReport, CombineError> {
    let seed_path = config.seed_path();
    if !seed_path.exists() {
        return Err(CombineError::MissingSeed { path: seed_path });
    }

    let seed_counts = gml::read_root_counts(&seed_path)?;
    let mut totals = CountTotals::from_seed(&seed_counts);
    if totals.untracked() {
        info!("seed tile reports no counts; merging every tile unconditionally");
    }

    let mut report_imported = 0_u64;
    let mut skipped_duplicates = 0_u64;
    let seed_summary = store.import_tile(&seed_path)?;
    report_imported += seed_summary.imported;
    skipped_duplicates += seed_summary.skipped;
    debug!(
        "seed {}: imported {} features",
        seed_path.display(),
        seed_summary.imported
    );

    let mut skipped_empty = 0_u64;
    for path in sibling_tiles(config, &seed_path)? {
        let counts = gml::read_root_counts(&path)?;
        if lacks_tracked_attribute(&totals, &counts) {
            warn!(
                "{}: missing a tracked count attribute, contributing zero",
                path.display()
            );
        }
        totals.accumulate(&counts);
        if totals.tile_is_empty(&counts) {
            debug!("{}: empty tile, skipping import", path.display());
            skipped_empty += 1;
            continue;
        }
        let summary = store.import_tile(&path)?;
        report_imported += summary.imported;
        skipped_duplicates += summary.skipped;
        debug!(
            "{}: imported {}, skipped {} duplicates",
            path.display(),
            summary.imported,
            summary.skipped
        );
    }

    let seed_bytes = fs::read(&seed_path).map_err(|source| GmlError::Read {
        path: seed_path.clone(),
        source,
    })?;
    let annotated_seed = gml::annotate_root_counts(&seed_path, &seed_bytes, &totals)?;

    info!(
        "combine complete: {report_imported} features imported, \
         {skipped_empty} empty tiles, {skipped_duplicates} duplicates skipped"
    );
    Ok(CombineReport {
        totals,
        imported: report_imported,
        skipped_empty,
        skipped_duplicates,
        annotated_seed,
    })
}

/// Deduplicate the staged dataset when a unique key is configured, then
/// persist it to the run's output container and spatial index.
pub fn finalize(
    store: &mut dyn VectorStore,
    config: &RunConfig,
) -> Result<PersistSummary, StoreError> {
    if let Some(field) = config.uniqueid_field() {
        let removed = store.dedup_by(field)?;
        info!("deduplicated by {field}: removed {removed} rows");
    }
    let output = config.container_path();
    let summary = store.persist(&output, &config.index_path())?;
    info!(
        "persisted {} rows and {} index entries to {}",
        summary.rows,
        summary.indexed,
        output.display()
    );
    Ok(summary)
}

/// Whether a tile omits an attribute the run is tracking.
fn lacks_tracked_attribute(totals: &CountTotals, tile: &TileCounts) -> bool {
    (totals.matched().is_some() && tile.matched.is_none())
        || (totals.returned().is_some() && tile.returned.is_none())
        || (totals.of_features().is_some() && tile.of_features.is_none())
}

/// Cached tiles of this run other than the seed, sorted by name.
fn sibling_tiles(config: &RunConfig, seed_path: &Path) -> Result<Vec<PathBuf>, CombineError> {
    let prefix = format!("{}_", config.output_basename());
    let extension = config.output_extension();
    let scan_error = |source: io::Error| CombineError::Scan {
        path: config.tmpdir.clone(),
        source,
    };

    let mut tiles = Vec::new();
    for entry in fs::read_dir(&config.tmpdir).map_err(scan_error)? {
        let path = entry.map_err(scan_error)?.path();
        if path == *seed_path {
            continue;
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        if name.starts_with(&prefix) && name.ends_with(&extension) {
            tiles.push(path);
        }
    }
    tiles.sort();
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteFeatureStore;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    const SEED: &str = r#"<coll xmlns:gml="g" numberReturned="10">
  <member><f gml:id="s.1"><gml:pos>0.1 0.1</gml:pos></f></member>
</coll>"#;

    const EMPTY_TILE: &str = r#"<coll xmlns:gml="g" numberReturned="0"/>"#;

    const THIRD_TILE: &str = r#"<coll xmlns:gml="g" numberReturned="5">
  <member><f gml:id="t.1"><gml:pos>1.2 0.3</gml:pos></f></member>
</coll>"#;

    fn config(dir: &TempDir, uniqueid: &str) -> RunConfig {
        serde_json::from_value(serde_json::json!({
            "url": "https://wfs.example.test/service",
            "version": "2.0.0",
            "layer": "cadastre:parcels",
            "projection": "EPSG:3763",
            "bbox": {"west": 0.0, "south": 0.0, "east": 2.0, "north": 1.0},
            "size": 1.0,
            "tmpdir": dir.path(),
            "outputfile": dir.path().join("parcels.gml"),
            "uniqueid_field": uniqueid
        }))
        .expect("valid test configuration")
    }

    fn write_tile(dir: &TempDir, name: &str, body: &str) {
        std::fs::write(dir.path().join(name), body).expect("write tile document");
    }

    #[fixture]
    fn scratch() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    #[rstest]
    fn merges_tiles_and_aggregates_counts(scratch: TempDir) {
        write_tile(&scratch, "parcels_0_0.gml", SEED);
        write_tile(&scratch, "parcels_1_0.gml", EMPTY_TILE);
        write_tile(&scratch, "parcels_2_0.gml", THIRD_TILE);
        let config = config(&scratch, "none");
        let mut store = SqliteFeatureStore::open(&config).expect("open store");

        let report = combine(&config, &mut store).expect("combine");

        assert_eq!(report.totals.returned(), Some(15));
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(report.skipped_duplicates, 0);
        assert_eq!(store.staged_rows().expect("count rows"), 2);
    }

    #[rstest]
    fn annotated_seed_carries_aggregated_totals(scratch: TempDir) {
        write_tile(&scratch, "parcels_0_0.gml", SEED);
        write_tile(&scratch, "parcels_1_0.gml", THIRD_TILE);
        let config = config(&scratch, "none");
        let mut store = SqliteFeatureStore::open(&config).expect("open store");

        let report = combine(&config, &mut store).expect("combine");
        let annotated = String::from_utf8(report.annotated_seed).expect("utf-8 seed");

        assert!(annotated.contains(r#"numberReturned="15""#));
        assert!(annotated.contains("s.1"), "seed body is preserved");
        // The cached seed tile itself is untouched.
        let on_disk =
            std::fs::read_to_string(scratch.path().join("parcels_0_0.gml")).expect("read seed");
        assert!(on_disk.contains(r#"numberReturned="10""#));
    }

    #[rstest]
    fn missing_seed_is_an_error(scratch: TempDir) {
        write_tile(&scratch, "parcels_1_0.gml", THIRD_TILE);
        let config = config(&scratch, "none");
        let mut store = SqliteFeatureStore::open(&config).expect("open store");

        let err = combine(&config, &mut store).expect_err("missing seed should fail");
        assert!(matches!(err, CombineError::MissingSeed { .. }));
    }

    #[rstest]
    fn unrelated_files_in_cache_are_ignored(scratch: TempDir) {
        write_tile(&scratch, "parcels_0_0.gml", SEED);
        write_tile(&scratch, "roads_0_0.gml", THIRD_TILE);
        write_tile(&scratch, "parcels_notes.txt", "not a tile");
        let config = config(&scratch, "none");
        let mut store = SqliteFeatureStore::open(&config).expect("open store");

        let report = combine(&config, &mut store).expect("combine");

        assert_eq!(report.imported, 1);
        assert_eq!(report.totals.returned(), Some(10));
    }

    #[rstest]
    fn finalize_dedups_then_persists(scratch: TempDir) {
        write_tile(&scratch, "parcels_0_0.gml", SEED);
        // The same feature straddles the tile boundary and appears in
        // both tiles.
        write_tile(
            &scratch,
            "parcels_1_0.gml",
            r#"<coll xmlns:gml="g" numberReturned="2">
  <member><f gml:id="s.1"><gml:pos>0.1 0.1</gml:pos></f></member>
  <member><f gml:id="t.9"><gml:pos>1.9 0.9</gml:pos></f></member>
</coll>"#,
        );
        let config = config(&scratch, "gml_id");
        let mut store = SqliteFeatureStore::open(&config).expect("open store");

        let report = combine(&config, &mut store).expect("combine");
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped_duplicates, 1);

        let summary = finalize(&mut store, &config).expect("finalize");
        assert_eq!(summary.rows, 2);
        assert!(config.container_path().exists());
        assert!(config.index_path().exists());
    }

    #[rstest]
    fn finalize_without_unique_key_skips_dedup(scratch: TempDir) {
        write_tile(&scratch, "parcels_0_0.gml", SEED);
        let config = config(&scratch, "none");
        let mut store = SqliteFeatureStore::open(&config).expect("open store");
        combine(&config, &mut store).expect("combine");

        let summary = finalize(&mut store, &config).expect("finalize");
        assert_eq!(summary.rows, 1);
    }

    #[rstest]
    fn empty_self_closing_seed_still_receives_totals(scratch: TempDir) {
        write_tile(&scratch, "parcels_0_0.gml", r#"<coll numberReturned="0"/>"#);
        write_tile(&scratch, "parcels_1_0.gml", THIRD_TILE);
        let config = config(&scratch, "none");
        let mut store = SqliteFeatureStore::open(&config).expect("open store");

        let report = combine(&config, &mut store).expect("combine");

        assert_eq!(report.totals.returned(), Some(5));
        let annotated = String::from_utf8(report.annotated_seed).expect("utf-8 seed");
        assert!(
            annotated.contains(r#"numberReturned="5""#),
            "aggregated totals belong on the seed root, got: {annotated}"
        );
    }

    #[rstest]
    fn tile_without_tracked_attribute_contributes_zero(scratch: TempDir) {
        write_tile(&scratch, "parcels_0_0.gml", SEED);
        // No count attributes at all: the tracked kind reads as zero.
        write_tile(
            &scratch,
            "parcels_1_0.gml",
            r#"<coll xmlns:gml="g">
  <member><f gml:id="u.1"><gml:pos>1.5 0.5</gml:pos></f></member>
</coll>"#,
        );
        let config = config(&scratch, "none");
        let mut store = SqliteFeatureStore::open(&config).expect("open store");

        let report = combine(&config, &mut store).expect("combine");

        assert_eq!(report.totals.returned(), Some(10));
        assert_eq!(report.skipped_empty, 1);
    }
}
