//! Persisted spatial index artefact.
//!
//! The final output container is accompanied by an R*-tree artefact
//! over the feature envelopes, so consumers can run bounding-box
//! queries without scanning the container. The on-disk format is a
//! fixed header (magic + version) followed by a `bincode` payload.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use bincode::{deserialize_from, serialize_into};
use rstar::{AABB, RTree, RTreeObject};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File identifier for persisted spatial indices.
pub(crate) const SPATIAL_INDEX_MAGIC: [u8; 4] = *b"TGSI";

/// Supported version of the persisted spatial index format.
pub(crate) const SPATIAL_INDEX_VERSION: u16 = 1;

/// One indexed feature: its row identifier in the output container and
/// the envelope of its geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedFeature {
    /// Row identifier inside the output container.
    pub row_id: i64,
    /// Unique-key value of the feature, when one was extracted.
    pub fid: Option<String>,
    /// Envelope minimum corner `(x, y)`.
    pub min: [f64; 2],
    /// Envelope maximum corner `(x, y)`.
    pub max: [f64; 2],
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SpatialIndexFile {
    magic: [u8; 4],
    version: u16,
    entries: Vec<IndexedFeature>,
}

/// Error emitted when loading or validating a persisted spatial index.
#[derive(Debug, Error)]
pub enum SpatialIndexError {
    /// The index file could not be read from disk.
    #[error("failed to read spatial index from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The serialised entries could not be decoded.
    #[error("failed to decode spatial index from {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    /// The file did not contain the expected header.
    #[error("invalid spatial index magic: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: [u8; 4], found: [u8; 4] },
    /// The reader encountered an unsupported format version.
    #[error("unsupported spatial index version {found}; supported version is {supported}")]
    UnsupportedVersion { found: u16, supported: u16 },
}

/// Error emitted when serialising a spatial index to disk.
#[derive(Debug, Error)]
pub enum SpatialIndexWriteError {
    /// Writing bytes to disk failed.
    #[error("failed to write spatial index to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The in-memory representation could not be encoded.
    #[error("failed to encode spatial index for {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

/// Persist a spatial index artefact for the given entries. Existing
/// files are truncated.
///
/// The `bincode` encoding of [`SpatialIndexFile`] starts with the raw
/// magic bytes and the little-endian version, so the loader can
/// validate the header before decoding the entry list.
pub fn write_spatial_index(
    path: &Path,
    entries: &[IndexedFeature],
) -> Result<(), SpatialIndexWriteError> {
    let mut file = File::create(path).map_err(|source| SpatialIndexWriteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let payload = SpatialIndexFile {
        magic: SPATIAL_INDEX_MAGIC,
        version: SPATIAL_INDEX_VERSION,
        entries: entries.to_vec(),
    };
    serialize_into(&mut file, &payload).map_err(|source| SpatialIndexWriteError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_all()
        .map_err(|source| SpatialIndexWriteError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Load the entries of a persisted spatial index, validating the
/// header.
pub fn load_spatial_index(path: &Path) -> Result<Vec<IndexedFeature>, SpatialIndexError> {
    let mut file = File::open(path).map_err(|source| SpatialIndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut magic = [0_u8; 4];
    file.read_exact(&mut magic)
        .map_err(|source| SpatialIndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if magic != SPATIAL_INDEX_MAGIC {
        return Err(SpatialIndexError::InvalidMagic {
            expected: SPATIAL_INDEX_MAGIC,
            found: magic,
        });
    }

    let mut version_bytes = [0_u8; 2];
    file.read_exact(&mut version_bytes)
        .map_err(|source| SpatialIndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let version = u16::from_le_bytes(version_bytes);
    if version != SPATIAL_INDEX_VERSION {
        return Err(SpatialIndexError::UnsupportedVersion {
            found: version,
            supported: SPATIAL_INDEX_VERSION,
        });
    }

    deserialize_from(&mut file).map_err(|source| SpatialIndexError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Build an in-memory R*-tree from index entries.
pub fn build_rtree(entries: Vec<IndexedFeature>) -> RTree<IndexedFeature> {
    RTree::bulk_load(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    fn entry(row_id: i64, min: [f64; 2], max: [f64; 2]) -> IndexedFeature {
        IndexedFeature {
            row_id,
            fid: Some(format!("f{row_id}")),
            min,
            max,
        }
    }

    #[fixture]
    fn index_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("parcels.sqlite.idx");
        (dir, path)
    }

    #[rstest]
    fn round_trips_entries(#[from(index_path)] (_dir, path): (TempDir, PathBuf)) {
        let entries = vec![
            entry(1, [0.0, 0.0], [1.0, 1.0]),
            entry(2, [2.0, 2.0], [3.0, 3.5]),
        ];
        write_spatial_index(&path, &entries).expect("persist index");
        let loaded = load_spatial_index(&path).expect("load index");
        assert_eq!(loaded, entries);
    }

    #[rstest]
    fn rtree_answers_envelope_queries(#[from(index_path)] (_dir, path): (TempDir, PathBuf)) {
        let entries = vec![
            entry(1, [0.0, 0.0], [1.0, 1.0]),
            entry(2, [10.0, 10.0], [11.0, 11.0]),
        ];
        write_spatial_index(&path, &entries).expect("persist index");

        let tree = build_rtree(load_spatial_index(&path).expect("load index"));
        let hits: Vec<i64> = tree
            .locate_in_envelope_intersecting(&AABB::from_corners([-0.5, -0.5], [0.5, 0.5]))
            .map(|feature| feature.row_id)
            .collect();
        assert_eq!(hits, vec![1]);
    }

    #[rstest]
    fn rejects_missing_file() {
        let err = load_spatial_index(Path::new("/nonexistent/index"))
            .expect_err("missing file should fail");
        assert!(matches!(err, SpatialIndexError::Io { .. }));
    }

    #[rstest]
    fn rejects_invalid_magic(#[from(index_path)] (_dir, path): (TempDir, PathBuf)) {
        std::fs::write(&path, b"BAD!xx").expect("write corrupt header");
        let err = load_spatial_index(&path).expect_err("invalid magic should fail");
        assert!(matches!(err, SpatialIndexError::InvalidMagic { .. }));
    }

    #[rstest]
    fn rejects_unsupported_version(#[from(index_path)] (_dir, path): (TempDir, PathBuf)) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SPATIAL_INDEX_MAGIC);
        bytes.extend_from_slice(&(SPATIAL_INDEX_VERSION + 1).to_le_bytes());
        std::fs::write(&path, bytes).expect("write future version");
        let err = load_spatial_index(&path).expect_err("future version should fail");
        assert!(matches!(
            err,
            SpatialIndexError::UnsupportedVersion { found, supported }
                if found == SPATIAL_INDEX_VERSION + 1 && supported == SPATIAL_INDEX_VERSION
        ));
    }

    #[rstest]
    fn rejects_truncated_payload(#[from(index_path)] (_dir, path): (TempDir, PathBuf)) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SPATIAL_INDEX_MAGIC);
        bytes.extend_from_slice(&SPATIAL_INDEX_VERSION.to_le_bytes());
        std::fs::write(&path, bytes).expect("write header only");
        let err = load_spatial_index(&path).expect_err("decode should fail");
        assert!(matches!(err, SpatialIndexError::Decode { .. }));
    }
}
