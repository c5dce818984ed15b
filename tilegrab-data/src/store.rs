//! SQLite-backed implementation of the staging store.
//!
//! Features are staged in an in-memory database while tiles merge, then
//! copied to the final container in one backup pass. The container is a
//! plain SQLite file with a single `features` table; the spatial index
//! artefact is written next to it from the staged envelopes.

use std::{fs, path::Path, time::Duration};

use log::info;
use rusqlite::{Connection, params};
use tilegrab_core::{
    AxisConvention, ImportSummary, IndexedFeature, PersistSummary, RunConfig, StoreError,
    VectorStore, write_spatial_index,
};

use crate::gml;
use crate::proj::Projection;

const SCHEMA: &str = "CREATE TABLE features (
    fid  TEXT,
    minx REAL,
    miny REAL,
    maxx REAL,
    maxy REAL,
    member TEXT NOT NULL
)";

/// Staging store holding merged features in an in-memory SQLite
/// database until they are persisted.
pub struct SqliteFeatureStore {
    conn: Connection,
    uniqueid_field: Option<String>,
    convention: AxisConvention,
    projection: Projection,
}

impl SqliteFeatureStore {
    /// Create an empty staging store for one run.
    ///
    /// When the configuration names a unique-key field, a unique index
    /// on the key column makes conflicting imports skip instead of
    /// duplicating. SQLite treats `NULL` keys as distinct, so features
    /// without a key are always kept.
    pub fn open(config: &RunConfig) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Staging {
            source: Box::new(source),
        })?;
        conn.execute(SCHEMA, [])
            .map_err(|source| StoreError::Staging {
                source: Box::new(source),
            })?;
        let uniqueid_field = config.uniqueid_field().map(str::to_owned);
        if uniqueid_field.is_some() {
            conn.execute("CREATE UNIQUE INDEX features_fid ON features (fid)", [])
                .map_err(|source| StoreError::Staging {
                    source: Box::new(source),
                })?;
        }
        let projection = Projection::from_crs(&config.projection);
        if projection == Projection::Passthrough {
            info!(
                "no reprojection for {}; envelopes keep the server's native coordinates",
                config.projection
            );
        }
        Ok(Self {
            conn,
            uniqueid_field,
            convention: config.axis_convention(),
            projection,
        })
    }

    /// Number of features currently staged.
    pub fn staged_rows(&self) -> Result<u64, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM features", [], |row| row.get(0))
            .map_err(|source| StoreError::Staging {
                source: Box::new(source),
            })
    }

    fn index_entries(&self) -> Result<Vec<IndexedFeature>, rusqlite::Error> {
        let mut statement = self.conn.prepare(
            "SELECT rowid, fid, minx, miny, maxx, maxy FROM features
             WHERE minx IS NOT NULL ORDER BY rowid",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(IndexedFeature {
                row_id: row.get(0)?,
                fid: row.get(1)?,
                min: [row.get(2)?, row.get(3)?],
                max: [row.get(4)?, row.get(5)?],
            })
        })?;
        rows.collect()
    }
}

impl VectorStore for SqliteFeatureStore {
    fn import_tile(&mut self, path: &Path) -> Result<ImportSummary, StoreError> {
        let features = gml::read_features(
            path,
            self.uniqueid_field.as_deref(),
            self.convention,
            self.projection,
        )
        .map_err(|source| StoreError::Import {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;

        let import_error = |source: rusqlite::Error| StoreError::Import {
            path: path.to_path_buf(),
            source: Box::new(source),
        };
        let tx = self.conn.transaction().map_err(import_error)?;
        let mut summary = ImportSummary::default();
        for feature in &features {
            let (min, max) = match feature.envelope {
                Some(rect) => (Some(rect.min()), Some(rect.max())),
                None => (None, None),
            };
            let changed = tx
                .execute(
                    "INSERT OR IGNORE INTO features (fid, minx, miny, maxx, maxy, member)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        feature.fid,
                        min.map(|c| c.x),
                        min.map(|c| c.y),
                        max.map(|c| c.x),
                        max.map(|c| c.y),
                        feature.member,
                    ],
                )
                .map_err(import_error)?;
            if changed == 0 {
                summary.skipped += 1;
            } else {
                summary.imported += 1;
            }
        }
        tx.commit().map_err(import_error)?;
        Ok(summary)
    }

    fn dedup_by(&mut self, field: &str) -> Result<u64, StoreError> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM features
                 WHERE fid IS NOT NULL
                   AND rowid NOT IN (
                     SELECT MIN(rowid) FROM features
                     WHERE fid IS NOT NULL GROUP BY fid
                   )",
                [],
            )
            .map_err(|source| StoreError::Dedup {
                field: field.to_owned(),
                source: Box::new(source),
            })?;
        Ok(removed as u64)
    }

    fn persist(&mut self, output: &Path, index: &Path) -> Result<PersistSummary, StoreError> {
        match fs::remove_file(output) {
            Ok(()) => {}
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::OutputDeletion {
                    path: output.to_path_buf(),
                    source,
                });
            }
        }

        let persist_error = |source: rusqlite::Error| StoreError::Persist {
            path: output.to_path_buf(),
            source: Box::new(source),
        };
        let mut container = Connection::open(output).map_err(persist_error)?;
        let backup =
            rusqlite::backup::Backup::new(&self.conn, &mut container).map_err(persist_error)?;
        backup
            .run_to_completion(64, Duration::from_millis(0), None)
            .map_err(persist_error)?;
        drop(backup);
        container.close().map_err(|(_, source)| persist_error(source))?;

        let rows = self.staged_rows()?;
        let entries = self
            .index_entries()
            .map_err(|source| StoreError::Persist {
                path: index.to_path_buf(),
                source: Box::new(source),
            })?;
        write_spatial_index(index, &entries).map_err(|source| StoreError::Persist {
            path: index.to_path_buf(),
            source: Box::new(source),
        })?;

        Ok(PersistSummary {
            rows,
            indexed: entries.len() as u64,
        })
    }
}

impl std::fmt::Debug for SqliteFeatureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteFeatureStore")
            .field("uniqueid_field", &self.uniqueid_field)
            .field("convention", &self.convention)
            .field("projection", &self.projection)
            .finish_non_exhaustive()
    }
}
