//! Bounding boxes in a named coordinate reference system.

use geo::Coord;
use serde::Deserialize;
use thiserror::Error;

/// A rectangular extent expressed as west/south/east/north edges.
///
/// The constructor enforces `west < east` and `south < north`, so a
/// validated box always has positive width and height.
///
/// # Examples
/// ```
/// use tilegrab_core::BoundingBox;
///
/// # fn main() -> Result<(), tilegrab_core::BoundingBoxError> {
/// let bbox = BoundingBox::new(0.0, 0.0, 2.0, 2.0)?;
/// assert_eq!(bbox.min_corner().x, 0.0);
/// assert_eq!(bbox.max_corner().y, 2.0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "BboxEdges")]
pub struct BoundingBox {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

/// Errors returned by [`BoundingBox::new`].
#[derive(Debug, Error, PartialEq)]
pub enum BoundingBoxError {
    /// The west edge was not strictly less than the east edge.
    #[error("bounding box west edge {west} must be less than east edge {east}")]
    InvertedLongitude { west: f64, east: f64 },
    /// The south edge was not strictly less than the north edge.
    #[error("bounding box south edge {south} must be less than north edge {north}")]
    InvertedLatitude { south: f64, north: f64 },
    /// An edge was NaN or infinite.
    #[error("bounding box edges must be finite")]
    NonFinite,
}

impl BoundingBox {
    /// Validates and constructs a [`BoundingBox`].
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, BoundingBoxError> {
        if ![west, south, east, north].iter().all(|v| v.is_finite()) {
            return Err(BoundingBoxError::NonFinite);
        }
        if west >= east {
            return Err(BoundingBoxError::InvertedLongitude { west, east });
        }
        if south >= north {
            return Err(BoundingBoxError::InvertedLatitude { south, north });
        }
        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    /// West edge of the box.
    pub fn west(&self) -> f64 {
        self.west
    }

    /// South edge of the box.
    pub fn south(&self) -> f64 {
        self.south
    }

    /// East edge of the box.
    pub fn east(&self) -> f64 {
        self.east
    }

    /// North edge of the box.
    pub fn north(&self) -> f64 {
        self.north
    }

    /// Lower-left corner `(west, south)`.
    pub fn min_corner(&self) -> Coord<f64> {
        Coord {
            x: self.west,
            y: self.south,
        }
    }

    /// Upper-right corner `(east, north)`.
    pub fn max_corner(&self) -> Coord<f64> {
        Coord {
            x: self.east,
            y: self.north,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BboxEdges {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

impl TryFrom<BboxEdges> for BoundingBox {
    type Error = BoundingBoxError;

    fn try_from(edges: BboxEdges) -> Result<Self, Self::Error> {
        Self::new(edges.west, edges.south, edges.east, edges.north)
    }
}
