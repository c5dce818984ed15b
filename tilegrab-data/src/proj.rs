//! Reprojection of tile coordinates into the canonical output CRS.
//!
//! The canonical CRS is WGS84. Geographic input passes through
//! unchanged (axis ordering is handled before this layer), Web
//! Mercator uses the closed-form spherical inverse, and any other CRS
//! passes through untouched so the run still completes with the
//! server's native coordinates.

use geo::Coord;

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Projection of the configured CRS, resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// EPSG:4326; coordinates are already longitude/latitude.
    Wgs84,
    /// EPSG:3857 spherical Web Mercator.
    WebMercator,
    /// Any other CRS: coordinates pass through unchanged.
    Passthrough,
}

impl Projection {
    /// Resolve a projection from a CRS code such as `EPSG:3857`.
    pub fn from_crs(crs: &str) -> Self {
        if crs.eq_ignore_ascii_case("EPSG:4326") {
            Self::Wgs84
        } else if crs.eq_ignore_ascii_case("EPSG:3857") || crs.eq_ignore_ascii_case("EPSG:900913") {
            Self::WebMercator
        } else {
            Self::Passthrough
        }
    }

    /// Convert a coordinate in this projection to the canonical CRS.
    pub fn to_canonical(&self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Self::Wgs84 | Self::Passthrough => coord,
            Self::WebMercator => {
                let lon = (coord.x / EARTH_RADIUS_M).to_degrees();
                let lat = (2.0 * (coord.y / EARTH_RADIUS_M).exp().atan()
                    - std::f64::consts::FRAC_PI_2)
                    .to_degrees();
                Coord { x: lon, y: lat }
            }
        }
    }
}
