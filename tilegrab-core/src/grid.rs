//! Tile grid planning and coordinate-order conventions.

use crate::BoundingBox;

/// Coordinate ordering applied to request bounding boxes and cache
/// file names.
///
/// Geographic CRSs such as EPSG:4326 encode coordinates latitude-first,
/// so the roles of the west and south iteration axes are exchanged
/// before any string is built from a tile origin. The convention is
/// resolved once per run and threaded through the planner, the fetcher,
/// and the merge engine's seed lookup so all three agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisConvention {
    /// Coordinates are used in the conventional x-first order.
    NativeOrder,
    /// The west and south axes exchange roles (latitude-first CRS).
    GeographicSwap,
}

impl AxisConvention {
    /// Resolve the convention for a CRS code such as `EPSG:4326`.
    pub fn from_crs(crs: &str) -> Self {
        if crs.eq_ignore_ascii_case("EPSG:4326") {
            Self::GeographicSwap
        } else {
            Self::NativeOrder
        }
    }

    /// Order a raw `(west, south)` pair according to the convention.
    pub fn order(&self, west: f64, south: f64) -> (f64, f64) {
        match self {
            Self::NativeOrder => (west, south),
            Self::GeographicSwap => (south, west),
        }
    }
}

/// A single tile: lower-left corner plus edge length, already expressed
/// in the run's axis convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileSpec {
    /// First-axis origin of the tile.
    pub origin_x: f64,
    /// Second-axis origin of the tile.
    pub origin_y: f64,
    /// Edge length on both axes.
    pub size: f64,
}

impl TileSpec {
    /// Far edge of the tile on the first axis.
    pub fn max_x(&self) -> f64 {
        self.origin_x + self.size
    }

    /// Far edge of the tile on the second axis.
    pub fn max_y(&self) -> f64 {
        self.origin_y + self.size
    }
}

/// Compute the ordered tile cover of `bbox` with edge length `size`.
///
/// Both axes are stepped independently from the box minimum toward the
/// maximum, stopping strictly before the far edge: when an extent is
/// not an exact multiple of `size` the final partial strip is dropped,
/// not shrunk. Callers that need full coverage must size tiles to
/// divide the extent evenly.
///
/// The output is the Cartesian product of the two per-axis sequences
/// with the first axis as the outer loop. Under
/// [`AxisConvention::GeographicSwap`] the west and south sequences
/// exchange roles before pairing, which changes every derived request
/// string and cache file name but not the covered area.
///
/// # Examples
/// ```
/// use tilegrab_core::{AxisConvention, BoundingBox, plan_tiles};
///
/// # fn main() -> Result<(), tilegrab_core::BoundingBoxError> {
/// let bbox = BoundingBox::new(0.0, 0.0, 2.0, 2.0)?;
/// let tiles = plan_tiles(&bbox, 1.0, AxisConvention::NativeOrder);
/// assert_eq!(tiles.len(), 4);
/// assert_eq!((tiles[0].origin_x, tiles[0].origin_y), (0.0, 0.0));
/// # Ok(())
/// # }
/// ```
pub fn plan_tiles(bbox: &BoundingBox, size: f64, convention: AxisConvention) -> Vec<TileSpec> {
    let west_range = axis_steps(bbox.west(), bbox.east(), size);
    let south_range = axis_steps(bbox.south(), bbox.north(), size);

    let (outer, inner) = match convention {
        AxisConvention::NativeOrder => (west_range, south_range),
        AxisConvention::GeographicSwap => (south_range, west_range),
    };

    let mut tiles = Vec::with_capacity(outer.len() * inner.len());
    for &x in &outer {
        for &y in &inner {
            tiles.push(TileSpec {
                origin_x: x,
                origin_y: y,
                size,
            });
        }
    }
    tiles
}

/// Deterministic cache file name for a tile origin.
///
/// The name doubles as the idempotency key for the fetch phase: an
/// existing file means the tile has already been fetched. The origin is
/// expected to be in axis-convention order already (see
/// [`plan_tiles`]).
pub fn tile_file_name(basename: &str, origin_x: f64, origin_y: f64, extension: &str) -> String {
    format!("{basename}_{origin_x}_{origin_y}{extension}")
}

fn axis_steps(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let mut values = Vec::new();
    let mut current = start;
    while current < stop {
        values.push(current);
        current += step;
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn bbox(west: f64, south: f64, east: f64, north: f64) -> BoundingBox {
        BoundingBox::new(west, south, east, north).expect("valid test box")
    }

    #[rstest]
    #[case("EPSG:4326", AxisConvention::GeographicSwap)]
    #[case("epsg:4326", AxisConvention::GeographicSwap)]
    #[case("EPSG:3763", AxisConvention::NativeOrder)]
    #[case("EPSG:3857", AxisConvention::NativeOrder)]
    fn resolves_convention_from_crs(#[case] crs: &str, #[case] expected: AxisConvention) {
        assert_eq!(AxisConvention::from_crs(crs), expected);
    }

    #[rstest]
    fn plans_exactly_divisible_extent() {
        let tiles = plan_tiles(&bbox(0.0, 0.0, 2.0, 2.0), 1.0, AxisConvention::NativeOrder);
        let origins: Vec<(f64, f64)> = tiles.iter().map(|t| (t.origin_x, t.origin_y)).collect();
        assert_eq!(
            origins,
            vec![(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)]
        );
    }

    #[rstest]
    fn drops_partial_strip_near_upper_bound() {
        // 2.5 wide at size 1: origins 0 and 1 only, the half-tile at 2 is absent.
        let tiles = plan_tiles(&bbox(0.0, 0.0, 2.5, 1.0), 1.0, AxisConvention::NativeOrder);
        let origins: Vec<(f64, f64)> = tiles.iter().map(|t| (t.origin_x, t.origin_y)).collect();
        assert_eq!(origins, vec![(0.0, 0.0), (1.0, 0.0)]);
    }

    #[rstest]
    fn per_axis_count_is_floor_of_extent_over_size() {
        let tiles = plan_tiles(&bbox(0.0, 0.0, 3.9, 2.1), 1.0, AxisConvention::NativeOrder);
        assert_eq!(tiles.len(), 3 * 2);
    }

    #[rstest]
    fn geographic_swap_exchanges_axis_roles() {
        let tiles = plan_tiles(&bbox(0.0, 10.0, 1.0, 12.0), 1.0, AxisConvention::GeographicSwap);
        // Outer loop now walks the south axis, so latitude comes first.
        let origins: Vec<(f64, f64)> = tiles.iter().map(|t| (t.origin_x, t.origin_y)).collect();
        assert_eq!(origins, vec![(10.0, 0.0), (11.0, 0.0)]);
    }

    #[rstest]
    fn tiles_cover_box_without_gaps_or_overlaps() {
        let tiles = plan_tiles(&bbox(0.0, 0.0, 3.0, 3.0), 1.0, AxisConvention::NativeOrder);
        assert_eq!(tiles.len(), 9);
        let mut area = 0.0;
        for tile in &tiles {
            area += tile.size * tile.size;
            for other in &tiles {
                if std::ptr::eq(tile, other) {
                    continue;
                }
                let disjoint = tile.max_x() <= other.origin_x
                    || other.max_x() <= tile.origin_x
                    || tile.max_y() <= other.origin_y
                    || other.max_y() <= tile.origin_y;
                assert!(disjoint, "tiles must not overlap");
            }
        }
        assert_eq!(area, 9.0);
    }

    #[rstest]
    #[case("parcels", 0.0, 1.0, ".gml", "parcels_0_1.gml")]
    #[case("parcels", -8.75, 41.5, ".gml", "parcels_-8.75_41.5.gml")]
    fn formats_cache_file_names(
        #[case] basename: &str,
        #[case] x: f64,
        #[case] y: f64,
        #[case] extension: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(tile_file_name(basename, x, y, extension), expected);
    }

    #[rstest]
    fn ordering_follows_convention() {
        assert_eq!(AxisConvention::NativeOrder.order(1.0, 2.0), (1.0, 2.0));
        assert_eq!(AxisConvention::GeographicSwap.order(1.0, 2.0), (2.0, 1.0));
    }
}
