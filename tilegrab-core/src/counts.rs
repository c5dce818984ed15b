//! Feature-count tracking shared by the fetch and merge phases.
//!
//! WFS servers report feature counts through version-dependent root
//! attributes: pre-2.0 responses carry a single `numberOfFeatures`,
//! 2.0.0 and later carry separate `numberReturned` and `numberMatched`.
//! The tracker is deliberately permissive: a missing or malformed
//! attribute is never an error, it simply leaves that kind untracked.

/// Counts parsed from a single tile document's root element.
///
/// `None` means the attribute was missing or non-numeric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileCounts {
    /// `numberMatched` (WFS 2.0.0+).
    pub matched: Option<u64>,
    /// `numberReturned` (WFS 2.0.0+).
    pub returned: Option<u64>,
    /// `numberOfFeatures` (WFS 1.0.0 / 1.1.0).
    pub of_features: Option<u64>,
}

impl TileCounts {
    /// Parse a raw attribute value into a count.
    ///
    /// Returns `None` for absent or non-numeric values; absence is a
    /// tracking decision, not an error.
    pub fn parse_attribute(value: Option<&str>) -> Option<u64> {
        value.and_then(|raw| raw.trim().parse().ok())
    }
}

/// Running totals for each count kind across a merge run.
///
/// A kind becomes tracked only if the seed tile's document exposes the
/// corresponding attribute; once untracked it is never retroactively
/// tracked, so later tiles cannot widen the set of accumulated kinds.
///
/// # Examples
/// ```
/// use tilegrab_core::{CountTotals, TileCounts};
///
/// let seed = TileCounts { returned: Some(10), ..TileCounts::default() };
/// let mut totals = CountTotals::from_seed(&seed);
/// totals.accumulate(&TileCounts { returned: Some(5), ..TileCounts::default() });
/// assert_eq!(totals.returned(), Some(15));
/// assert_eq!(totals.matched(), None);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountTotals {
    matched: Option<u64>,
    returned: Option<u64>,
    of_features: Option<u64>,
}

impl CountTotals {
    /// Initialise the totals from the seed tile's counts.
    pub fn from_seed(seed: &TileCounts) -> Self {
        Self {
            matched: seed.matched,
            returned: seed.returned,
            of_features: seed.of_features,
        }
    }

    /// Fold one tile's counts into the running totals.
    ///
    /// Only tracked kinds accumulate; a tracked kind missing from the
    /// tile contributes zero rather than disabling tracking.
    pub fn accumulate(&mut self, tile: &TileCounts) {
        if let Some(total) = self.matched.as_mut() {
            *total += tile.matched.unwrap_or(0);
        }
        if let Some(total) = self.returned.as_mut() {
            *total += tile.returned.unwrap_or(0);
        }
        if let Some(total) = self.of_features.as_mut() {
            *total += tile.of_features.unwrap_or(0);
        }
    }

    /// Whether a tile is empty for merge purposes.
    ///
    /// True only when at least one kind is tracked and every tracked
    /// kind is exactly zero for that tile. When nothing is tracked the
    /// tile is treated as non-empty so its payload is still merged.
    pub fn tile_is_empty(&self, tile: &TileCounts) -> bool {
        let tracked = [
            self.matched.map(|_| tile.matched.unwrap_or(0)),
            self.returned.map(|_| tile.returned.unwrap_or(0)),
            self.of_features.map(|_| tile.of_features.unwrap_or(0)),
        ];
        let mut any = false;
        for value in tracked.into_iter().flatten() {
            if value != 0 {
                return false;
            }
            any = true;
        }
        any
    }

    /// Aggregated `numberMatched`, if tracked.
    pub fn matched(&self) -> Option<u64> {
        self.matched
    }

    /// Aggregated `numberReturned`, if tracked.
    pub fn returned(&self) -> Option<u64> {
        self.returned
    }

    /// Aggregated `numberOfFeatures`, if tracked.
    pub fn of_features(&self) -> Option<u64> {
        self.of_features
    }

    /// Whether no kind at all is tracked for this run.
    pub fn untracked(&self) -> bool {
        self.matched.is_none() && self.returned.is_none() && self.of_features.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn returned(value: u64) -> TileCounts {
        TileCounts {
            returned: Some(value),
            ..TileCounts::default()
        }
    }

    #[rstest]
    #[case(Some("42"), Some(42))]
    #[case(Some(" 7 "), Some(7))]
    #[case(Some("unknown"), None)]
    #[case(Some(""), None)]
    #[case(Some("-3"), None)]
    #[case(None, None)]
    fn parses_attribute_values(#[case] raw: Option<&str>, #[case] expected: Option<u64>) {
        assert_eq!(TileCounts::parse_attribute(raw), expected);
    }

    #[rstest]
    fn seed_decides_tracked_kinds() {
        let seed = TileCounts {
            matched: Some(3),
            returned: None,
            of_features: None,
        };
        let mut totals = CountTotals::from_seed(&seed);
        totals.accumulate(&TileCounts {
            matched: Some(2),
            returned: Some(99),
            of_features: Some(99),
        });
        assert_eq!(totals.matched(), Some(5));
        assert_eq!(totals.returned(), None);
        assert_eq!(totals.of_features(), None);
    }

    #[rstest]
    fn accumulates_zero_for_missing_tracked_attribute() {
        let mut totals = CountTotals::from_seed(&returned(10));
        totals.accumulate(&TileCounts::default());
        assert_eq!(totals.returned(), Some(10));
    }

    #[rstest]
    fn sums_tracked_counts_across_tiles() {
        let mut totals = CountTotals::from_seed(&returned(10));
        totals.accumulate(&returned(0));
        totals.accumulate(&returned(5));
        assert_eq!(totals.returned(), Some(15));
    }

    #[rstest]
    fn zero_count_tile_is_empty() {
        let totals = CountTotals::from_seed(&returned(10));
        assert!(totals.tile_is_empty(&returned(0)));
        assert!(!totals.tile_is_empty(&returned(1)));
    }

    #[rstest]
    fn tile_with_any_nonzero_tracked_kind_is_not_empty() {
        let seed = TileCounts {
            matched: Some(1),
            returned: Some(1),
            of_features: None,
        };
        let totals = CountTotals::from_seed(&seed);
        let tile = TileCounts {
            matched: Some(0),
            returned: Some(4),
            of_features: None,
        };
        assert!(!totals.tile_is_empty(&tile));
    }

    #[rstest]
    fn untracked_run_never_reports_empty_tiles() {
        let totals = CountTotals::from_seed(&TileCounts::default());
        assert!(totals.untracked());
        assert!(!totals.tile_is_empty(&TileCounts::default()));
    }
}
