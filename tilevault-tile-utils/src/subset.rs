use std::sync::Arc;

use crate::bounds::{BoundingBox, Srs, wgs84_to_mercator};
use crate::error::{GridError, GridResult};
use crate::gridset::{GridSet, TileCoord, TileRange};

/// The portion of a grid set actually covered by one layer: a per-level tile
/// coverage plus the zoom range worth caching.
///
/// Derivation projects the layer's geographic bounds into the grid's
/// reference system (identity for EPSG:4326, the closed-form spherical
/// Mercator for EPSG:3857) and intersects with the grid extent. Any other
/// reference system is a configuration error the caller records per layer.
#[derive(Debug, Clone)]
pub struct GridSubset {
    gridset: Arc<GridSet>,
    /// One range per level, index = zoom.
    coverage: Vec<TileRange>,
    min_cached_zoom: u8,
    max_cached_zoom: u8,
}

impl GridSubset {
    /// Derives the subset covering `wgs84_bounds` (lon/lat degrees).
    ///
    /// `cached_zooms` restricts the levels worth caching; `None` caches the
    /// full pyramid. Tiles outside the cached range are still servable, just
    /// never stored.
    pub fn covering(
        gridset: Arc<GridSet>,
        wgs84_bounds: &BoundingBox,
        cached_zooms: Option<(u8, u8)>,
    ) -> GridResult<Self> {
        let projected = match gridset.srs() {
            Srs::Epsg4326 => *wgs84_bounds,
            Srs::Epsg3857 => wgs84_to_mercator(wgs84_bounds),
            other @ Srs::Other(_) => return Err(GridError::UnsupportedReprojection(other)),
        };
        let clipped = projected.intersection(gridset.extent());
        if clipped.is_empty() {
            return Err(GridError::EmptyCoverage(gridset.id().to_string()));
        }

        let coverage = (0..gridset.levels())
            .map(|z| gridset.tile_range_for(z, &clipped))
            .collect::<GridResult<Vec<_>>>()?;

        let max_zoom = gridset.max_zoom();
        let (min_cached_zoom, max_cached_zoom) = cached_zooms.unwrap_or((0, max_zoom));
        Ok(Self {
            gridset,
            coverage,
            min_cached_zoom: min_cached_zoom.min(max_zoom),
            max_cached_zoom: max_cached_zoom.min(max_zoom),
        })
    }

    /// Subset spanning the whole grid extent.
    pub fn full(gridset: Arc<GridSet>, cached_zooms: Option<(u8, u8)>) -> GridResult<Self> {
        let world = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);
        Self::covering(gridset, &world, cached_zooms)
    }

    /// The grid set this subset is carved out of.
    #[must_use]
    pub fn gridset(&self) -> &Arc<GridSet> {
        &self.gridset
    }

    /// Coverage at one zoom level.
    pub fn coverage(&self, z: u8) -> GridResult<&TileRange> {
        self.coverage
            .get(usize::from(z))
            .ok_or(GridError::ZoomOutOfRange {
                requested: z,
                max: self.gridset.max_zoom(),
            })
    }

    /// Rejects tiles outside this layer's coverage with a typed error.
    pub fn check_coverage(&self, coord: TileCoord) -> GridResult<()> {
        let range = self.coverage(coord.z)?;
        if range.contains(coord.x, coord.y) {
            Ok(())
        } else {
            Err(GridError::OutsideCoverage {
                coord,
                gridset: self.gridset.id().to_string(),
            })
        }
    }

    /// Whether tiles at this zoom are worth storing in the cache.
    #[must_use]
    pub fn should_cache_at(&self, z: u8) -> bool {
        z >= self.min_cached_zoom && z <= self.max_cached_zoom
    }

    /// Lowest cached zoom level.
    #[must_use]
    pub fn min_cached_zoom(&self) -> u8 {
        self.min_cached_zoom
    }

    /// Highest cached zoom level.
    #[must_use]
    pub fn max_cached_zoom(&self) -> u8 {
        self.max_cached_zoom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gridset::GridSet;

    fn mercator() -> Arc<GridSet> {
        Arc::new(GridSet::web_mercator_quad())
    }

    #[test]
    fn world_layer_covers_everything() {
        let subset = GridSubset::full(mercator(), None).unwrap();
        let range = subset.coverage(3).unwrap();
        assert_eq!(
            *range,
            TileRange {
                min_x: 0,
                min_y: 0,
                max_x: 7,
                max_y: 7
            }
        );
    }

    #[test]
    fn regional_layer_covers_a_corner() {
        // Roughly western Europe: all in the north-eastern mercator quadrant
        let bounds = BoundingBox::new(-10.0, 36.0, 20.0, 60.0);
        let subset = GridSubset::covering(mercator(), &bounds, None).unwrap();
        let range = subset.coverage(2).unwrap();
        assert!(range.min_x <= 1 && range.max_x >= 2);
        assert!(range.min_y >= 2, "northern hemisphere rows only");

        let inside = TileCoord { x: 2, y: 2, z: 2 };
        assert!(subset.check_coverage(inside).is_ok());
        let outside = TileCoord { x: 0, y: 0, z: 2 };
        assert!(matches!(
            subset.check_coverage(outside),
            Err(GridError::OutsideCoverage { .. })
        ));
    }

    #[test]
    fn unknown_srs_is_a_configuration_error() {
        let grid = Arc::new(GridSet::new(
            "UTM32N",
            Srs::Other(32632),
            BoundingBox::new(0.0, 0.0, 1_000_000.0, 1_000_000.0),
            (256, 256),
            10,
            (1, 1),
        ));
        let bounds = BoundingBox::new(5.0, 45.0, 10.0, 50.0);
        assert!(matches!(
            GridSubset::covering(grid, &bounds, None),
            Err(GridError::UnsupportedReprojection(_))
        ));
    }

    #[test]
    fn disjoint_bounds_are_rejected() {
        let grid = Arc::new(GridSet::new(
            "RegionalGrid",
            Srs::Epsg4326,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            (256, 256),
            5,
            (1, 1),
        ));
        let bounds = BoundingBox::new(-60.0, -60.0, -50.0, -50.0);
        assert!(matches!(
            GridSubset::covering(grid, &bounds, None),
            Err(GridError::EmptyCoverage(_))
        ));
    }

    #[test]
    fn cached_range_limits_storage_not_serving() {
        let subset = GridSubset::full(mercator(), Some((4, 10))).unwrap();
        assert!(!subset.should_cache_at(3));
        assert!(subset.should_cache_at(4));
        assert!(subset.should_cache_at(10));
        assert!(!subset.should_cache_at(11));
        // still servable below the cached range
        assert!(subset.coverage(2).is_ok());
    }
}
