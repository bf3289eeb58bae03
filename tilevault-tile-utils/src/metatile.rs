use crate::bounds::BoundingBox;
use crate::error::GridResult;
use crate::gridset::{TileCoord, TileRange};
use crate::subset::GridSubset;

/// Geometry of one metatile: the rendering unit spanning
/// `meta_x_factor x meta_y_factor` adjacent tiles plus a pixel gutter.
///
/// The gutter is only applied on sides that do not touch the grid matrix
/// edge; there is nothing to render beyond the world.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaTileGeometry {
    meta_x: u32,
    meta_y: u32,
    z: u8,
    span: TileRange,
    tile_width: u32,
    tile_height: u32,
    /// Pixel gutters applied per side: (left, bottom, right, top).
    gutters: (u32, u32, u32, u32),
    width_px: u32,
    height_px: u32,
    bbox: BoundingBox,
}

impl MetaTileGeometry {
    /// Computes the metatile owning `coord` for the given tiling factors.
    ///
    /// The span is clamped to the subset's coverage, so edge metatiles may
    /// hold fewer than `factors.0 * factors.1` tiles.
    pub fn compute(
        subset: &GridSubset,
        coord: TileCoord,
        factors: (u32, u32),
        gutter: u32,
    ) -> GridResult<Self> {
        let gridset = subset.gridset();
        let z = coord.z;
        let coverage = *subset.coverage(z)?;
        let matrix_w = gridset.matrix_width(z)?;
        let matrix_h = gridset.matrix_height(z)?;
        let (tile_width, tile_height) = gridset.tile_size();

        let (fx, fy) = (factors.0.max(1), factors.1.max(1));
        let meta_x = coord.x / fx;
        let meta_y = coord.y / fy;

        let span = TileRange {
            min_x: (meta_x * fx).max(coverage.min_x),
            min_y: (meta_y * fy).max(coverage.min_y),
            max_x: (meta_x * fx + fx - 1).min(coverage.max_x),
            max_y: (meta_y * fy + fy - 1).min(coverage.max_y),
        };

        let gutters = (
            if span.min_x > 0 { gutter } else { 0 },
            if span.min_y > 0 { gutter } else { 0 },
            if span.max_x < matrix_w - 1 { gutter } else { 0 },
            if span.max_y < matrix_h - 1 { gutter } else { 0 },
        );
        let width_px = span.width() * tile_width + gutters.0 + gutters.2;
        let height_px = span.height() * tile_height + gutters.1 + gutters.3;

        let res = gridset.resolution(z)?;
        let south_west = gridset.tile_bounds(TileCoord {
            x: span.min_x,
            y: span.min_y,
            z,
        })?;
        let north_east = gridset.tile_bounds(TileCoord {
            x: span.max_x,
            y: span.max_y,
            z,
        })?;
        let tiles_bbox = BoundingBox::new(
            south_west.min_x,
            south_west.min_y,
            north_east.max_x,
            north_east.max_y,
        );
        let bbox = tiles_bbox.expanded(
            res * f64::from(gutter),
            (
                gutters.0 > 0,
                gutters.1 > 0,
                gutters.2 > 0,
                gutters.3 > 0,
            ),
        );

        Ok(Self {
            meta_x,
            meta_y,
            z,
            span,
            tile_width,
            tile_height,
            gutters,
            width_px,
            height_px,
            bbox,
        })
    }

    /// The metatile position in metatile space, `(x, y, z)`.
    #[must_use]
    pub fn meta_index(&self) -> (u32, u32, u8) {
        (self.meta_x, self.meta_y, self.z)
    }

    /// The actual tiles this metatile covers.
    #[must_use]
    pub fn span(&self) -> &TileRange {
        &self.span
    }

    /// Number of tiles produced by slicing this metatile.
    #[must_use]
    pub fn tile_count(&self) -> u32 {
        self.span.width() * self.span.height()
    }

    /// All tile coordinates covered, row-major from the south-west corner.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> + '_ {
        let z = self.z;
        (self.span.min_y..=self.span.max_y).flat_map(move |y| {
            (self.span.min_x..=self.span.max_x).map(move |x| TileCoord { x, y, z })
        })
    }

    /// Pixel dimensions of the rendering, gutter included.
    #[must_use]
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.width_px, self.height_px)
    }

    /// Spatial bounds of the rendering, gutter included.
    #[must_use]
    pub fn bounds(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Pixel rectangle `(x, y, width, height)` of one covered tile within
    /// the rendering. Pixel row 0 is the northern edge.
    #[must_use]
    pub fn pixel_rect(&self, coord: TileCoord) -> Option<(u32, u32, u32, u32)> {
        if coord.z != self.z || !self.span.contains(coord.x, coord.y) {
            return None;
        }
        let px = self.gutters.0 + (coord.x - self.span.min_x) * self.tile_width;
        let py = self.gutters.3 + (self.span.max_y - coord.y) * self.tile_height;
        Some((px, py, self.tile_width, self.tile_height))
    }
}
