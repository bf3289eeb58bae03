use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bounds::{BoundingBox, Srs};
use crate::error::{GridError, GridResult};

/// A tile address within one grid set. The y axis grows northwards: row 0 is
/// the southernmost row, matching the tile protocol this cache serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Column, 0 at the western edge.
    pub x: u32,
    /// Row, 0 at the southern edge.
    pub y: u32,
    /// Zoom level, 0 is the coarsest.
    pub z: u8,
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// An inclusive rectangle of tile indices at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    /// Westernmost column.
    pub min_x: u32,
    /// Southernmost row.
    pub min_y: u32,
    /// Easternmost column.
    pub max_x: u32,
    /// Northernmost row.
    pub max_y: u32,
}

impl TileRange {
    /// Whether the tile index lies within this range.
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Number of columns spanned.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    /// Number of rows spanned.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// A quadtree-style zoom pyramid: a spatial extent divided into square tiles
/// at a fixed number of levels, each level doubling the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSet {
    id: String,
    srs: Srs,
    extent: BoundingBox,
    tile_width: u32,
    tile_height: u32,
    levels: u8,
    /// Tile matrix dimensions at level 0; every level `z` is `matrix0 << z`.
    matrix0: (u32, u32),
}

/// The well-known web-Mercator grid id.
pub const WEB_MERCATOR_QUAD: &str = "WebMercatorQuad";

/// The well-known geographic (WGS84) grid id.
pub const WORLD_CRS84_QUAD: &str = "WorldCRS84Quad";

const HALF_MERCATOR_WORLD: f64 = 20_037_508.342_789_244;

impl GridSet {
    /// Creates a grid set from its defining parameters.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        srs: Srs,
        extent: BoundingBox,
        tile_size: (u32, u32),
        levels: u8,
        matrix0: (u32, u32),
    ) -> Self {
        Self {
            id: id.into(),
            srs,
            extent,
            tile_width: tile_size.0,
            tile_height: tile_size.1,
            levels,
            matrix0,
        }
    }

    /// The standard spherical-Mercator pyramid: one square world tile at
    /// level 0, 23 levels, 256px tiles.
    #[must_use]
    pub fn web_mercator_quad() -> Self {
        Self::new(
            WEB_MERCATOR_QUAD,
            Srs::Epsg3857,
            BoundingBox::new(
                -HALF_MERCATOR_WORLD,
                -HALF_MERCATOR_WORLD,
                HALF_MERCATOR_WORLD,
                HALF_MERCATOR_WORLD,
            ),
            (256, 256),
            23,
            (1, 1),
        )
    }

    /// The standard geographic pyramid: two tiles at level 0, 22 levels.
    #[must_use]
    pub fn world_crs84_quad() -> Self {
        Self::new(
            WORLD_CRS84_QUAD,
            Srs::Epsg4326,
            BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            (256, 256),
            22,
            (2, 1),
        )
    }

    /// Grid set identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reference system of the extent and of all tile bounds.
    #[must_use]
    pub fn srs(&self) -> Srs {
        self.srs
    }

    /// Full spatial extent covered by the pyramid.
    #[must_use]
    pub fn extent(&self) -> &BoundingBox {
        &self.extent
    }

    /// Tile pixel dimensions `(width, height)`.
    #[must_use]
    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    /// The coarsest-to-finest level count.
    #[must_use]
    pub fn levels(&self) -> u8 {
        self.levels
    }

    /// Highest valid zoom level.
    #[must_use]
    pub fn max_zoom(&self) -> u8 {
        self.levels - 1
    }

    fn check_zoom(&self, z: u8) -> GridResult<()> {
        if z < self.levels {
            Ok(())
        } else {
            Err(GridError::ZoomOutOfRange {
                requested: z,
                max: self.max_zoom(),
            })
        }
    }

    /// Number of tile columns at `z`.
    pub fn matrix_width(&self, z: u8) -> GridResult<u32> {
        self.check_zoom(z)?;
        Ok(self.matrix0.0 << z)
    }

    /// Number of tile rows at `z`.
    pub fn matrix_height(&self, z: u8) -> GridResult<u32> {
        self.check_zoom(z)?;
        Ok(self.matrix0.1 << z)
    }

    /// Map units per pixel at `z`.
    pub fn resolution(&self, z: u8) -> GridResult<f64> {
        let width = self.matrix_width(z)?;
        Ok(self.extent.width() / (f64::from(width) * f64::from(self.tile_width)))
    }

    /// The spatial bounds of one tile.
    pub fn tile_bounds(&self, coord: TileCoord) -> GridResult<BoundingBox> {
        let res = self.resolution(coord.z)?;
        let span_x = res * f64::from(self.tile_width);
        let span_y = res * f64::from(self.tile_height);
        let min_x = self.extent.min_x + f64::from(coord.x) * span_x;
        let min_y = self.extent.min_y + f64::from(coord.y) * span_y;
        Ok(BoundingBox::new(min_x, min_y, min_x + span_x, min_y + span_y))
    }

    /// The smallest tile range covering `bbox` at `z`, clamped to the
    /// matrix. `bbox` must be expressed in this grid set's [`Srs`].
    pub fn tile_range_for(&self, z: u8, bbox: &BoundingBox) -> GridResult<TileRange> {
        let res = self.resolution(z)?;
        let span_x = res * f64::from(self.tile_width);
        let span_y = res * f64::from(self.tile_height);
        let width = self.matrix_width(z)?;
        let height = self.matrix_height(z)?;
        Ok(TileRange {
            min_x: index_of(bbox.min_x - self.extent.min_x, span_x, width, false),
            min_y: index_of(bbox.min_y - self.extent.min_y, span_y, height, false),
            max_x: index_of(bbox.max_x - self.extent.min_x, span_x, width, true),
            max_y: index_of(bbox.max_y - self.extent.min_y, span_y, height, true),
        })
    }
}

/// Tile index containing the ordinate `offset` from the grid origin, clamped
/// into the matrix. For upper edges the index is nudged inward so a bbox
/// ending exactly on a tile boundary does not bleed into the next tile.
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn index_of(offset: f64, span: f64, matrix: u32, upper_edge: bool) -> u32 {
    let mut idx = offset / span;
    if upper_edge {
        idx -= 1e-9;
    }
    idx.floor().clamp(0.0, f64::from(matrix - 1)) as u32
}

/// Registry of grid sets by id; the cache engine resolves every request's
/// grid-set id against one of these.
#[derive(Debug, Clone, Default)]
pub struct GridSetRegistry {
    sets: HashMap<String, Arc<GridSet>>,
}

impl GridSetRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with [`GridSet::web_mercator_quad`] and
    /// [`GridSet::world_crs84_quad`].
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(GridSet::web_mercator_quad());
        registry.register(GridSet::world_crs84_quad());
        registry
    }

    /// Adds or replaces a grid set.
    pub fn register(&mut self, gridset: GridSet) {
        self.sets.insert(gridset.id.clone(), Arc::new(gridset));
    }

    /// Looks a grid set up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<GridSet>> {
        self.sets.get(id).cloned()
    }

    /// Same as [`Self::get`] but with a typed not-found error.
    pub fn require(&self, id: &str) -> GridResult<Arc<GridSet>> {
        self.get(id)
            .ok_or_else(|| GridError::UnknownGridSet(id.to_string()))
    }

    /// All registered grid set ids.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.sets.keys().cloned().collect()
    }
}
