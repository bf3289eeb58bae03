use crate::gridset::TileCoord;

/// Errors produced by grid and metatile math.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GridError {
    /// No grid set with this id is registered.
    #[error("unknown grid set '{0}'")]
    UnknownGridSet(String),

    /// The zoom level is outside the grid set's level range.
    #[error("zoom level {requested} is outside the valid range 0..={max}")]
    ZoomOutOfRange {
        /// Requested zoom level.
        requested: u8,
        /// Highest level the grid set defines.
        max: u8,
    },

    /// The tile index falls outside the layer's coverage at that zoom level.
    #[error("tile {coord} is outside the coverage of grid set '{gridset}'")]
    OutsideCoverage {
        /// Requested tile.
        coord: TileCoord,
        /// Grid set the coverage was computed against.
        gridset: String,
    },

    /// The layer bounds cannot be expressed in the grid set's reference system.
    #[error("cannot reproject layer bounds into {0}")]
    UnsupportedReprojection(crate::bounds::Srs),

    /// The reprojected bounds do not intersect the grid set extent at all.
    #[error("layer bounds do not intersect grid set '{0}'")]
    EmptyCoverage(String),
}

/// A convenience [`Result`] for grid math.
pub type GridResult<T> = Result<T, GridError>;
