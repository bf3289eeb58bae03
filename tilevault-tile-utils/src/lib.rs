//! Grid and tile math shared by the tilevault crates.
//!
//! This crate is deliberately free of async code and heavy dependencies: it
//! only knows about coordinates, bounding boxes, grid sets (zoom pyramids),
//! the per-layer portion of a grid set ([`GridSubset`]) and metatile
//! geometry. Everything stateful (caches, stores, catalogs) lives in
//! `tilevault-core`.

mod bounds;
pub use bounds::{BoundingBox, MAX_MERCATOR_LATITUDE, Srs, wgs84_to_mercator};

mod error;
pub use error::{GridError, GridResult};

mod format;
pub use format::TileFormat;

mod gridset;
pub use gridset::{
    GridSet, GridSetRegistry, TileCoord, TileRange, WEB_MERCATOR_QUAD, WORLD_CRS84_QUAD,
};

mod subset;
pub use subset::GridSubset;

mod metatile;
pub use metatile::MetaTileGeometry;
