//! The boundary to the backing tile store, plus a moka-backed in-memory
//! implementation for single-process deployments and tests.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use tilevault_tile_utils::{TileCoord, TileFormat};

mod memory;
pub use memory::MemoryTileStore;

/// Errors raised by the backing tile store.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum TileStoreError {
    /// The storage backend failed.
    #[error("tile store backend failed: {0}")]
    Backend(String),
}

/// Address of one cached tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Tile-layer name.
    pub layer: String,
    /// Grid set the coordinates belong to.
    pub gridset: String,
    /// Tile coordinates.
    pub coord: TileCoord,
    /// Output format of the payload.
    pub format: TileFormat,
    /// Style the tile was rendered with; `None` is the layer's default
    /// style.
    pub style: Option<String>,
}

/// The backing tile store.
///
/// Implementations hold encoded tile payloads; eviction and physical layout
/// are theirs to decide. All truncation verbs are scoped to one layer name,
/// and a style of `None` addresses default-style tiles.
#[async_trait]
pub trait TileStore: Send + Sync + Debug {
    /// Returns the payload if present and younger than `max_age`
    /// (`None` = any age is fresh).
    async fn get_if_fresh(
        &self,
        key: &TileKey,
        max_age: Option<Duration>,
    ) -> Result<Option<Vec<u8>>, TileStoreError>;

    /// Stores one tile payload, replacing any previous one.
    async fn put(&self, key: TileKey, payload: Vec<u8>) -> Result<(), TileStoreError>;

    /// Evicts every tile of a layer.
    async fn truncate_layer(&self, layer: &str) -> Result<(), TileStoreError>;

    /// Evicts a layer's tiles rendered with one style (`None` = the default
    /// style).
    async fn truncate_style(&self, layer: &str, style: Option<&str>)
    -> Result<(), TileStoreError>;

    /// Evicts a layer's tiles cached for one grid set.
    async fn truncate_gridset(&self, layer: &str, gridset: &str) -> Result<(), TileStoreError>;

    /// Evicts a layer's tiles cached in one output format.
    async fn truncate_format(&self, layer: &str, format: TileFormat)
    -> Result<(), TileStoreError>;

    /// Re-addresses every tile of `old` under `new`, preserving contents.
    async fn rename_layer(&self, old: &str, new: &str) -> Result<(), TileStoreError>;

    /// Removes a layer and everything cached for it.
    async fn delete_layer(&self, layer: &str) -> Result<(), TileStoreError>;
}
