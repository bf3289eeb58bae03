/// Errors that can occur across the tile-cache integration core.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// Grid and metatile math failures (unknown grid set, outside coverage).
    #[error(transparent)]
    Grid(#[from] tilevault_tile_utils::GridError),

    /// Failures of the persistent tile-layer descriptor store.
    #[error(transparent)]
    Store(#[from] crate::layer::StoreError),

    /// Failures of the catalog projection, including configuration-lock
    /// timeouts.
    #[error(transparent)]
    Projection(#[from] crate::layer::ProjectionError),

    /// Failures while serving a single tile request.
    #[error(transparent)]
    Tile(#[from] crate::layer::TileError),

    /// Failures loading or validating the global cache configuration.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// A convenience [`Result`] for operations in `tilevault-core`.
pub type CoreResult<T> = Result<T, CoreError>;
