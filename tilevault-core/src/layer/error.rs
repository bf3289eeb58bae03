use std::path::PathBuf;

use tilevault_tile_utils::{GridError, TileFormat};

use crate::admin_lock::LockTimeout;
use crate::render::RenderError;
use crate::storage::TileStoreError;

/// Errors of the persistent tile-layer descriptor store.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// A different live entry already uses the target name.
    #[error("a tile layer named '{name}' already exists with id '{existing_id}'")]
    NameCollision {
        /// The contended name.
        name: String,
        /// Id of the entry currently holding the name.
        existing_id: String,
    },

    /// The descriptor violates a model invariant.
    #[error("invalid descriptor for tile layer '{id}': {message}")]
    InvalidDescriptor {
        /// Descriptor id.
        id: String,
        /// What is wrong with it.
        message: String,
    },

    /// A filesystem operation on a descriptor file failed.
    #[error("unable to {action} descriptor file {}", path.display())]
    Io {
        /// The failed step, e.g. `"write"` or `"commit"`.
        action: &'static str,
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The freshly written temporary file did not parse back; the previous
    /// descriptor file was left untouched.
    #[error("descriptor file {} failed read-back verification", path.display())]
    Verify {
        /// The temporary file that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The descriptor could not be serialized.
    #[error("unable to encode descriptor for tile layer '{id}'")]
    Encode {
        /// Descriptor id.
        id: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors of the catalog projection.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ProjectionError {
    /// The configuration lock could not be acquired in time.
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    /// The named tile layer does not exist.
    #[error("tile layer '{0}' does not exist")]
    NotFound(String),

    /// A tile layer with this id or name already exists.
    #[error("a tile layer named '{0}' already exists")]
    AlreadyExists(String),
}

/// Errors raised while serving a single tile request.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum TileError {
    /// The format is not one the layer is cached in.
    #[error("{format} is not a supported format for '{layer}'")]
    UnsupportedFormat {
        /// Tile layer name.
        layer: String,
        /// Rejected format.
        format: TileFormat,
    },

    /// Grid resolution failed (unknown grid set, outside coverage).
    #[error(transparent)]
    Grid(#[from] GridError),

    /// A request parameter holds a value outside the declared filter.
    #[error("invalid value '{value}' for parameter '{parameter}', allowed: {allowed:?}")]
    InvalidParameter {
        /// Parameter name, lower-cased.
        parameter: String,
        /// The rejected value.
        value: String,
        /// Legal values.
        allowed: Vec<String>,
    },

    /// The layer exists but cannot serve tiles right now.
    #[error("tile layer '{layer}' is disabled: {reason}")]
    Disabled {
        /// Tile layer name.
        layer: String,
        /// Why it will not serve.
        reason: String,
    },

    /// The layer configuration is broken; the error message is sticky until
    /// the configuration changes.
    #[error("tile layer '{layer}' is misconfigured: {message}")]
    Configuration {
        /// Tile layer name.
        layer: String,
        /// The recorded configuration error.
        message: String,
    },

    /// The catalog no longer has an entity with the descriptor's id.
    #[error("catalog entity '{id}' backing tile layer '{layer}' no longer exists")]
    DanglingCatalogEntry {
        /// Tile layer name.
        layer: String,
        /// The stale catalog id.
        id: String,
    },

    /// The rendering backend cannot answer feature-info probes for this
    /// layer.
    #[error("tile layer '{layer}' is not queryable")]
    NotQueryable {
        /// Tile layer name.
        layer: String,
    },

    /// The rendering pipeline failed.
    #[error("rendering failed for tile layer '{layer}'")]
    Render {
        /// Tile layer name.
        layer: String,
        /// Underlying error.
        #[source]
        source: RenderError,
    },

    /// The backing tile store failed while persisting rendered tiles.
    #[error("tile store failed for tile layer '{layer}'")]
    Store {
        /// Tile layer name.
        layer: String,
        /// Underlying error.
        #[source]
        source: TileStoreError,
    },
}
