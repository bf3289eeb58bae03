//! Tile layers: the persisted descriptor model, the durable descriptor
//! store, the catalog projection, the request-coalescing engine and the
//! catalog-change listeners.

mod error;
pub use error::{ProjectionError, StoreError, TileError};

mod info;
pub use info::{ExpirationRule, STYLES_PARAMETER, StyleFilter, TileLayerInfo};

pub(crate) mod store;
pub use store::{StoreEvent, StoreListener, TileLayerStore};

mod locks;
pub use locks::{MetaTileLockGuard, MetaTileLockKey, MetaTileLocks};

mod metatile;
pub use metatile::MetaTile;

mod engine;
pub use engine::{CacheResult, TileLayer, TileRequest, TileResponse, TileServices};

mod projection;
pub use projection::CatalogProjection;

mod listeners;
pub use listeners::{CatalogLayerListener, CatalogStyleListener};
