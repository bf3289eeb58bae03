//! The administrative facade over the projection, the backing tile store
//! and the catalog: one place for everything the listeners and an admin
//! surface need to do to tile layers.

use std::sync::Arc;

use tracing::debug;

use crate::catalog::{Catalog, Published};
use crate::config::CacheConfig;
use crate::layer::{
    CatalogProjection, ProjectionError, TileError, TileLayer, TileLayerInfo, TileServices,
};
use crate::{CoreError, CoreResult};
use tilevault_tile_utils::TileFormat;

/// Administration entry point for the tile cache.
#[derive(Debug)]
pub struct TileCacheMediator {
    catalog: Arc<dyn Catalog>,
    projection: Arc<CatalogProjection>,
    services: TileServices,
    config: CacheConfig,
}

impl TileCacheMediator {
    /// Wires the mediator over its collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        projection: Arc<CatalogProjection>,
        services: TileServices,
        config: CacheConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            projection,
            services,
            config,
        })
    }

    /// The global cache defaults.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The external catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// The catalog projection.
    #[must_use]
    pub fn projection(&self) -> &Arc<CatalogProjection> {
        &self.projection
    }

    /// Resolves a tile layer by name.
    pub async fn tile_layer(&self, name: &str) -> CoreResult<Option<Arc<TileLayer>>> {
        self.projection.tile_layer(name).await
    }

    /// Whether a tile layer with this name exists.
    pub async fn has_tile_layer(&self, name: &str) -> bool {
        self.projection.contains(name).await.unwrap_or(false)
    }

    /// All current tile-layer names.
    pub async fn layer_names(&self) -> CoreResult<Vec<String>> {
        self.projection.layer_names().await
    }

    /// Creates and persists a tile layer for a catalog entity using the
    /// global defaults.
    pub async fn create_default_layer(&self, published: &Published) -> CoreResult<()> {
        let info = TileLayerInfo::from_defaults(published, &self.config);
        debug!("Creating tile layer '{}' with default settings", info.name);
        self.projection.add_layer(info).await
    }

    /// Persists a modified descriptor.
    pub async fn save_info(&self, info: TileLayerInfo) -> CoreResult<()> {
        self.projection.modify_layer(info).await
    }

    /// Renames a tile layer preserving its id and cache contents.
    pub async fn rename_layer(&self, old_name: &str, new_name: &str) -> CoreResult<()> {
        self.projection.rename_layer(old_name, new_name).await
    }

    /// Removes a tile layer and its cached tiles.
    pub async fn remove_layer(&self, name: &str) -> CoreResult<()> {
        self.projection.remove_layer(name).await
    }

    /// Toggles a layer's enablement and persists the descriptor.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> CoreResult<()> {
        let layer = self
            .tile_layer(name)
            .await?
            .ok_or_else(|| ProjectionError::NotFound(name.to_string()))?;
        let mut info = layer.info().clone();
        if info.enabled == enabled {
            return Ok(());
        }
        info.enabled = enabled;
        self.save_info(info).await
    }

    /// Evicts every cached tile of a layer.
    pub async fn truncate_layer(&self, name: &str) -> CoreResult<()> {
        self.projection.truncate(name).await
    }

    /// Evicts a layer's cached tiles for one style (`None` = the default
    /// style).
    pub async fn truncate_style(&self, name: &str, style: Option<&str>) -> CoreResult<()> {
        self.projection.truncate_style(name, style).await
    }

    /// Evicts a layer's cached tiles for one grid set.
    pub async fn truncate_gridset(&self, name: &str, gridset: &str) -> CoreResult<()> {
        self.services
            .store
            .truncate_gridset(name, gridset)
            .await
            .map_err(|source| store_error(name, source))
    }

    /// Evicts a layer's cached tiles in one output format.
    pub async fn truncate_format(&self, name: &str, format: TileFormat) -> CoreResult<()> {
        self.services
            .store
            .truncate_format(name, format)
            .await
            .map_err(|source| store_error(name, source))
    }

    /// Tile layers that would serve the given style: layers using it as
    /// their default plus layers explicitly caching it.
    pub async fn layer_names_for_style(&self, style: &str) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for name in self.projection.layer_names().await? {
            let Some(layer) = self.projection.tile_layer(&name).await? else {
                continue;
            };
            let uses_default = self
                .catalog
                .layer_by_name(&name)
                .is_some_and(|entry| entry.default_style.as_deref() == Some(style));
            if uses_default || layer.info().cached_styles.contains(style) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Tile layers of groups that render `layer_name` with its default
    /// style (no per-member override).
    #[must_use]
    pub fn groups_using_default_style_of(&self, layer_name: &str) -> Vec<String> {
        self.catalog
            .groups()
            .into_iter()
            .filter(|group| {
                group
                    .layers
                    .iter()
                    .zip(&group.styles)
                    .any(|(member, style)| member == layer_name && style.is_none())
            })
            .map(|group| group.name.prefixed())
            .collect()
    }

    /// Whether the rendering facility can answer feature-info probes for
    /// this entity.
    #[must_use]
    pub fn is_queryable(&self, published: &Published) -> bool {
        self.services.renderer.is_queryable(published)
    }
}

fn store_error(layer: &str, source: crate::storage::TileStoreError) -> CoreError {
    TileError::Store {
        layer: layer.to_string(),
        source,
    }
    .into()
}
