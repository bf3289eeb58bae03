use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tracing::{debug, error, info, warn};

use crate::admin_lock::TimedRwLock;
use crate::catalog::{Catalog, meta_keys};
use crate::layer::store::StoreEvent;
use crate::layer::{ProjectionError, StoreError, TileError, TileLayer, TileLayerInfo, TileLayerStore};
use crate::{CoreResult, layer::TileServices};

/// How many instantiated [`TileLayer`]s to keep around, and for how long
/// after the last access.
const LAYER_CACHE_CAPACITY: u64 = 100;
const LAYER_CACHE_IDLE: Duration = Duration::from_secs(10 * 60);

/// A live, dynamically computed view of the catalog as tile layers.
///
/// The projection maintains no list of its own: lookups overlay the
/// persistent registry with the pending-change buffers per call, so catalog
/// additions and removals are reflected without synchronizing any
/// materialized structure. Only per-layer descriptors are persisted, via
/// [`TileLayerStore`].
///
/// Mutations are staged (`add`/`modify`/`rename`/`remove`) and flushed by
/// [`save_pending`](Self::save_pending) under the timed write lock; the
/// flush then downgrades to a read lock and issues the truncation calls the
/// diffs demand, so lookups resume while stale tiles are evicted.
pub struct CatalogProjection {
    catalog: Arc<dyn Catalog>,
    store: Arc<TileLayerStore>,
    services: TileServices,
    layer_cache: moka::sync::Cache<String, Arc<TileLayer>>,
    pending_mods: DashMap<String, TileLayerInfo>,
    pending_deletes: DashSet<String>,
    lock: TimedRwLock,
}

impl std::fmt::Debug for CatalogProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogProjection")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl CatalogProjection {
    /// Wires the projection over its collaborators. Store mutations
    /// invalidate the corresponding cached layer instance.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        store: Arc<TileLayerStore>,
        services: TileServices,
        lock_timeout: Duration,
    ) -> Arc<Self> {
        let layer_cache = moka::sync::Cache::builder()
            .name("tile_layer_instances")
            .max_capacity(LAYER_CACHE_CAPACITY)
            .time_to_idle(LAYER_CACHE_IDLE)
            .build();

        let invalidator = layer_cache.clone();
        store.add_listener(Box::new(move |id, event| {
            if matches!(event, StoreEvent::Modified | StoreEvent::Deleted) {
                invalidator.invalidate(&id.to_string());
            }
        }));

        Arc::new(Self {
            catalog,
            store,
            services,
            layer_cache,
            pending_mods: DashMap::new(),
            pending_deletes: DashSet::new(),
            lock: TimedRwLock::new(lock_timeout),
        })
    }

    /// Where the persistent descriptors live.
    #[must_use]
    pub fn persistence_location(&self) -> &Path {
        self.store.base_dir()
    }

    /// Resolves a name to a layer id, overlaying pending changes: staged
    /// renames win over the stored name, staged deletes hide the entry.
    fn resolve_id(&self, name: &str) -> Result<Option<String>, StoreError> {
        for entry in self.pending_mods.iter() {
            if entry.value().name == name {
                if self.pending_deletes.contains(entry.key()) {
                    return Ok(None);
                }
                return Ok(Some(entry.key().clone()));
            }
        }
        let Some(id) = self.store.layer_id(name)? else {
            return Ok(None);
        };
        if self.pending_deletes.contains(&id) {
            return Ok(None);
        }
        if let Some(pending) = self.pending_mods.get(&id)
            && pending.value().name != name
        {
            // renamed away from this name in a pending modification
            return Ok(None);
        }
        Ok(Some(id))
    }

    fn info_by_id(&self, id: &str) -> Result<Option<TileLayerInfo>, StoreError> {
        if self.pending_deletes.contains(id) {
            return Ok(None);
        }
        if let Some(pending) = self.pending_mods.get(id) {
            return Ok(Some(pending.value().clone()));
        }
        Ok(self.store.layer_by_id(id)?)
    }

    fn instantiate(&self, id: &str) -> CoreResult<Option<Arc<TileLayer>>> {
        if let Some(layer) = self.layer_cache.get(id) {
            return Ok(Some(layer));
        }
        let Some(info) = self.info_by_id(id)? else {
            return Ok(None);
        };
        if self.catalog.published_by_id(id).is_none() {
            warn!(
                "Tile layer '{}' has no backing catalog entity '{id}', the configuration seems out of sync",
                info.name
            );
            return Ok(None);
        }
        let layer = Arc::new(TileLayer::new(
            info,
            Arc::clone(&self.catalog),
            self.services.clone(),
        ));
        self.layer_cache.insert(id.to_string(), Arc::clone(&layer));
        Ok(Some(layer))
    }

    /// Resolves a tile layer by name. Unknown names are `Ok(None)`, not an
    /// error.
    pub async fn tile_layer(&self, name: &str) -> CoreResult<Option<Arc<TileLayer>>> {
        let _read = self.lock.read().await.map_err(ProjectionError::from)?;
        let Some(id) = self.resolve_id(name)? else {
            return Ok(None);
        };
        self.instantiate(&id)
    }

    /// Resolves a tile layer by id.
    pub async fn tile_layer_by_id(&self, id: &str) -> CoreResult<Option<Arc<TileLayer>>> {
        let _read = self.lock.read().await.map_err(ProjectionError::from)?;
        self.instantiate(id)
    }

    /// The current tile-layer names: the stored registry overlaid with
    /// pending renames, additions and deletions. Recomputed per call.
    pub async fn layer_names(&self) -> CoreResult<Vec<String>> {
        let _read = self.lock.read().await.map_err(ProjectionError::from)?;
        let mut names: BTreeSet<String> = self.store.layer_names()?.into_iter().collect();
        for id in self.pending_deletes.iter() {
            if let Some(name) = self.store.layer_name(id.key())? {
                names.remove(&name);
            }
        }
        for entry in self.pending_mods.iter() {
            if let Some(stored_name) = self.store.layer_name(entry.key())? {
                names.remove(&stored_name);
            }
            if !self.pending_deletes.contains(entry.key()) {
                names.insert(entry.value().name.clone());
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Number of live tile layers.
    pub async fn layer_count(&self) -> CoreResult<usize> {
        Ok(self.layer_names().await?.len())
    }

    /// Whether a tile layer with this name exists.
    pub async fn contains(&self, name: &str) -> CoreResult<bool> {
        let _read = self.lock.read().await.map_err(ProjectionError::from)?;
        Ok(self.resolve_id(name)?.is_some())
    }

    /// Stages and persists a brand-new tile layer.
    pub async fn add_layer(&self, info: TileLayerInfo) -> CoreResult<()> {
        {
            let _write = self.lock.write().await.map_err(ProjectionError::from)?;
            let exists = self.pending_mods.contains_key(&info.id) || self.store.exists(&info.id)?;
            if exists && !self.pending_deletes.contains(&info.id) {
                return Err(ProjectionError::AlreadyExists(info.name).into());
            }
            if self.pending_deletes.remove(&info.id).is_some() {
                debug!(
                    "Adding tile layer '{}' before its deleted predecessor with the same id was flushed",
                    info.name
                );
            }
            self.pending_mods.insert(info.id.clone(), info);
        }
        self.save_pending().await
    }

    /// Stages and persists a modification of an existing tile layer.
    pub async fn modify_layer(&self, info: TileLayerInfo) -> CoreResult<()> {
        {
            let _write = self.lock.write().await.map_err(ProjectionError::from)?;
            let exists = self.pending_mods.contains_key(&info.id) || self.store.exists(&info.id)?;
            if !exists || self.pending_deletes.contains(&info.id) {
                return Err(ProjectionError::NotFound(info.name).into());
            }
            self.layer_cache.invalidate(&info.id);
            self.pending_mods.insert(info.id.clone(), info);
        }
        self.save_pending().await
    }

    /// Renames a tile layer, preserving its id and cache contents.
    pub async fn rename_layer(&self, old_name: &str, new_name: &str) -> CoreResult<()> {
        {
            let _write = self.lock.write().await.map_err(ProjectionError::from)?;
            let id = self
                .resolve_id(old_name)?
                .ok_or_else(|| ProjectionError::NotFound(old_name.to_string()))?;
            let mut info = self
                .info_by_id(&id)?
                .ok_or_else(|| ProjectionError::NotFound(old_name.to_string()))?;
            info.name = new_name.to_string();
            self.layer_cache.invalidate(&id);
            self.pending_mods.insert(id, info);
        }
        self.save_pending().await
    }

    /// Removes a tile layer from the registry and the backing cache store.
    pub async fn remove_layer(&self, name: &str) -> CoreResult<()> {
        let id = {
            let _read = self.lock.read().await.map_err(ProjectionError::from)?;
            self.resolve_id(name)?
                .ok_or_else(|| ProjectionError::NotFound(name.to_string()))?
        };

        // evict the cache while the registry still resolves the layer, the
        // store may need its configuration to address the tiles
        if let Err(error) = self.services.store.delete_layer(name).await {
            error!("Error deleting cached tiles of layer '{name}': {error}");
        }

        {
            let _write = self.lock.write().await.map_err(ProjectionError::from)?;
            self.pending_mods.remove(&id);
            self.pending_deletes.insert(id.clone());
            self.layer_cache.invalidate(&id);
        }
        self.save_pending().await
    }

    /// Flushes the pending buffers: deletes then saves while holding the
    /// write lock, then downgrades to the read lock and issues the change
    /// notifications (truncating removed grid sets, formats and styles, and
    /// renaming cache contents). A failure flushing one entry is logged and
    /// does not abort the others.
    pub async fn save_pending(&self) -> CoreResult<()> {
        let write = self.lock.write().await.map_err(ProjectionError::from)?;

        let deletes: Vec<String> = self
            .pending_deletes
            .iter()
            .map(|id| id.key().clone())
            .collect();
        self.pending_deletes.clear();
        for id in deletes {
            match self.store.delete(&id) {
                Ok(_) => {
                    self.catalog
                        .update_metadata(&id, meta_keys::CONFIGURED, None);
                }
                Err(error) => error!("Error deleting tile layer '{id}' from the store: {error}"),
            }
        }

        let mods: Vec<TileLayerInfo> = self
            .pending_mods
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.pending_mods.clear();

        let mut changes = Vec::with_capacity(mods.len());
        for info in mods {
            match self.store.save(info.clone()) {
                Ok(previous) => {
                    // mark the entity as carrying cache settings so catalog
                    // reloads can detect them without scanning this store
                    self.catalog.update_metadata(
                        &info.id,
                        meta_keys::CONFIGURED,
                        Some("true".to_string()),
                    );
                    changes.push((previous, info));
                }
                Err(error) => error!("Error saving tile layer '{}': {error}", info.name),
            }
        }

        let _read = write.downgrade();
        for (previous, current) in changes {
            self.notify_changed(previous.as_ref(), &current).await;
        }
        Ok(())
    }

    async fn notify_changed(&self, previous: Option<&TileLayerInfo>, current: &TileLayerInfo) {
        let Some(previous) = previous else {
            info!("Created tile layer '{}'", current.name);
            return;
        };
        let store = &self.services.store;
        if previous.name != current.name
            && let Err(error) = store.rename_layer(&previous.name, &current.name).await
        {
            error!(
                "Error renaming cached tiles '{}' -> '{}': {error}",
                previous.name, current.name
            );
        }
        let layer = &current.name;
        for removed in previous.gridset_ids.difference(&current.gridset_ids) {
            if let Err(error) = store.truncate_gridset(layer, removed).await {
                error!("Error truncating grid set '{removed}' of '{layer}': {error}");
            }
        }
        for removed in previous.mime_formats.difference(&current.mime_formats) {
            if let Err(error) = store.truncate_format(layer, *removed).await {
                error!("Error truncating format {removed} of '{layer}': {error}");
            }
        }
        for removed in previous.cached_styles.difference(&current.cached_styles) {
            if let Err(error) = store.truncate_style(layer, Some(removed)).await {
                error!("Error truncating style '{removed}' of '{layer}': {error}");
            }
        }
    }

    /// Evicts every cached tile of a layer.
    pub async fn truncate(&self, name: &str) -> CoreResult<()> {
        self.services
            .store
            .truncate_layer(name)
            .await
            .map_err(|source| {
                TileError::Store {
                    layer: name.to_string(),
                    source,
                }
                .into()
            })
    }

    /// Evicts a layer's cached tiles for one style (`None` = the default
    /// style).
    pub async fn truncate_style(&self, name: &str, style: Option<&str>) -> CoreResult<()> {
        self.services
            .store
            .truncate_style(name, style)
            .await
            .map_err(|source| {
                TileError::Store {
                    layer: name.to_string(),
                    source,
                }
                .into()
            })
    }

    /// Whether the rendering facility can answer feature-info probes for
    /// the layer's backing entity.
    #[must_use]
    pub fn is_queryable(&self, layer: &TileLayer) -> bool {
        self.catalog
            .published_by_id(layer.id())
            .is_some_and(|published| self.services.renderer.is_queryable(&published))
    }
}
