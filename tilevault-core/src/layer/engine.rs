use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tilevault_tile_utils::{
    GridError, GridSetRegistry, GridSubset, MetaTileGeometry, TileCoord, TileFormat,
};
use tracing::{debug, trace, warn};

use crate::catalog::{Catalog, GroupEntry, LayerEntry, Published, meta_keys};
use crate::layer::info::STYLES_PARAMETER;
use crate::layer::metatile::MetaTile;
use crate::layer::{MetaTileLockKey, MetaTileLocks, StyleFilter, TileError, TileLayerInfo};
use crate::render::{FeatureInfoRequest, MapRenderer, RenderRequest, TileEncoder};
use crate::storage::{TileKey, TileStore};
use crate::{CoreError, CoreResult};

/// The injected collaborators every tile layer serves with. Constructed
/// once and shared; nothing in here is a process-wide static.
#[derive(Debug, Clone)]
pub struct TileServices {
    /// Backing tile store.
    pub store: Arc<dyn TileStore>,
    /// External rendering pipeline.
    pub renderer: Arc<dyn MapRenderer>,
    /// Tile payload encoder.
    pub encoder: Arc<dyn TileEncoder>,
    /// Canonicalizing per-metatile lock arena.
    pub locks: Arc<MetaTileLocks>,
    /// Known grid sets.
    pub gridsets: Arc<GridSetRegistry>,
}

/// One incoming tile request, already routed to a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    /// Grid set the coordinates belong to.
    pub gridset_id: String,
    /// Requested tile.
    pub coord: TileCoord,
    /// Requested output format.
    pub format: TileFormat,
    /// Raw request parameters, lower-cased keys (e.g. `styles`).
    pub parameters: BTreeMap<String, String>,
}

impl TileRequest {
    /// A request with no extra parameters.
    #[must_use]
    pub fn new(gridset_id: impl Into<String>, coord: TileCoord, format: TileFormat) -> Self {
        Self {
            gridset_id: gridset_id.into(),
            coord,
            format,
            parameters: BTreeMap::new(),
        }
    }

    /// Adds a STYLES parameter.
    #[must_use]
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.parameters
            .insert(STYLES_PARAMETER.to_string(), style.into());
        self
    }
}

/// How the response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    /// Served from the backing store.
    Hit,
    /// Rendered because the store had no fresh tile.
    Miss,
    /// Rendered with the cache read path skipped.
    Bypass,
}

/// A served tile plus its response metadata.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Encoded tile payload.
    pub payload: Vec<u8>,
    /// Payload format.
    pub format: TileFormat,
    /// HTTP-style status, 200 on success.
    pub status: u16,
    /// Whether the cache served or the backend rendered.
    pub cache_result: CacheResult,
    /// Diagnostic echo of the requested tile index.
    pub tile_index: TileCoord,
    /// Client cache-expiry to advertise, if any.
    pub expires_in: Option<Duration>,
}

/// A cacheable tile layer bound to one catalog entity.
///
/// Wraps an owned copy of the persisted [`TileLayerInfo`] plus the entity
/// *id*; the entity itself is re-fetched from the catalog on every access,
/// because the catalog mutates it independently. Grid subsets and the
/// STYLES filter are derived lazily, and a derivation failure disables the
/// layer with a sticky error message instead of failing the whole system.
pub struct TileLayer {
    info: TileLayerInfo,
    catalog: Arc<dyn Catalog>,
    services: TileServices,
    subsets: Mutex<Option<HashMap<String, GridSubset>>>,
    style_filter: Mutex<Option<StyleFilter>>,
    config_error: Mutex<Option<String>>,
}

impl std::fmt::Debug for TileLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileLayer")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl TileLayer {
    /// Wraps a descriptor around the injected collaborators.
    #[must_use]
    pub fn new(info: TileLayerInfo, catalog: Arc<dyn Catalog>, services: TileServices) -> Self {
        Self {
            info,
            catalog,
            services,
            subsets: Mutex::new(None),
            style_filter: Mutex::new(None),
            config_error: Mutex::new(None),
        }
    }

    /// The stable layer id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// The tile-layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// The descriptor this layer serves with.
    #[must_use]
    pub fn info(&self) -> &TileLayerInfo {
        &self.info
    }

    /// The sticky configuration error, if the layer is broken.
    #[must_use]
    pub fn config_error(&self) -> Option<String> {
        self.config_error
            .lock()
            .expect("config error lock poisoned")
            .clone()
    }

    fn set_config_error(&self, message: String) {
        warn!("Tile layer '{}' disabled: {message}", self.info.name);
        *self
            .config_error
            .lock()
            .expect("config error lock poisoned") = Some(message);
    }

    /// Re-fetches the backing catalog entity. Never cached: the catalog
    /// owns and mutates it.
    pub fn published(&self) -> Result<Published, TileError> {
        self.catalog
            .published_by_id(&self.info.id)
            .ok_or_else(|| TileError::DanglingCatalogEntry {
                layer: self.info.name.clone(),
                id: self.info.id.clone(),
            })
    }

    /// Whether the layer currently serves tiles: enabled by configuration,
    /// free of configuration errors, and backed by an enabled entity.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.info.enabled
            && self.config_error().is_none()
            && self
                .published()
                .map(|published| published.catalog_enabled())
                .unwrap_or(false)
    }

    /// Cache bypass is a fixed capability of catalog-backed layers.
    #[must_use]
    pub fn cache_bypass_allowed(&self) -> bool {
        true
    }

    fn check_serviceable(&self) -> Result<(), TileError> {
        if !self.info.enabled {
            return Err(TileError::Disabled {
                layer: self.info.name.clone(),
                reason: "caching is disabled by configuration".to_string(),
            });
        }
        if let Some(message) = self.config_error() {
            return Err(TileError::Disabled {
                layer: self.info.name.clone(),
                reason: message,
            });
        }
        let published = self.published()?;
        if !published.catalog_enabled() {
            return Err(TileError::Disabled {
                layer: self.info.name.clone(),
                reason: "the backing catalog layer is disabled".to_string(),
            });
        }
        Ok(())
    }

    /// The derived grid subsets, one per configured grid-set id.
    pub fn grid_subsets(&self) -> Result<HashMap<String, GridSubset>, TileError> {
        let mut slot = self.subsets.lock().expect("grid subset lock poisoned");
        if let Some(subsets) = slot.as_ref() {
            return Ok(subsets.clone());
        }
        if let Some(message) = self.config_error() {
            return Err(TileError::Configuration {
                layer: self.info.name.clone(),
                message,
            });
        }
        let published = self.published()?;
        let mut subsets = HashMap::with_capacity(self.info.gridset_ids.len());
        for gridset_id in &self.info.gridset_ids {
            let derived = self
                .services
                .gridsets
                .require(gridset_id)
                .and_then(|gridset| {
                    GridSubset::covering(gridset, published.wgs84_bounds(), self.info.cached_zooms)
                });
            match derived {
                Ok(subset) => {
                    subsets.insert(gridset_id.clone(), subset);
                }
                Err(error) => {
                    let message = format!(
                        "can't create grid subset '{gridset_id}' for '{}': {error}",
                        self.info.name
                    );
                    self.set_config_error(message.clone());
                    return Err(TileError::Configuration {
                        layer: self.info.name.clone(),
                        message,
                    });
                }
            }
        }
        *slot = Some(subsets.clone());
        Ok(subsets)
    }

    /// One grid subset by grid-set id.
    pub fn grid_subset(&self, gridset_id: &str) -> Result<GridSubset, TileError> {
        let subsets = self.grid_subsets()?;
        subsets
            .get(gridset_id)
            .cloned()
            .ok_or_else(|| TileError::Grid(GridError::UnknownGridSet(gridset_id.to_string())))
    }

    /// The lazily computed STYLES parameter filter.
    pub fn style_filter(&self) -> Result<StyleFilter, TileError> {
        let mut slot = self.style_filter.lock().expect("style filter lock poisoned");
        if let Some(filter) = slot.as_ref() {
            return Ok(filter.clone());
        }
        let published = self.published()?;
        let default_style = match &published {
            Published::Layer(layer) => match &layer.default_style {
                Some(style) => Some(style.clone()),
                None => {
                    let message = "the backing layer has no default style".to_string();
                    self.set_config_error(message.clone());
                    return Err(TileError::Configuration {
                        layer: self.info.name.clone(),
                        message,
                    });
                }
            },
            Published::Group(_) => None,
        };
        let filter = StyleFilter::new(default_style, &self.info.cached_styles);
        *slot = Some(filter.clone());
        Ok(filter)
    }

    /// Drops the computed STYLES filter so the next request rebuilds it.
    /// Called whenever the cached-styles configuration changes.
    pub fn reset_style_filter(&self) {
        *self
            .style_filter
            .lock()
            .expect("style filter lock poisoned") = None;
    }

    /// Serves one tile: cache fast path, then coalesced render.
    pub async fn get_tile(&self, request: &TileRequest) -> CoreResult<TileResponse> {
        self.check_serviceable()?;
        if !self.info.mime_formats.contains(&request.format) {
            return Err(TileError::UnsupportedFormat {
                layer: self.info.name.clone(),
                format: request.format,
            }
            .into());
        }
        let subset = self.grid_subset(&request.gridset_id)?;
        subset.check_coverage(request.coord).map_err(TileError::Grid)?;
        let style = self
            .style_filter()?
            .resolve(request.parameters.get(STYLES_PARAMETER).map(String::as_str))?;
        let factors = self.meta_factors(request.format);
        self.metatiling_response(request, &subset, style, factors, true)
            .await
    }

    /// Serves one tile with the cache read path skipped; the rendered
    /// result is still written through where the layer caches at this zoom.
    pub async fn non_cached_tile(&self, request: &TileRequest) -> CoreResult<TileResponse> {
        self.check_serviceable()?;
        let subset = self.grid_subset(&request.gridset_id)?;
        subset.check_coverage(request.coord).map_err(TileError::Grid)?;
        let style = self
            .style_filter()?
            .resolve(request.parameters.get(STYLES_PARAMETER).map(String::as_str))?;
        self.metatiling_response(request, &subset, style, (1, 1), false)
            .await
    }

    /// Warms the cache through the identical pipeline as live requests.
    /// Returns `Ok(None)` for tiles outside the cacheable zoom range.
    pub async fn seed_tile(
        &self,
        request: &TileRequest,
        try_cache: bool,
    ) -> CoreResult<Option<TileResponse>> {
        self.check_serviceable()?;
        let subset = self.grid_subset(&request.gridset_id)?;
        if !subset.should_cache_at(request.coord.z) {
            trace!(
                "Ignoring seed call for {} outside the cacheable zoom range",
                request.coord
            );
            return Ok(None);
        }
        subset.check_coverage(request.coord).map_err(TileError::Grid)?;
        let style = self
            .style_filter()?
            .resolve(request.parameters.get(STYLES_PARAMETER).map(String::as_str))?;
        let factors = self.meta_factors(request.format);
        let response = self
            .metatiling_response(request, &subset, style, factors, try_cache)
            .await?;
        Ok(Some(response))
    }

    /// Answers a feature-info probe at pixel `(i, j)` of the requested
    /// tile. Never cached.
    pub async fn get_feature_info(
        &self,
        request: &TileRequest,
        i: u32,
        j: u32,
    ) -> CoreResult<Vec<u8>> {
        self.check_serviceable()?;
        let published = self.published()?;
        if !self.services.renderer.is_queryable(&published) {
            return Err(TileError::NotQueryable {
                layer: self.info.name.clone(),
            }
            .into());
        }
        let subset = self.grid_subset(&request.gridset_id)?;
        subset.check_coverage(request.coord).map_err(TileError::Grid)?;
        let style = self
            .style_filter()?
            .resolve(request.parameters.get(STYLES_PARAMETER).map(String::as_str))?;
        let gridset = subset.gridset();
        let bbox = gridset.tile_bounds(request.coord).map_err(TileError::Grid)?;
        let (width, height) = gridset.tile_size();
        let info_request = FeatureInfoRequest {
            layer: self.info.name.clone(),
            style,
            srs: gridset.srs(),
            bbox,
            width,
            height,
            i,
            j,
            info_format: request.format,
        };
        self.services
            .renderer
            .feature_info(&info_request)
            .await
            .map_err(|source| {
                CoreError::Tile(TileError::Render {
                    layer: self.info.name.clone(),
                    source,
                })
            })
    }

    /// The client cache-expiry to advertise: the descriptor's value if set,
    /// otherwise derived from the catalog entity's caching metadata (for a
    /// group, the minimum over its member layers).
    #[must_use]
    pub fn expire_clients(&self) -> Option<Duration> {
        let seconds = if self.info.expire_clients > 0 {
            self.info.expire_clients
        } else {
            match self.published() {
                Ok(Published::Layer(layer)) => layer_max_age(&layer),
                Ok(Published::Group(group)) => self.group_max_age(&group),
                Err(_) => 0,
            }
        };
        (seconds > 0).then(|| Duration::from_secs(u64::from(seconds)))
    }

    fn group_max_age(&self, group: &GroupEntry) -> u32 {
        group
            .layers
            .iter()
            .map(|member| {
                self.catalog
                    .layer_by_name(member)
                    .map_or(0, |layer| layer_max_age(&layer))
            })
            .min()
            .unwrap_or(0)
    }

    fn meta_factors(&self, format: TileFormat) -> (u32, u32) {
        if format.supports_tiling() {
            (self.info.meta_tiling_x, self.info.meta_tiling_y)
        } else {
            (1, 1)
        }
    }

    fn tile_key(&self, request: &TileRequest, coord: TileCoord, style: &Option<String>) -> TileKey {
        TileKey {
            layer: self.info.name.clone(),
            gridset: request.gridset_id.clone(),
            coord,
            format: request.format,
            style: style.clone(),
        }
    }

    /// A store failure on the read path degrades to a miss instead of
    /// failing the request; the render path below is the fallback.
    async fn try_cache_fetch(&self, key: &TileKey, max_age: Option<Duration>) -> Option<Vec<u8>> {
        match self.services.store.get_if_fresh(key, max_age).await {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    "Cache read failed for '{}' {}: {error}",
                    self.info.name, key.coord
                );
                None
            }
        }
    }

    async fn metatiling_response(
        &self,
        request: &TileRequest,
        subset: &GridSubset,
        style: Option<String>,
        factors: (u32, u32),
        try_cache: bool,
    ) -> CoreResult<TileResponse> {
        let coord = request.coord;
        let expiry = self.info.expire_cache_at(coord.z);
        let cache_reads = try_cache && expiry >= 0;
        let max_age = (expiry > 0).then(|| Duration::from_secs(expiry.unsigned_abs()));
        let key = self.tile_key(request, coord, &style);

        if cache_reads && let Some(payload) = self.try_cache_fetch(&key, max_age).await {
            return Ok(self.finalize(payload, request, CacheResult::Hit));
        }

        let gutter = if request.format.is_vector() {
            0
        } else {
            self.info.gutter
        };
        let geometry =
            MetaTileGeometry::compute(subset, coord, factors, gutter).map_err(TileError::Grid)?;
        let (meta_x, meta_y, z) = geometry.meta_index();
        let lock_key = MetaTileLockKey {
            layer_id: self.info.id.clone(),
            gridset: request.gridset_id.clone(),
            meta_x,
            meta_y,
            z,
            parameters_id: MetaTileLockKey::parameters_id(style.as_deref()),
            format: request.format,
        };
        let _lock = self.services.locks.acquire(lock_key).await;

        // double-check: a concurrent holder may have rendered this metatile
        if cache_reads && let Some(payload) = self.try_cache_fetch(&key, max_age).await {
            trace!(
                "Returning cache hit for metatile ({meta_x}, {meta_y}, {z}) of '{}'",
                self.info.name
            );
            return Ok(self.finalize(payload, request, CacheResult::Hit));
        }

        debug!(
            "Submitting render request for metatile ({meta_x}, {meta_y}, {z}) of '{}'",
            self.info.name
        );
        let (width, height) = geometry.pixel_size();
        let render_request = RenderRequest {
            layer: self.info.name.clone(),
            style: style.clone(),
            srs: subset.gridset().srs(),
            bbox: *geometry.bounds(),
            width,
            height,
            parameters: request
                .parameters
                .iter()
                .filter(|(name, _)| name.as_str() != STYLES_PARAMETER)
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        };
        let map = self
            .services
            .renderer
            .render(&render_request)
            .await
            .and_then(|map| MetaTile::new(geometry, map))
            .map_err(|source| TileError::Render {
                layer: self.info.name.clone(),
                source,
            })?;

        let store_tiles = expiry >= 0 && subset.should_cache_at(coord.z);
        let mut requested_payload = None;
        for tile in map.geometry().tiles() {
            let payload = map
                .encode_tile(tile, request.format, self.services.encoder.as_ref())
                .map_err(|source| TileError::Render {
                    layer: self.info.name.clone(),
                    source,
                })?;
            if tile == coord {
                requested_payload = Some(payload.clone());
            }
            if store_tiles {
                self.services
                    .store
                    .put(self.tile_key(request, tile, &style), payload)
                    .await
                    .map_err(|source| TileError::Store {
                        layer: self.info.name.clone(),
                        source,
                    })?;
            }
        }

        let payload = requested_payload.ok_or_else(|| TileError::Configuration {
            layer: self.info.name.clone(),
            message: format!("metatile did not cover the requested tile {coord}"),
        })?;
        let cache_result = if try_cache {
            CacheResult::Miss
        } else {
            CacheResult::Bypass
        };
        Ok(self.finalize(payload, request, cache_result))
    }

    fn finalize(
        &self,
        payload: Vec<u8>,
        request: &TileRequest,
        cache_result: CacheResult,
    ) -> TileResponse {
        TileResponse {
            payload,
            format: request.format,
            status: 200,
            cache_result,
            tile_index: request.coord,
            expires_in: self.expire_clients(),
        }
    }
}

fn layer_max_age(layer: &LayerEntry) -> u32 {
    if layer
        .metadata
        .get(meta_keys::CACHING_ENABLED)
        .is_none_or(|enabled| enabled != "true")
    {
        return 0;
    }
    layer
        .metadata
        .get(meta_keys::CACHING_MAX_AGE)
        .and_then(|age| age.parse().ok())
        .unwrap_or(0)
}
