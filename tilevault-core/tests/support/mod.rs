#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use tilevault_tile_utils::{BoundingBox, GridSetRegistry, TileFormat};
use tilevault_core::catalog::{
    Catalog, CatalogEvent, GroupEntry, LayerEntry, MemoryCatalog, Published, QualifiedName,
};
use tilevault_core::config::CacheConfig;
use tilevault_core::layer::{
    CatalogLayerListener, CatalogProjection, CatalogStyleListener, MetaTileLocks, TileLayerStore,
    TileServices,
};
use tilevault_core::mediator::TileCacheMediator;
use tilevault_core::render::{
    FeatureInfoRequest, ImageTileEncoder, MapRenderer, RenderError, RenderRequest, RenderedMap,
};
use tilevault_core::storage::{MemoryTileStore, TileKey, TileStore, TileStoreError};

/// Renderer that counts invocations and paints solid rasters. The optional
/// delay widens the render window so concurrent requests really overlap.
#[derive(Debug)]
pub struct CountingRenderer {
    renders: AtomicUsize,
    delay: Duration,
}

impl CountingRenderer {
    pub fn new(delay: Duration) -> Self {
        Self {
            renders: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MapRenderer for CountingRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedMap, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(RenderedMap::Raster(RgbaImage::from_pixel(
            request.width,
            request.height,
            Rgba([10, 120, 200, 255]),
        )))
    }

    async fn feature_info(&self, _request: &FeatureInfoRequest) -> Result<Vec<u8>, RenderError> {
        Ok(br#"{"features":[]}"#.to_vec())
    }

    fn is_queryable(&self, _published: &Published) -> bool {
        true
    }
}

/// One observed mutation of the recording tile store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    TruncateLayer(String),
    TruncateStyle(String, Option<String>),
    TruncateGridset(String, String),
    TruncateFormat(String, TileFormat),
    Rename(String, String),
    Delete(String),
}

/// [`TileStore`] decorator recording every administrative call while
/// delegating storage to a [`MemoryTileStore`].
#[derive(Debug)]
pub struct RecordingStore {
    inner: MemoryTileStore,
    calls: Mutex<Vec<StoreCall>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryTileStore::new(64 * 1024 * 1024),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &MemoryTileStore {
        &self.inner
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_matching(&self, predicate: impl Fn(&StoreCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TileStore for RecordingStore {
    async fn get_if_fresh(
        &self,
        key: &TileKey,
        max_age: Option<Duration>,
    ) -> Result<Option<Vec<u8>>, TileStoreError> {
        self.inner.get_if_fresh(key, max_age).await
    }

    async fn put(&self, key: TileKey, payload: Vec<u8>) -> Result<(), TileStoreError> {
        self.inner.put(key, payload).await
    }

    async fn truncate_layer(&self, layer: &str) -> Result<(), TileStoreError> {
        self.record(StoreCall::TruncateLayer(layer.to_string()));
        self.inner.truncate_layer(layer).await
    }

    async fn truncate_style(
        &self,
        layer: &str,
        style: Option<&str>,
    ) -> Result<(), TileStoreError> {
        self.record(StoreCall::TruncateStyle(
            layer.to_string(),
            style.map(ToString::to_string),
        ));
        self.inner.truncate_style(layer, style).await
    }

    async fn truncate_gridset(&self, layer: &str, gridset: &str) -> Result<(), TileStoreError> {
        self.record(StoreCall::TruncateGridset(
            layer.to_string(),
            gridset.to_string(),
        ));
        self.inner.truncate_gridset(layer, gridset).await
    }

    async fn truncate_format(
        &self,
        layer: &str,
        format: TileFormat,
    ) -> Result<(), TileStoreError> {
        self.record(StoreCall::TruncateFormat(layer.to_string(), format));
        self.inner.truncate_format(layer, format).await
    }

    async fn rename_layer(&self, old: &str, new: &str) -> Result<(), TileStoreError> {
        self.record(StoreCall::Rename(old.to_string(), new.to_string()));
        self.inner.rename_layer(old, new).await
    }

    async fn delete_layer(&self, layer: &str) -> Result<(), TileStoreError> {
        self.record(StoreCall::Delete(layer.to_string()));
        self.inner.delete_layer(layer).await
    }
}

/// The whole subsystem wired over in-memory collaborators and a temporary
/// descriptor directory.
pub struct TestStack {
    pub catalog: Arc<MemoryCatalog>,
    pub renderer: Arc<CountingRenderer>,
    pub tile_store: Arc<RecordingStore>,
    pub locks: Arc<MetaTileLocks>,
    pub projection: Arc<CatalogProjection>,
    pub mediator: Arc<TileCacheMediator>,
    pub layer_listener: CatalogLayerListener,
    pub style_listener: CatalogStyleListener,
    _descriptor_dir: tempfile::TempDir,
}

impl TestStack {
    pub fn new() -> Self {
        Self::with_render_delay(Duration::ZERO)
    }

    pub fn with_render_delay(delay: Duration) -> Self {
        let catalog: Arc<MemoryCatalog> = Arc::new(MemoryCatalog::new());
        let renderer = Arc::new(CountingRenderer::new(delay));
        let tile_store = Arc::new(RecordingStore::new());
        let locks = Arc::new(MetaTileLocks::new());
        let descriptor_dir = tempfile::tempdir().expect("temp dir");

        let services = TileServices {
            store: Arc::clone(&tile_store) as Arc<dyn TileStore>,
            renderer: Arc::clone(&renderer) as Arc<dyn MapRenderer>,
            encoder: Arc::new(ImageTileEncoder),
            locks: Arc::clone(&locks),
            gridsets: Arc::new(GridSetRegistry::with_defaults()),
        };

        let config = CacheConfig::default();
        let layer_store = Arc::new(TileLayerStore::new(descriptor_dir.path()));
        let projection = CatalogProjection::new(
            Arc::clone(&catalog) as Arc<dyn Catalog>,
            layer_store,
            services.clone(),
            config.lock_timeout(),
        );
        let mediator = TileCacheMediator::new(
            Arc::clone(&catalog) as Arc<dyn Catalog>,
            Arc::clone(&projection),
            services,
            config,
        );
        let layer_listener = CatalogLayerListener::new(Arc::clone(&mediator));
        let style_listener = CatalogStyleListener::new(Arc::clone(&mediator));

        Self {
            catalog,
            renderer,
            tile_store,
            locks,
            projection,
            mediator,
            layer_listener,
            style_listener,
            _descriptor_dir: descriptor_dir,
        }
    }

    /// Feeds one event through both listeners, the way an embedding host
    /// fans catalog notifications out.
    pub async fn dispatch(&self, event: &CatalogEvent) {
        self.layer_listener.handle_event(event).await.expect("layer listener");
        self.style_listener.handle_event(event).await.expect("style listener");
    }

    /// Adds an entity to the catalog and runs the add event, creating the
    /// default tile layer.
    pub async fn seed(&self, published: Published) {
        let event = self.catalog.add(published);
        self.dispatch(&event).await;
    }
}

pub fn world_bounds() -> BoundingBox {
    BoundingBox::new(-179.0, -85.0, 179.0, 85.0)
}

pub fn layer_entry(id: &str, namespace: &str, local: &str) -> LayerEntry {
    LayerEntry {
        id: id.to_string(),
        name: QualifiedName::qualified(namespace, local),
        enabled: true,
        default_style: Some("default".to_string()),
        styles: BTreeSet::from(["night".to_string()]),
        wgs84_bounds: world_bounds(),
        metadata: BTreeMap::new(),
    }
}

pub fn group_entry(id: &str, name: &str, members: &[(&str, Option<&str>)]) -> GroupEntry {
    GroupEntry {
        id: id.to_string(),
        name: QualifiedName::simple(name),
        layers: members.iter().map(|(m, _)| (*m).to_string()).collect(),
        styles: members
            .iter()
            .map(|(_, s)| s.map(ToString::to_string))
            .collect(),
        wgs84_bounds: world_bounds(),
        metadata: BTreeMap::new(),
    }
}
