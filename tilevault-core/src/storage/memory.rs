use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use tilevault_tile_utils::TileFormat;
use tracing::{info, trace};

use super::{TileKey, TileStore, TileStoreError};

#[derive(Debug, Clone)]
struct StoredTile {
    payload: Vec<u8>,
    stored_at: Instant,
}

/// Single-process [`TileStore`] holding encoded tiles in a bounded moka
/// cache, sized by payload bytes.
#[derive(Debug, Clone)]
pub struct MemoryTileStore(Cache<TileKey, StoredTile>);

impl MemoryTileStore {
    /// Creates a store bounded to `max_size_bytes` of payload data.
    #[must_use]
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            .name("tile_store")
            .weigher(|_key: &TileKey, tile: &StoredTile| -> u32 {
                tile.payload.len().try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_size_bytes)
            .support_invalidation_closures()
            .build();
        Self(cache)
    }

    /// Number of cached tiles.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.0.entry_count()
    }

    /// Applies pending moka maintenance so counts are exact. Test helper.
    pub async fn sync(&self) {
        self.0.run_pending_tasks().await;
    }

    fn invalidate_matching(
        &self,
        description: &str,
        predicate: impl Fn(&TileKey) -> bool + Send + Sync + 'static,
    ) -> Result<(), TileStoreError> {
        self.0
            .invalidate_entries_if(move |key, _| predicate(key))
            .map_err(|e| TileStoreError::Backend(e.to_string()))?;
        info!("Invalidated cached tiles: {description}");
        Ok(())
    }
}

impl Default for MemoryTileStore {
    fn default() -> Self {
        // 512 MiB, the same default the main cache uses
        Self::new(512 * 1024 * 1024)
    }
}

#[async_trait]
impl TileStore for MemoryTileStore {
    async fn get_if_fresh(
        &self,
        key: &TileKey,
        max_age: Option<Duration>,
    ) -> Result<Option<Vec<u8>>, TileStoreError> {
        let Some(tile) = self.0.get(key).await else {
            trace!("tile store MISS for {key:?}");
            return Ok(None);
        };
        if let Some(max_age) = max_age
            && tile.stored_at.elapsed() > max_age
        {
            trace!("tile store STALE for {key:?}");
            self.0.invalidate(key).await;
            return Ok(None);
        }
        trace!("tile store HIT for {key:?}");
        Ok(Some(tile.payload))
    }

    async fn put(&self, key: TileKey, payload: Vec<u8>) -> Result<(), TileStoreError> {
        self.0
            .insert(
                key,
                StoredTile {
                    payload,
                    stored_at: Instant::now(),
                },
            )
            .await;
        Ok(())
    }

    async fn truncate_layer(&self, layer: &str) -> Result<(), TileStoreError> {
        let layer = layer.to_string();
        self.invalidate_matching(&format!("layer '{layer}'"), move |key| key.layer == layer)
    }

    async fn truncate_style(
        &self,
        layer: &str,
        style: Option<&str>,
    ) -> Result<(), TileStoreError> {
        let layer = layer.to_string();
        let style = style.map(ToString::to_string);
        self.invalidate_matching(
            &format!("layer '{layer}', style {style:?}"),
            move |key| key.layer == layer && key.style == style,
        )
    }

    async fn truncate_gridset(&self, layer: &str, gridset: &str) -> Result<(), TileStoreError> {
        let layer = layer.to_string();
        let gridset = gridset.to_string();
        self.invalidate_matching(
            &format!("layer '{layer}', grid set '{gridset}'"),
            move |key| key.layer == layer && key.gridset == gridset,
        )
    }

    async fn truncate_format(
        &self,
        layer: &str,
        format: TileFormat,
    ) -> Result<(), TileStoreError> {
        let layer = layer.to_string();
        self.invalidate_matching(&format!("layer '{layer}', format {format}"), move |key| {
            key.layer == layer && key.format == format
        })
    }

    async fn rename_layer(&self, old: &str, new: &str) -> Result<(), TileStoreError> {
        let moved: Vec<(TileKey, StoredTile)> = self
            .0
            .iter()
            .filter(|(key, _)| key.layer == old)
            .map(|(key, tile)| ((*key).clone(), tile))
            .collect();
        for (key, tile) in moved {
            self.0.invalidate(&key).await;
            let key = TileKey {
                layer: new.to_string(),
                ..key
            };
            self.0.insert(key, tile).await;
        }
        info!("Renamed cached tiles of layer '{old}' to '{new}'");
        Ok(())
    }

    async fn delete_layer(&self, layer: &str) -> Result<(), TileStoreError> {
        self.truncate_layer(layer).await
    }
}
