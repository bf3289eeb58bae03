use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tilevault_tile_utils::TileFormat;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Identity of one in-flight metatile render: requests with equal keys must
/// serialize on the same lock instance, unrelated keys must never contend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaTileLockKey {
    /// Tile layer id (ids survive renames, names do not).
    pub layer_id: String,
    /// Grid set of the metatile.
    pub gridset: String,
    /// Metatile x position.
    pub meta_x: u32,
    /// Metatile y position.
    pub meta_y: u32,
    /// Zoom level.
    pub z: u8,
    /// Digest of the filtered request parameters (style).
    pub parameters_id: u64,
    /// Output format.
    pub format: TileFormat,
}

impl MetaTileLockKey {
    /// Digest for the filtered parameters component of the key. The default
    /// style hashes to 0 so unparameterized requests need no allocation.
    #[must_use]
    pub fn parameters_id(style: Option<&str>) -> u64 {
        style.map_or(0, |style| {
            xxhash_rust::xxh3::xxh3_64(format!("styles={style}").as_bytes())
        })
    }
}

#[derive(Debug, Default)]
struct LockSlot {
    mutex: Arc<Mutex<()>>,
    waiters: AtomicUsize,
}

/// Canonicalizing, reference-counted arena of per-metatile locks.
///
/// Acquire canonicalizes the key to a single shared slot and counts the
/// caller as a waiter before locking; dropping the guard unlocks, decrements
/// and removes the slot once no waiter remains. The table therefore holds
/// only keys with live interest and cannot grow unboundedly, without relying
/// on weak references or finalization.
#[derive(Debug, Default)]
pub struct MetaTileLocks {
    slots: DashMap<MetaTileLockKey, Arc<LockSlot>>,
}

impl MetaTileLocks {
    /// An empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`, waiting for any in-flight holder of the
    /// same key. Unrelated keys proceed independently.
    pub async fn acquire(&self, key: MetaTileLockKey) -> MetaTileLockGuard<'_> {
        let slot = {
            // the entry guard keeps release's remove_if out until the waiter
            // is counted
            let entry = self.slots.entry(key.clone()).or_default();
            entry.value().waiters.fetch_add(1, Ordering::SeqCst);
            Arc::clone(entry.value())
        };
        trace!("waiting for metatile lock {key:?}");
        let guard = Arc::clone(&slot.mutex).lock_owned().await;
        MetaTileLockGuard {
            arena: self,
            key,
            slot,
            guard: Some(guard),
        }
    }

    /// Number of live lock slots. An idle engine reports 0.
    #[must_use]
    pub fn live_slots(&self) -> usize {
        self.slots.len()
    }
}

/// RAII guard of one metatile lock. Dropping it releases the lock and
/// reclaims the slot when no other request waits on the same key.
#[derive(Debug)]
pub struct MetaTileLockGuard<'a> {
    arena: &'a MetaTileLocks,
    key: MetaTileLockKey,
    slot: Arc<LockSlot>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for MetaTileLockGuard<'_> {
    fn drop(&mut self) {
        // unlock before the waiter count goes down
        self.guard.take();
        if self.slot.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.arena
                .slots
                .remove_if(&self.key, |_, slot| {
                    slot.waiters.load(Ordering::SeqCst) == 0
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn key(layer: &str, meta_x: u32) -> MetaTileLockKey {
        MetaTileLockKey {
            layer_id: layer.to_string(),
            gridset: "WebMercatorQuad".to_string(),
            meta_x,
            meta_y: 0,
            z: 3,
            parameters_id: 0,
            format: TileFormat::Png,
        }
    }

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(MetaTileLocks::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire(key("layer", 1)).await;
                let value = counter.fetch_add(1, Ordering::SeqCst);
                // if two tasks were inside at once, both would observe the
                // same pre-increment value
                tokio::time::sleep(Duration::from_millis(5)).await;
                assert_eq!(counter.load(Ordering::SeqCst), value + 1);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(locks.live_slots(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = MetaTileLocks::new();
        let _a = locks.acquire(key("layer", 1)).await;
        // would deadlock if unrelated keys shared a slot
        let _b = locks.acquire(key("layer", 2)).await;
        let _c = locks.acquire(key("other", 1)).await;
        assert_eq!(locks.live_slots(), 3);
    }

    #[tokio::test]
    async fn slots_are_reclaimed_when_idle() {
        let locks = MetaTileLocks::new();
        for i in 0..100 {
            let _guard = locks.acquire(key("layer", i)).await;
        }
        assert_eq!(locks.live_slots(), 0);
    }

    #[test]
    fn default_style_hashes_to_zero() {
        assert_eq!(MetaTileLockKey::parameters_id(None), 0);
        assert_ne!(MetaTileLockKey::parameters_id(Some("night")), 0);
        assert_ne!(
            MetaTileLockKey::parameters_id(Some("night")),
            MetaTileLockKey::parameters_id(Some("day"))
        );
    }
}
