//! In-memory LRU cache for extracted data tiles.
//!
//! The cache is a passive key/value map with memory-bounded LRU
//! eviction. Serializing concurrent builders of the same key is the
//! caller's job (see `grid-extract`'s extraction service); the cache
//! itself only guarantees at-most-one entry per key and thread-safe
//! get/put.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use wms_common::{BoundingBox, CrsCode};

use crate::fingerprint::SourceFingerprint;

/// Identifies one previously computed extraction.
///
/// Equality is exact over every field; bbox doubles are compared by bit
/// pattern, with no floating-point tolerance. Requests built from the
/// same parsing path produce identical bits, and a changed source
/// fingerprint makes all older keys unmatchable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    layer_id: String,
    crs: CrsCode,
    bbox_bits: [u64; 4],
    width: usize,
    height: usize,
    t_index: Option<usize>,
    z_index: Option<usize>,
    fingerprint: SourceFingerprint,
}

impl TileCacheKey {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        layer_id: impl Into<String>,
        crs: CrsCode,
        bbox: &BoundingBox,
        width: usize,
        height: usize,
        t_index: Option<usize>,
        z_index: Option<usize>,
        fingerprint: SourceFingerprint,
    ) -> Self {
        Self {
            layer_id: layer_id.into(),
            crs,
            bbox_bits: bbox.to_bits(),
            width,
            height,
            t_index,
            z_index,
            fingerprint,
        }
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn fingerprint(&self) -> &SourceFingerprint {
        &self.fingerprint
    }
}

/// Statistics for the tile cache.
///
/// All fields are atomic for lock-free reads from metrics endpoints.
#[derive(Debug, Default)]
pub struct TileCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub size_bytes: AtomicU64,
    pub entry_count: AtomicU64,
}

impl TileCacheStats {
    /// Cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

struct Inner {
    cache: LruCache<TileCacheKey, Arc<Vec<f32>>>,
    current_bytes: usize,
}

/// Memory-bounded LRU cache mapping [`TileCacheKey`] to extracted data
/// arrays.
///
/// Entries are `Arc`-shared so a hit hands the data out without
/// copying. Internal storage sits behind a `Mutex`, supporting get/put
/// from many request threads.
pub struct TileCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
    stats: TileCacheStats,
}

impl TileCache {
    /// Create a cache with the given memory budget in megabytes.
    pub fn new(max_size_mb: usize) -> Self {
        // The LRU entry limit is a backstop; eviction is driven by the
        // memory budget below.
        const LRU_CAPACITY: usize = 1_000_000;
        let capacity = NonZeroUsize::new(LRU_CAPACITY).expect("capacity is nonzero");

        Self {
            inner: Mutex::new(Inner {
                cache: LruCache::new(capacity),
                current_bytes: 0,
            }),
            max_bytes: max_size_mb.saturating_mul(1024 * 1024),
            stats: TileCacheStats::default(),
        }
    }

    /// Look up a previously extracted tile.
    pub fn get(&self, key: &TileCacheKey) -> Option<Arc<Vec<f32>>> {
        let mut inner = self.lock_inner();
        match inner.cache.get(key) {
            Some(data) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(data))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an extracted tile, evicting least-recently-used entries
    /// until the new entry fits the memory budget.
    pub fn put(&self, key: TileCacheKey, data: Arc<Vec<f32>>) {
        let data_bytes = data.len() * std::mem::size_of::<f32>();
        // An entry larger than the whole budget is never cached, and
        // must not evict resident entries on its way to rejection.
        if data_bytes > self.max_bytes {
            return;
        }
        let mut inner = self.lock_inner();

        // Replacing an existing entry releases its bytes first.
        if let Some(existing) = inner.cache.pop(&key) {
            let existing_bytes = existing.len() * std::mem::size_of::<f32>();
            inner.current_bytes = inner.current_bytes.saturating_sub(existing_bytes);
        }

        let mut evicted = 0usize;
        while inner.current_bytes + data_bytes > self.max_bytes && !inner.cache.is_empty() {
            if let Some((_, old)) = inner.cache.pop_lru() {
                let old_bytes = old.len() * std::mem::size_of::<f32>();
                inner.current_bytes = inner.current_bytes.saturating_sub(old_bytes);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, current_bytes = inner.current_bytes, "tile cache eviction");
        }

        inner.cache.put(key, data);
        inner.current_bytes += data_bytes;

        self.stats
            .size_bytes
            .store(inner.current_bytes as u64, Ordering::Relaxed);
        self.stats
            .entry_count
            .store(inner.cache.len() as u64, Ordering::Relaxed);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock_inner().cache.len()
    }

    /// True if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current memory usage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.lock_inner().current_bytes
    }

    /// Cache statistics for monitoring.
    pub fn stats(&self) -> &TileCacheStats {
        &self.stats
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        inner.cache.clear();
        inner.current_bytes = 0;
        self.stats.size_bytes.store(0, Ordering::Relaxed);
        self.stats.entry_count.store(0, Ordering::Relaxed);
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking cache user cannot corrupt the map, so poisoning
        // is recoverable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn fingerprint(mtime_secs: i64, len: u64) -> SourceFingerprint {
        SourceFingerprint::new(
            "/data/ocean.nc",
            Utc.timestamp_opt(mtime_secs, 0).unwrap(),
            len,
        )
    }

    fn key(width: usize, fp: SourceFingerprint) -> TileCacheKey {
        TileCacheKey::new(
            "TMP",
            CrsCode::Epsg4326,
            &BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            width,
            256,
            Some(0),
            None,
            fp,
        )
    }

    #[test]
    fn test_put_then_get() {
        let cache = TileCache::new(16);
        let k = key(256, fingerprint(1_700_000_000, 1024));
        let data = Arc::new(vec![1.0f32, 2.0, 3.0]);

        assert!(cache.get(&k).is_none());
        cache.put(k.clone(), Arc::clone(&data));
        assert_eq!(cache.get(&k).unwrap(), data);

        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_any_field_change_misses() {
        let cache = TileCache::new(16);
        let fp = fingerprint(1_700_000_000, 1024);
        cache.put(key(256, fp.clone()), Arc::new(vec![0.5f32]));

        // Different width: different key.
        assert!(cache.get(&key(512, fp)).is_none());
    }

    #[test]
    fn test_changed_fingerprint_invalidates() {
        let cache = TileCache::new(16);
        let old = key(256, fingerprint(1_700_000_000, 1024));
        cache.put(old.clone(), Arc::new(vec![0.5f32]));

        // The file was rewritten: same path, new mtime and size.
        let fresh = key(256, fingerprint(1_700_009_999, 2048));
        assert!(cache.get(&fresh).is_none());
        // The stale entry is still addressable by its own key.
        assert!(cache.get(&old).is_some());
    }

    #[test]
    fn test_bbox_bits_are_exact() {
        let fp = fingerprint(1_700_000_000, 1024);
        let a = TileCacheKey::new(
            "TMP",
            CrsCode::Epsg4326,
            &BoundingBox::new(0.1 + 0.2, 0.0, 1.0, 1.0),
            64,
            64,
            None,
            None,
            fp.clone(),
        );
        let b = TileCacheKey::new(
            "TMP",
            CrsCode::Epsg4326,
            &BoundingBox::new(0.3, 0.0, 1.0, 1.0),
            64,
            64,
            None,
            None,
            fp,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_oversized_entry_rejected_without_evicting() {
        // 1 MB budget; a tile bigger than the whole budget is refused
        // and the resident entry survives untouched.
        let cache = TileCache::new(1);
        let resident = key(256, fingerprint(1_700_000_000, 1024));
        cache.put(resident.clone(), Arc::new(vec![1.0f32; 1024]));
        assert_eq!(cache.len(), 1);

        let big = key(512, fingerprint(1_700_000_000, 1024));
        cache.put(big, Arc::new(vec![0.0f32; 300 * 1024]));

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&resident).is_some());
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_memory_bounded_eviction() {
        // 1 MB budget, 256 KB tiles: at most four fit.
        let cache = TileCache::new(1);
        let tile = Arc::new(vec![0.0f32; 64 * 1024]);
        for t in 0..8 {
            let k = TileCacheKey::new(
                "TMP",
                CrsCode::Epsg4326,
                &BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                256,
                256,
                Some(t),
                None,
                fingerprint(1_700_000_000, 1024),
            );
            cache.put(k, Arc::clone(&tile));
        }
        assert!(cache.stats().evictions.load(Ordering::Relaxed) > 0);
        assert!(cache.size_bytes() <= 1024 * 1024);
        assert!(cache.len() <= 4);
    }

    #[test]
    fn test_replacement_keeps_one_entry_per_key() {
        let cache = TileCache::new(16);
        let k = key(256, fingerprint(1_700_000_000, 1024));
        cache.put(k.clone(), Arc::new(vec![1.0f32; 8]));
        cache.put(k.clone(), Arc::new(vec![2.0f32; 4]));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&k).unwrap().len(), 4);
        assert_eq!(cache.size_bytes(), 4 * std::mem::size_of::<f32>());
    }
}
