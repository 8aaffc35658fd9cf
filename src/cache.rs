use crate::types::{BoundaryDataset, LayerType};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub dataset: Arc<BoundaryDataset>,
    pub loaded_at: Instant,
}

impl CacheEntry {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }
}

/// One dataset and load timestamp per layer.
///
/// Shared by every loader it is handed to. Writes replace the whole entry, last writer wins.
#[derive(Debug, Default)]
pub struct LayerCache {
    entries: RwLock<HashMap<LayerType, CacheEntry>>,
}

impl LayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, layer: LayerType) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&layer).cloned()
    }

    pub fn insert(&self, layer: LayerType, dataset: Arc<BoundaryDataset>) {
        let entry = CacheEntry {
            dataset,
            loaded_at: Instant::now(),
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(layer, entry);
    }

    pub fn contains(&self, layer: LayerType) -> bool {
        self.get(layer).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Arc<BoundaryDataset> {
        Arc::new(BoundaryDataset { features: Vec::new() })
    }

    #[tokio::test(start_paused = true)]
    async fn entry_goes_stale_after_ttl() {
        let cache = LayerCache::new();
        cache.insert(LayerType::NrmBoundaries, dataset());

        let entry = cache.get(LayerType::NrmBoundaries).expect("entry");
        assert!(entry.is_fresh(DEFAULT_TTL));

        tokio::time::advance(DEFAULT_TTL).await;
        assert!(!entry.is_fresh(DEFAULT_TTL));
    }

    #[tokio::test(start_paused = true)]
    async fn reinsert_refreshes_timestamp() {
        let cache = LayerCache::new();
        cache.insert(LayerType::RegionBoundaries, dataset());
        tokio::time::advance(Duration::from_secs(40 * 60)).await;
        cache.insert(LayerType::RegionBoundaries, dataset());

        let entry = cache.get(LayerType::RegionBoundaries).expect("entry");
        assert!(entry.is_fresh(DEFAULT_TTL));
        assert!(!cache.contains(LayerType::ImcraBoundaries));
    }
}
