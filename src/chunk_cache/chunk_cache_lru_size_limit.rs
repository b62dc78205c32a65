use std::sync::Arc;

use moka::{
    policy::EvictionPolicy,
    sync::{Cache, CacheBuilder},
};

use crate::chunk::{ChunkBlock, ChunkKey};

use super::{ChunkCache, ChunkCacheResult, ChunkLoader};

/// A chunk cache with a fixed size capacity.
///
/// Each cell is weighed by the size of its decoded samples.
pub struct ChunkCacheLruSizeLimit {
    cache: Cache<ChunkKey, Arc<ChunkBlock>>,
}

impl ChunkCacheLruSizeLimit {
    /// Create a new [`ChunkCacheLruSizeLimit`] with a capacity in bytes of `capacity`.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        let cache = CacheBuilder::new(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .weigher(|_k, v: &Arc<ChunkBlock>| u32::try_from(v.size_bytes()).unwrap_or(u32::MAX))
            .build();
        Self { cache }
    }
}

impl ChunkCache for ChunkCacheLruSizeLimit {
    fn get(&self, key: &ChunkKey, loader: &ChunkLoader<'_>) -> ChunkCacheResult {
        self.cache.try_get_with(*key, || loader(key).map(Arc::new))
    }

    fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        usize::try_from(self.cache.entry_count()).unwrap_or(usize::MAX)
    }
}
