use std::sync::Arc;

use moka::{
    policy::EvictionPolicy,
    sync::{Cache, CacheBuilder},
};

use crate::chunk::{ChunkBlock, ChunkKey};

use super::{ChunkCache, ChunkCacheResult, ChunkLoader};

/// A chunk cache with a fixed chunk capacity.
pub struct ChunkCacheLruChunkLimit {
    cache: Cache<ChunkKey, Arc<ChunkBlock>>,
}

impl ChunkCacheLruChunkLimit {
    /// Create a new [`ChunkCacheLruChunkLimit`] with a capacity in chunks of `chunk_capacity`.
    #[must_use]
    pub fn new(chunk_capacity: u64) -> Self {
        let cache = CacheBuilder::new(chunk_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { cache }
    }
}

impl ChunkCache for ChunkCacheLruChunkLimit {
    fn get(&self, key: &ChunkKey, loader: &ChunkLoader<'_>) -> ChunkCacheResult {
        self.cache.try_get_with(*key, || loader(key).map(Arc::new))
    }

    fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        usize::try_from(self.cache.entry_count()).unwrap_or(usize::MAX)
    }
}
