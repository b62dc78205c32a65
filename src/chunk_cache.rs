//! Per-dataset chunk caches with single-flight loading.
//!
//! A [`ChunkCache`] maps a [`ChunkKey`] to a shared [`ChunkBlock`].
//! On a miss, exactly one caller per key runs the loader while concurrent callers for the same key wait for its outcome.
//! Callers for different keys never wait on each other.
//! Failed loads are not retained, so the next request for that key retries the loader.
//!
//! Both implementations are bounded and evict least recently used cells:
//!  - [`ChunkCacheLruChunkLimit`]: a capacity in cells, and
//!  - [`ChunkCacheLruSizeLimit`]: a capacity in bytes of decoded samples.
//!
//! Use [`ChunkCacheCapacity`] to pick one from configuration.

mod chunk_cache_lru_chunk_limit;
mod chunk_cache_lru_size_limit;

pub use chunk_cache_lru_chunk_limit::ChunkCacheLruChunkLimit;
pub use chunk_cache_lru_size_limit::ChunkCacheLruSizeLimit;

use std::sync::Arc;

use thiserror::Error;

use crate::chunk::{CellGeometry, ChunkBlock, ChunkBlockError, ChunkKey};

/// A chunk load error.
#[derive(Debug, Error)]
pub enum ChunkLoadError {
    /// The request-derived geometry is not valid for the cell.
    #[error("invalid cell geometry {0}")]
    InvalidGeometry(CellGeometry),
    /// The cell does not exist in the dataset.
    #[error("cell {0} does not exist")]
    InvalidChunkKey(ChunkKey),
    /// The produced block is malformed.
    #[error(transparent)]
    ChunkBlockError(#[from] ChunkBlockError),
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// The loader invoked by a [`ChunkCache`] on a miss.
pub type ChunkLoader<'a> = dyn Fn(&ChunkKey) -> Result<ChunkBlock, ChunkLoadError> + 'a;

/// The result of a [`ChunkCache::get`].
///
/// The error is shared between all callers that waited on the same failed load.
pub type ChunkCacheResult = Result<Arc<ChunkBlock>, Arc<ChunkLoadError>>;

/// Traits for a chunk cache.
pub trait ChunkCache: Send + Sync {
    /// Retrieve a chunk from the cache, invoking `loader` if it is absent.
    ///
    /// Concurrent calls for the same absent `key` are coalesced into a single invocation of `loader`.
    ///
    /// # Errors
    /// Returns the error of `loader` if it fails. The failure is not cached.
    fn get(&self, key: &ChunkKey, loader: &ChunkLoader<'_>) -> ChunkCacheResult;

    /// Return the number of chunks in the cache.
    #[must_use]
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    #[must_use]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The capacity of the chunk cache of each dataset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChunkCacheCapacity {
    /// A maximum number of cells.
    Chunks(u64),
    /// A maximum total size of decoded samples in bytes.
    Bytes(u64),
}

impl Default for ChunkCacheCapacity {
    fn default() -> Self {
        Self::Chunks(4096)
    }
}

impl ChunkCacheCapacity {
    /// Create an empty chunk cache with this capacity.
    #[must_use]
    pub fn build(self) -> Arc<dyn ChunkCache> {
        match self {
            Self::Chunks(capacity) => Arc::new(ChunkCacheLruChunkLimit::new(capacity)),
            Self::Bytes(capacity) => Arc::new(ChunkCacheLruSizeLimit::new(capacity)),
        }
    }
}
