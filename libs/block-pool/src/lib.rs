//! Fixed-size buffer pool for hot-path payload buffers.
//!
//! All blocks are allocated up front. `allocate` never grows the pool and
//! never blocks: an empty free list is reported as `None` and the caller is
//! expected to fall back to a regular heap allocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// ═══════════════════════════════════════════════════════════════
//  BlockPool
// ═══════════════════════════════════════════════════════════════

pub struct BlockPool {
    block_size: usize,
    block_count: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("available", &self.available())
            .finish()
    }
}

impl BlockPool {
    pub fn new(block_size: usize, block_count: usize) -> Self {
        let free = (0..block_count)
            .map(|_| Vec::with_capacity(block_size))
            .collect();
        tracing::debug!(block_size, block_count, "block pool allocated");
        Self {
            block_size,
            block_count,
            free: Mutex::new(free),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Взять свободный блок. `None` — пул исчерпан.
    pub fn allocate(&self) -> Option<Vec<u8>> {
        self.lock_free().pop()
    }

    /// Вернуть блок в пул.
    ///
    /// Buffers whose capacity differs from `block_size` did not come from
    /// this pool and are simply dropped; so are surplus buffers once the
    /// free list is back at `block_count`.
    pub fn deallocate(&self, mut block: Vec<u8>) {
        if block.capacity() != self.block_size {
            return;
        }
        block.clear();
        let mut free = self.lock_free();
        if free.len() < self.block_count {
            free.push(block);
        }
    }

    pub fn available(&self) -> usize {
        self.lock_free().len()
    }

    fn lock_free(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        match self.free.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("block pool lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  PayloadAllocator
// ═══════════════════════════════════════════════════════════════

/// Pool-first allocator for payload buffers.
///
/// Requests that fit in one block are served from the attached pool; larger
/// requests, an exhausted pool, or no pool at all go to the heap.
#[derive(Clone, Default)]
pub struct PayloadAllocator {
    pool: Option<Arc<BlockPool>>,
    stats: Arc<AllocatorStats>,
}

#[derive(Debug, Default)]
pub struct AllocatorStats {
    pooled_hits: AtomicU64,
    heap_fallbacks: AtomicU64,
}

impl AllocatorStats {
    pub fn pooled_hits(&self) -> u64 {
        self.pooled_hits.load(Ordering::Relaxed)
    }

    pub fn heap_fallbacks(&self) -> u64 {
        self.heap_fallbacks.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PayloadAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadAllocator")
            .field("pool", &self.pool)
            .field("pooled_hits", &self.stats.pooled_hits())
            .field("heap_fallbacks", &self.stats.heap_fallbacks())
            .finish()
    }
}

impl PayloadAllocator {
    /// Allocator without a pool: every buffer comes from the heap.
    pub fn heap() -> Self {
        Self::default()
    }

    pub fn with_pool(pool: Arc<BlockPool>) -> Self {
        Self {
            pool: Some(pool),
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> &AllocatorStats {
        &self.stats
    }

    /// Copy `data` into a freshly acquired buffer.
    pub fn copy_from(&self, data: &[u8]) -> PooledBuf {
        let mut buf = self.acquire(data.len());
        buf.data.extend_from_slice(data);
        buf
    }

    fn acquire(&self, len: usize) -> PooledBuf {
        if let Some(pool) = &self.pool {
            if len <= pool.block_size() {
                if let Some(block) = pool.allocate() {
                    self.stats.pooled_hits.fetch_add(1, Ordering::Relaxed);
                    return PooledBuf {
                        data: block,
                        pool: Some(pool.clone()),
                        allocator: self.clone(),
                    };
                }
                tracing::trace!(len, "block pool exhausted, heap fallback");
            }
        }
        self.stats.heap_fallbacks.fetch_add(1, Ordering::Relaxed);
        PooledBuf {
            data: Vec::with_capacity(len),
            pool: None,
            allocator: self.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  PooledBuf
// ═══════════════════════════════════════════════════════════════

/// Byte buffer that returns its block to the pool when dropped.
///
/// Cloning acquires a new buffer through the same allocator, so a clone of a
/// pooled buffer is pooled too while blocks remain.
pub struct PooledBuf {
    data: Vec<u8>,
    pool: Option<Arc<BlockPool>>,
    allocator: PayloadAllocator,
}

impl PooledBuf {
    /// Heap buffer that never touches a pool.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            pool: None,
            allocator: PayloadAllocator::heap(),
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.clone()
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl Clone for PooledBuf {
    fn clone(&self) -> Self {
        self.allocator.copy_from(&self.data)
    }
}

impl PartialEq for PooledBuf {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for PooledBuf {}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.data.len())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.deallocate(std::mem::take(&mut self.data));
        }
    }
}
