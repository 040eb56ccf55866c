//! A bounded pool of reusable voxel buffers. See spec.md §5 "Shared-resource
//! policy": "Voxel buffers are pooled (arena) to bound allocations; pool
//! high-water mark = worker count * block bytes * 2."
//!
//! Per spec.md §9's redesign flag ("Replace [pointer-graph ownership] with
//! arena + indices: voxel buffers live in a bounded pool"), buffers are
//! handed out as owned, droppable guards rather than raw pointers or shared
//! references into a central table.

use std::sync::{Arc, Mutex};

struct Inner {
    free: Vec<Vec<u8>>,
    block_bytes: usize,
    high_water_mark: usize,
    allocated: usize,
}

/// A pool of `Vec<u8>` buffers sized to one block's worth of bytes.
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<Mutex<Inner>>,
}

impl BlockPool {
    /// `worker_count` and `block_bytes` together determine the pool's
    /// high-water mark (`worker_count * block_bytes * 2`, per spec.md §5) —
    /// enough for every worker to hold a block in flight plus one more in
    /// transit without allocating further.
    pub fn new(worker_count: usize, block_bytes: usize) -> Self {
        let worker_count = worker_count.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                free: Vec::new(),
                block_bytes,
                high_water_mark: worker_count * block_bytes * 2,
                allocated: 0,
            })),
        }
    }

    /// Checks out a zero-filled buffer of exactly `block_bytes` bytes,
    /// reusing a freed one if available.
    pub fn checkout(&self) -> PooledBuffer {
        let mut inner = self.inner.lock().expect("arena lock poisoned");
        let mut buffer = inner.free.pop().unwrap_or_else(|| {
            inner.allocated += inner.block_bytes;
            vec![0u8; inner.block_bytes]
        });

        buffer.clear();
        buffer.resize(inner.block_bytes, 0);

        PooledBuffer { buffer: Some(buffer), pool: self.clone() }
    }

    fn release(&self, mut buffer: Vec<u8>) {
        let mut inner = self.inner.lock().expect("arena lock poisoned");
        if inner.free.len() * inner.block_bytes < inner.high_water_mark {
            buffer.clear();
            inner.free.push(buffer);
        }
        // else: let the buffer drop, keeping the pool within its high-water mark.
    }

    #[cfg(test)]
    fn free_count(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }
}

/// An RAII handle to a pooled buffer. Returns the buffer to its pool on
/// drop instead of deallocating it.
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    pool: BlockPool,
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        self.buffer.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buffer.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checked_out_buffer_is_exactly_block_sized() {
        let pool = BlockPool::new(2, 1024);
        let buffer = pool.checkout();
        assert_eq!(buffer.len(), 1024);
    }

    #[test]
    fn released_buffer_is_reused() {
        let pool = BlockPool::new(1, 64);
        {
            let _buffer = pool.checkout();
        }
        assert_eq!(pool.free_count(), 1);
        let _buffer = pool.checkout();
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn pool_does_not_grow_past_high_water_mark() {
        let pool = BlockPool::new(1, 100); // high water mark = 1*100*2 = 200 bytes = 2 buffers
        let buffers: Vec<_> = (0..5).map(|_| pool.checkout()).collect();
        drop(buffers);
        assert!(pool.free_count() <= 2);
    }
}
