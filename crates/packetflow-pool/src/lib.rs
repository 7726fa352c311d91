//! Size-bucketed buffer pool feeding the packet read/write path.
//!
//! Buffers are grouped into power-of-two buckets up to `max_buffer_size`.
//! Renting returns a [`PooledBuffer`] guard that returns its backing
//! allocation to the pool on drop, so callers cannot forget to give memory
//! back. Requests above the largest bucket allocate a fresh, unpooled
//! buffer.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Maximum number of free buffers retained per bucket before excess
/// returns are simply dropped (prevents unbounded pool growth under churn).
const MAX_FREE_PER_BUCKET: usize = 128;

/// Errors raised by pool construction.
#[derive(Debug, Error)]
pub enum PoolError {
    /// `max_buffer_size` was zero or not representable as a bucket count.
    #[error("max_buffer_size must be a positive power-of-two bound, got {0}")]
    InvalidMaxSize(usize),
}

/// A size-bucketed pool of reusable byte buffers.
///
/// Cheap to clone: internally an `Arc` around the bucket free-lists.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    buckets: Vec<Mutex<Vec<Vec<u8>>>>,
    max_buffer_size: usize,
}

impl BufferPool {
    /// Build a pool whose largest bucket holds buffers of `max_buffer_size`
    /// bytes. Requests larger than this allocate fresh, unpooled memory.
    pub fn new(max_buffer_size: usize) -> Result<Self, PoolError> {
        if max_buffer_size == 0 {
            return Err(PoolError::InvalidMaxSize(max_buffer_size));
        }
        let bucket_count = bucket_index(max_buffer_size) + 1;
        let buckets = (0..bucket_count).map(|_| Mutex::new(Vec::new())).collect();
        Ok(Self { inner: Arc::new(PoolInner { buckets, max_buffer_size }) })
    }

    /// Rent a buffer with capacity for at least `size` bytes.
    ///
    /// Buffers come from the matching bucket's free list when available,
    /// otherwise a fresh allocation (pooled if `size <= max_buffer_size`,
    /// unpooled/one-shot otherwise).
    pub fn rent(&self, size: usize) -> PooledBuffer {
        if size > self.inner.max_buffer_size {
            tracing::trace!(size, max = self.inner.max_buffer_size, "rent exceeds pool bound, allocating unpooled");
            return PooledBuffer { pool: None, bucket: 0, buf: vec![0; size] };
        }

        let bucket = bucket_index(size);
        let capacity = 1usize << bucket;
        let buf = {
            let mut free = self.inner.buckets[bucket].lock().unwrap_or_else(|e| e.into_inner());
            free.pop()
        };
        let mut buf = buf.unwrap_or_else(|| Vec::with_capacity(capacity));
        buf.clear();
        buf.resize(size, 0);
        PooledBuffer { pool: Some(self.inner.clone()), bucket, buf }
    }

    /// Fraction of `MAX_FREE_PER_BUCKET` currently occupied by the bucket
    /// that would serve a rent of `size` bytes. Operators use this to tune
    /// `max_buffer_size` and connection concurrency.
    pub fn get_allocation_for_size(&self, size: usize) -> f64 {
        if size > self.inner.max_buffer_size {
            return 0.0;
        }
        let bucket = bucket_index(size);
        let len = self.inner.buckets[bucket].lock().unwrap_or_else(|e| e.into_inner()).len();
        len as f64 / MAX_FREE_PER_BUCKET as f64
    }
}

fn bucket_index(size: usize) -> usize {
    size.max(1).next_power_of_two().trailing_zeros() as usize
}

/// A buffer rented from a [`BufferPool`].
///
/// Returns its backing allocation to the pool when dropped, unless it was
/// an unpooled (oversized) rental.
pub struct PooledBuffer {
    pool: Option<Arc<PoolInner>>,
    bucket: usize,
    buf: Vec<u8>,
}

impl PooledBuffer {
    /// Shrink or grow the logical length within the allocated capacity.
    /// Growing beyond capacity reallocates and the buffer is no longer
    /// returned to its original bucket on drop if capacity no longer
    /// matches a known bucket size.
    pub fn resize(&mut self, new_len: usize, value: u8) {
        self.buf.resize(new_len, value);
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else { return };
        let expected_capacity = 1usize << self.bucket;
        if self.buf.capacity() != expected_capacity {
            return;
        }
        let mut free = pool.buckets[self.bucket].lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < MAX_FREE_PER_BUCKET {
            let mut buf = std::mem::take(&mut self.buf);
            buf.clear();
            free.push(buf);
        }
    }
}
