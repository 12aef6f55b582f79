//! A small fixed-shape buffer pool for hot-path scratch space — the file
//! writer's range-serving buffer, compressor staging buffers (SPEC_FULL §9,
//! grounded on `original_source/lib/util/object_pool.hpp`).
//!
//! This is deliberately not a generic object pool: it only ever hands out
//! `BytesMut` scratch buffers of one fixed capacity, reused across `get()`
//! calls on the same connection rather than reallocated each time.

use bytes::BytesMut;
use parking_lot::Mutex;

pub const DEFAULT_SCRATCH_CAPACITY: usize = 4096;

pub struct BufferPool {
    capacity: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Borrow a buffer, clearing any previous contents. Returned to the pool
    /// on drop via `release`.
    pub fn acquire(&self) -> BytesMut {
        let mut free = self.free.lock();
        match free.pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => BytesMut::with_capacity(self.capacity),
        }
    }

    pub fn release(&self, buf: BytesMut) {
        let mut free = self.free.lock();
        // Bound the free list so a burst of large connections doesn't pin
        // memory indefinitely.
        if free.len() < 64 {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_SCRATCH_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_released_buffers() {
        let pool = BufferPool::new(16);
        let buf = pool.acquire();
        let ptr = buf.as_ptr();
        pool.release(buf);
        let buf2 = pool.acquire();
        assert_eq!(buf2.as_ptr(), ptr);
    }
}
