//! The buffer-pool contract consumed by the engine.

use parking_lot::Mutex;

/// How many buffers a pool retains before further returns are dropped.
const MAX_POOLED: usize = 64;

/// A pool of reusable byte buffers.
///
/// Server-role connections borrow their sliding-window buffers from here at
/// construction and return them when the read loop tears down. Clients are
/// expected to be few and long-lived; they allocate directly.
#[derive(Debug, Default)]
pub struct BufferPool {
    bufs: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cleared buffer, allocating if the pool is empty.
    pub fn get(&self) -> Vec<u8> {
        self.bufs.lock().pop().unwrap_or_default()
    }

    /// Return a buffer for reuse.
    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut bufs = self.bufs.lock();
        if bufs.len() < MAX_POOLED {
            bufs.push(buf);
        }
    }

    /// Number of buffers currently pooled.
    pub fn len(&self) -> usize {
        self.bufs.lock().len()
    }

    /// Whether the pool currently holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_cycle_through_the_pool() {
        let pool = BufferPool::new();
        assert!(pool.is_empty());

        let mut buf = pool.get();
        buf.extend_from_slice(b"state");
        let capacity = buf.capacity();
        pool.put(buf);
        assert_eq!(pool.len(), 1);

        let buf = pool.get();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
        assert!(pool.is_empty());
    }
}
