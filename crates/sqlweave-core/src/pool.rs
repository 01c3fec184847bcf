//! Pooled text buffers for the render hot path.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// A pool of reusable `String` buffers.
///
/// Rendering into a pooled buffer avoids the per-call allocation of the
/// text builder; a plain growable `String` works too, this is purely the
/// hot-path interface.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Mutex<Vec<String>>,
}

impl BufferPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows a buffer from the pool, allocating one if none is free. The
    /// buffer returns to the pool when the guard drops.
    #[must_use]
    pub fn acquire(&self) -> PooledBuf<'_> {
        let buf = self
            .buffers
            .lock()
            .expect("buffer pool poisoned")
            .pop()
            .unwrap_or_default();
        PooledBuf {
            buf: Some(buf),
            pool: self,
        }
    }

    /// Number of idle buffers currently held.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.buffers.lock().expect("buffer pool poisoned").len()
    }

    fn release(&self, mut buf: String) {
        buf.clear();
        self.buffers.lock().expect("buffer pool poisoned").push(buf);
    }
}

/// RAII guard around a pooled `String`.
#[derive(Debug)]
pub struct PooledBuf<'p> {
    buf: Option<String>,
    pool: &'p BufferPool,
}

impl PooledBuf<'_> {
    /// Takes the string out of the guard; the buffer does not return to
    /// the pool.
    #[must_use]
    pub fn detach(mut self) -> String {
        self.buf.take().unwrap_or_default()
    }
}

impl Deref for PooledBuf<'_> {
    type Target = String;

    fn deref(&self) -> &String {
        self.buf.as_ref().expect("buffer already detached")
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut String {
        self.buf.as_mut().expect("buffer already detached")
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_returns_on_drop() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire();
            buf.push_str("SELECT 1");
        }
        assert_eq!(pool.idle(), 1);
        // The recycled buffer comes back cleared.
        let buf = pool.acquire();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_capacity_is_reused() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire();
            buf.push_str(&"x".repeat(4096));
        }
        let buf = pool.acquire();
        assert!(buf.capacity() >= 4096);
    }

    #[test]
    fn test_detach_keeps_buffer_out_of_pool() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire();
        buf.push_str("kept");
        let owned = buf.detach();
        assert_eq!(owned, "kept");
        assert_eq!(pool.idle(), 0);
    }
}
