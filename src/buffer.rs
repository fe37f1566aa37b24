//! Pooled response buffers.
//!
//! Every request acquires one text buffer and one byte buffer for the
//! lifetime of the transfer and returns both on disposal. Pooling is an
//! injected collaborator so backends can plug in their own allocation
//! strategy; [`SharedBufferPool`] is the default freelist used when nothing
//! is injected.

use std::sync::{Mutex, OnceLock};

/// Acquire/release surface for the per-request response buffers.
pub trait BufferPool: Send + Sync {
    /// Acquire an empty text buffer.
    fn acquire_text(&self) -> String;
    /// Return a text buffer to the pool.
    fn release_text(&self, buf: String);
    /// Acquire an empty byte buffer with at least `capacity` bytes reserved.
    fn acquire_bytes(&self, capacity: usize) -> Vec<u8>;
    /// Return a byte buffer to the pool.
    fn release_bytes(&self, buf: Vec<u8>);
}

// Buffers above this size are dropped on release instead of retained, so one
// oversized response does not pin its allocation forever.
const MAX_RETAINED_CAPACITY: usize = 1 << 20;
const MAX_RETAINED_BUFFERS: usize = 8;

#[derive(Default)]
struct Freelists {
    texts: Vec<String>,
    bytes: Vec<Vec<u8>>,
}

/// Freelist buffer pool shared across requests.
#[derive(Default)]
pub struct SharedBufferPool {
    inner: Mutex<Freelists>,
}

impl SharedBufferPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide pool used when no pool is injected.
    pub fn global() -> &'static SharedBufferPool {
        static GLOBAL: OnceLock<SharedBufferPool> = OnceLock::new();
        GLOBAL.get_or_init(SharedBufferPool::new)
    }
}

impl BufferPool for SharedBufferPool {
    fn acquire_text(&self) -> String {
        self.inner.lock().unwrap().texts.pop().unwrap_or_default()
    }

    fn release_text(&self, mut buf: String) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut inner = self.inner.lock().unwrap();
        if inner.texts.len() < MAX_RETAINED_BUFFERS {
            inner.texts.push(buf);
        }
    }

    fn acquire_bytes(&self, capacity: usize) -> Vec<u8> {
        let mut buf = {
            let mut inner = self.inner.lock().unwrap();
            inner.bytes.pop().unwrap_or_default()
        };
        buf.reserve(capacity);
        buf
    }

    fn release_bytes(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut inner = self.inner.lock().unwrap();
        if inner.bytes.len() < MAX_RETAINED_BUFFERS {
            inner.bytes.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_released_buffers() {
        let pool = SharedBufferPool::new();
        let mut text = pool.acquire_text();
        text.push_str("leftover");
        let text_capacity = text.capacity();
        pool.release_text(text);

        let reused = pool.acquire_text();
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), text_capacity);
    }

    #[test]
    fn byte_buffers_meet_requested_capacity() {
        let pool = SharedBufferPool::new();
        pool.release_bytes(Vec::with_capacity(16));
        let buf = pool.acquire_bytes(1024);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 1024);
    }

    #[test]
    fn oversized_buffers_are_not_retained() {
        let pool = SharedBufferPool::new();
        pool.release_bytes(Vec::with_capacity(MAX_RETAINED_CAPACITY + 1));
        assert!(pool.inner.lock().unwrap().bytes.is_empty());
    }
}
