//! Pooled payload buffers.
//!
//! Payload allocation is the per-record cost the build path cannot afford;
//! buffers cycle between the pool and in-flight [`Record`](crate::Record)s
//! instead. A buffer returns home when its payload drops, which happens when
//! a ring slot is overwritten or a record leaves the pipeline.

use std::sync::{Arc, Mutex};

/// Shared pool of reusable byte buffers.
///
/// `acquire` pops a recycled buffer or allocates a fresh one when the pool
/// runs dry, so the pool never blocks a producer; it only bounds steady-state
/// allocation.
pub struct PayloadPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_capacity: usize,
}

impl PayloadPool {
    /// Create a pool with `count` pre-allocated buffers of
    /// `buffer_capacity` bytes each.
    #[must_use]
    pub fn new(count: usize, buffer_capacity: usize) -> Self {
        let buffers = (0..count)
            .map(|_| Vec::with_capacity(buffer_capacity))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(buffers),
                buffer_capacity,
            }),
        }
    }

    /// Take an empty buffer, allocating if the pool is exhausted.
    #[must_use]
    pub fn acquire(&self) -> Payload {
        let bytes = self
            .inner
            .buffers
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.inner.buffer_capacity));
        Payload {
            bytes,
            home: Some(Arc::clone(&self.inner)),
        }
    }

    /// Number of idle buffers currently in the pool.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.buffers.lock().unwrap().len()
    }
}

impl Clone for PayloadPool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl core::fmt::Debug for PayloadPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PayloadPool")
            .field("available", &self.available())
            .field("buffer_capacity", &self.inner.buffer_capacity)
            .finish()
    }
}

/// Byte buffer owned by a record.
///
/// Pool-backed payloads return to their pool on drop; detached payloads
/// (from [`Payload::from_vec`]) free normally.
pub struct Payload {
    bytes: Vec<u8>,
    home: Option<Arc<PoolInner>>,
}

impl Payload {
    /// Empty payload with no backing pool.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            home: None,
        }
    }

    /// Wrap an existing buffer without pooling.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes, home: None }
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the payload holds no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append bytes to the payload.
    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

impl core::ops::Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl core::fmt::Debug for Payload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.bytes.len())
            .field("pooled", &self.home.is_some())
            .finish()
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            let mut bytes = core::mem::take(&mut self.bytes);
            bytes.clear();
            home.buffers.lock().unwrap().push(bytes);
        }
    }
}
