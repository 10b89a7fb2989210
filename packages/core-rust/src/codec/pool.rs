//! Lock-free pool of reusable codec instances.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::SegQueue;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Codec, CodecError};

/// Pool of codec instances shared by every encode/decode call of one or more
/// collections.
///
/// [`acquire()`](CodecPool::acquire) never blocks and never fails: it pops a
/// free instance or constructs a new one. The free-list is a
/// [`SegQueue`], so any number of tasks can acquire and release concurrently.
/// The pool grows to the peak number of simultaneous checkouts and never
/// shrinks.
#[derive(Debug)]
pub struct CodecPool<C> {
    free: SegQueue<C>,
    created: AtomicU64,
}

impl<C: Codec> CodecPool<C> {
    /// Creates an empty pool. Instances are constructed lazily.
    #[must_use]
    pub fn new() -> Self {
        Self {
            free: SegQueue::new(),
            created: AtomicU64::new(0),
        }
    }

    /// Checks out a codec instance.
    ///
    /// The returned guard puts the instance back when dropped, whether the
    /// work done with it succeeded or not.
    pub fn acquire(&self) -> PooledCodec<'_, C> {
        let codec = self.free.pop().unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            C::default()
        });
        PooledCodec { pool: self, codec }
    }

    /// Returns an instance to the free-list.
    pub fn release(&self, codec: C) {
        self.free.push(codec);
    }

    /// Encodes `value` with a pooled instance.
    ///
    /// # Errors
    ///
    /// Propagates [`CodecError::Encode`] from the codec.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        self.acquire().encode(value)
    }

    /// Decodes `bytes` with a pooled instance.
    ///
    /// # Errors
    ///
    /// Propagates [`CodecError::Decode`] from the codec.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        self.acquire().decode(bytes)
    }

    /// Number of instances currently sitting in the free-list.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Total number of instances this pool has constructed.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl<C: Codec> Default for CodecPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// A codec checked out of a [`CodecPool`]. Returned to the pool on drop.
pub struct PooledCodec<'a, C: Codec> {
    pool: &'a CodecPool<C>,
    codec: C,
}

impl<C: Codec> Deref for PooledCodec<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.codec
    }
}

impl<C: Codec> DerefMut for PooledCodec<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.codec
    }
}

impl<C: Codec> Drop for PooledCodec<'_, C> {
    fn drop(&mut self) {
        // The placeholder left behind is an empty codec with no allocation.
        self.pool.release(std::mem::take(&mut self.codec));
    }
}
