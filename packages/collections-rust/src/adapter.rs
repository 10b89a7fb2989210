//! Glue shared by every collection type.
//!
//! A [`CollectionAdapter`] binds one store key to a connection pool, a codec
//! pool, a [`CollectionConfig`] and the instance's [`BatchManager`]. It offers
//! the two ways an operation reaches the store:
//!
//! - **immediate**: flush whatever this instance has buffered, borrow a
//!   connection, run the work on it and return the connection. Reads and bulk
//!   operations take this path so they observe every earlier write.
//! - **buffered**: queue the work's commands on the instance's open batch and
//!   let the batch manager decide when to send them.
//!
//! Both hold the instance lock for their whole duration.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;

use remcoll_core::{Batch, Codec, CodecPool, Command, Connection, ConnectionPool, MsgPackCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::batch::{BatchGuard, BatchManager, Checkout};
use crate::config::CollectionConfig;
use crate::error::{CollectionError, Result};

/// Boxed future returned by work passed to [`CollectionAdapter::run_immediate`].
pub type ConnFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>;

/// Per-instance plumbing shared by the collection types.
pub struct CollectionAdapter<P: ConnectionPool, C: Codec = MsgPackCodec> {
    key: Arc<str>,
    pool: Arc<P>,
    codecs: Arc<CodecPool<C>>,
    config: CollectionConfig,
    batch: BatchManager<P>,
}

impl<P: ConnectionPool, C: Codec> CollectionAdapter<P, C> {
    #[must_use]
    pub fn new(
        pool: Arc<P>,
        key: impl Into<Arc<str>>,
        config: CollectionConfig,
        codecs: Arc<CodecPool<C>>,
    ) -> Self {
        let key = key.into();
        let batch = BatchManager::new(Arc::clone(&pool), Arc::clone(&key), config.flush_threshold());
        Self {
            key,
            pool,
            codecs,
            config,
            batch,
        }
    }

    /// The store key this instance addresses.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn shared_key(&self) -> Arc<str> {
        Arc::clone(&self.key)
    }

    #[must_use]
    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    #[must_use]
    pub fn codecs(&self) -> &Arc<CodecPool<C>> {
        &self.codecs
    }

    #[must_use]
    pub fn batch(&self) -> &BatchManager<P> {
        &self.batch
    }

    /// Encodes a key or value with a pooled codec.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::Codec`] when the value cannot be encoded.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(self.codecs.encode(value)?)
    }

    /// Decodes bytes read from the store.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::Codec`] when the bytes do not decode.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(self.codecs.decode(bytes)?)
    }

    /// Decodes every element, failing on the first one that does not decode.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::Codec`] for the first undecodable element.
    pub fn decode_all<T: DeserializeOwned>(&self, items: Vec<Vec<u8>>) -> Result<Vec<T>> {
        items.iter().map(|item| self.decode(item)).collect()
    }

    // -----------------------------------------------------------------------
    // Immediate path
    // -----------------------------------------------------------------------

    /// Flushes this instance's buffered writes and borrows a connection for
    /// immediate work.
    ///
    /// The returned lease keeps the instance locked until it is finished.
    ///
    /// # Errors
    ///
    /// Returns a parked deferred-flush failure, the failure of the flush, or
    /// the failure of borrowing a connection. Nothing runs in those cases.
    pub async fn immediate(&self) -> Result<ImmediateLease<'_, P>> {
        let mut guard = self.batch.lock().await;
        raise_deferred_failure(&mut guard)?;
        guard.flush().await?;
        let conn = self.pool.acquire().await?;
        Ok(ImmediateLease {
            key: self.key.as_ref(),
            conn: Checkout::new(self.pool.as_ref(), conn),
            _guard: guard,
        })
    }

    /// Runs `work` against a freshly borrowed connection after flushing.
    ///
    /// The connection goes back through the broken path when `work` fails
    /// with a connection fault and through the healthy path otherwise.
    ///
    /// # Errors
    ///
    /// Returns whatever [`immediate`](Self::immediate) or `work` returns.
    pub async fn run_immediate<T, F>(&self, work: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut P::Connection) -> ConnFuture<'c, T> + Send,
    {
        let mut lease = self.immediate().await?;
        let result = work(&mut *lease).await;
        lease.finish(result)
    }

    /// Commits `batch` as one all-or-nothing block on the immediate path.
    ///
    /// An empty batch still flushes the instance but costs no round trip.
    ///
    /// # Errors
    ///
    /// Returns the failure of the flush or of the block. A failed block
    /// applies none of its commands.
    pub async fn run_atomic(&self, batch: Batch) -> Result<()> {
        let commands = batch.len();
        self.run_immediate(move |conn| {
            Box::pin(async move {
                if batch.is_empty() {
                    return Ok(());
                }
                Ok(conn.atomic(batch).await?)
            })
        })
        .await?;
        tracing::debug!(key = %self.key, commands, "committed atomic block");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Buffered path
    // -----------------------------------------------------------------------

    /// Queues the commands produced by `work` on the instance's open batch.
    ///
    /// `work` runs before anything is admitted, so when it fails the
    /// instance is left untouched. With `sync_immediate` the batch is flushed
    /// before returning; otherwise a deferred flush is arranged after
    /// `delay_before_sync`.
    ///
    /// # Errors
    ///
    /// Returns a parked deferred-flush failure, the error of `work`, the
    /// failure of a flush forced by the threshold, or the failure of the
    /// immediate flush.
    pub async fn run_buffered<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Batch) -> Result<T>,
    {
        let mut guard = self.batch.lock().await;
        raise_deferred_failure(&mut guard)?;
        let mut staged = Batch::new();
        let output = work(&mut staged)?;
        if staged.is_empty() {
            return Ok(output);
        }
        guard.admit().await?.extend(staged);
        if self.config.sync_immediate {
            guard.flush().await?;
        } else {
            guard.defer_flush(self.config.delay_before_sync);
        }
        Ok(output)
    }

    /// Buffers a single command.
    ///
    /// # Errors
    ///
    /// See [`run_buffered`](Self::run_buffered).
    pub async fn buffer(&self, command: Command) -> Result<()> {
        self.run_buffered(|batch| {
            batch.push(command);
            Ok(())
        })
        .await
    }

    /// Sends everything this instance has buffered.
    ///
    /// # Errors
    ///
    /// Returns a parked deferred-flush failure or the failure of the flush.
    pub async fn sync(&self) -> Result<()> {
        let mut guard = self.batch.lock().await;
        raise_deferred_failure(&mut guard)?;
        guard.flush().await?;
        Ok(())
    }
}

impl<P: ConnectionPool, C: Codec> std::fmt::Debug for CollectionAdapter<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionAdapter")
            .field("key", &self.key)
            .field("codec", &C::NAME)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn raise_deferred_failure<P: ConnectionPool>(guard: &mut BatchGuard<'_, P>) -> Result<()> {
    match guard.take_deferred_failure() {
        Some(err) => Err(CollectionError::Store(err)),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// ImmediateLease
// ---------------------------------------------------------------------------

/// A borrowed connection that keeps its instance locked.
///
/// Dereferences to the connection. Hand the outcome of the work to
/// [`finish`](Self::finish) so the connection returns through the right path.
#[must_use = "the connection goes back to the pool only through `finish`"]
pub struct ImmediateLease<'a, P: ConnectionPool> {
    key: &'a str,
    conn: Checkout<'a, P>,
    _guard: BatchGuard<'a, P>,
}

impl<P: ConnectionPool> ImmediateLease<'_, P> {
    /// Returns the connection and unlocks the instance, passing `result`
    /// through.
    ///
    /// A lease dropped without `finish` returns its connection through the
    /// broken path.
    ///
    /// # Errors
    ///
    /// Returns `result`'s error unchanged.
    pub fn finish<T>(self, result: Result<T>) -> Result<T> {
        let broken = match &result {
            Err(err) if err.is_connection_fault() => {
                tracing::warn!(key = self.key, error = %err, "immediate work lost its connection");
                true
            }
            _ => false,
        };
        self.conn.release(broken);
        result
    }
}

impl<P: ConnectionPool> Deref for ImmediateLease<'_, P> {
    type Target = P::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.conn()
    }
}

impl<P: ConnectionPool> DerefMut for ImmediateLease<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.conn_mut()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
