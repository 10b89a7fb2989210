//! Per-instance write batching.
//!
//! A [`BatchManager`] owns the batching state of one collection instance:
//! the buffered-write counter, the open batch (a borrowed connection plus the
//! commands queued on it) and the handle of a pending deferred flush. All of
//! it sits behind one async mutex, so admitting a write, flushing, and the
//! timer firing are mutually exclusive per instance while separate instances
//! never contend.
//!
//! The state machine has two states. **Idle**: no batch, no connection held.
//! **Batching**: a connection is borrowed and commands are queued on it. A
//! flush sends the queued commands in one round trip, returns the connection
//! through the healthy or broken path depending on the outcome, and always
//! leaves the instance Idle.

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use remcoll_core::{Batch, Connection, ConnectionPool, StoreError, StoreResult};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// A checked-out connection that goes back through the broken path if it is
/// dropped before [`release`](Self::release), e.g. when the future running a
/// round trip on it is cancelled.
pub(crate) struct Checkout<'a, P: ConnectionPool> {
    pool: &'a P,
    conn: Option<P::Connection>,
}

impl<'a, P: ConnectionPool> Checkout<'a, P> {
    pub(crate) fn new(pool: &'a P, conn: P::Connection) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }

    pub(crate) fn conn(&self) -> &P::Connection {
        self.conn
            .as_ref()
            .expect("connection is held until release")
    }

    pub(crate) fn conn_mut(&mut self) -> &mut P::Connection {
        self.conn
            .as_mut()
            .expect("connection is held until release")
    }

    /// Returns the connection through the broken path when `broken`, the
    /// healthy path otherwise.
    pub(crate) fn release(mut self, broken: bool) {
        if let Some(conn) = self.conn.take() {
            if broken {
                self.pool.release_broken(conn);
            } else {
                self.pool.release_healthy(conn);
            }
        }
    }
}

impl<P: ConnectionPool> Drop for Checkout<'_, P> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!("connection abandoned mid round trip; discarding it");
            self.pool.release_broken(conn);
        }
    }
}

struct OpenBatch<C> {
    conn: C,
    batch: Batch,
}

struct BatchState<C> {
    writes: u64,
    open: Option<OpenBatch<C>>,
    timer: Option<JoinHandle<()>>,
    deferred_failure: Option<StoreError>,
    flushes: u64,
}

impl<C: Connection> BatchState<C> {
    fn new() -> Self {
        Self {
            writes: 0,
            open: None,
            timer: None,
            deferred_failure: None,
            flushes: 0,
        }
    }

    /// Sends the open batch, if any. Returns the number of commands sent.
    async fn flush<P>(&mut self, pool: &P, key: &str) -> StoreResult<usize>
    where
        P: ConnectionPool<Connection = C>,
    {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let Some(OpenBatch { conn, batch }) = self.open.take() else {
            return Ok(0);
        };

        let commands = batch.len();
        let mut conn = Checkout::new(pool, conn);
        // Stays parked if this future is dropped mid round trip.
        let marked = self.deferred_failure.is_none();
        if marked {
            self.deferred_failure = Some(StoreError::ConnectionFault(format!(
                "flush of {commands} buffered commands was cancelled"
            )));
        }
        let result = conn.conn_mut().pipeline(batch).await;
        if marked {
            self.deferred_failure = None;
        }
        self.flushes += 1;
        match &result {
            Err(err) if err.is_connection_fault() => {
                tracing::warn!(key, commands, error = %err, "flush lost its connection");
                conn.release(true);
            }
            Err(err) => {
                tracing::warn!(key, commands, error = %err, "flush reported a command failure");
                conn.release(false);
            }
            Ok(()) => {
                tracing::debug!(key, commands, "flushed batch");
                conn.release(false);
            }
        }
        result.map(|()| commands)
    }
}

// ---------------------------------------------------------------------------
// BatchManager
// ---------------------------------------------------------------------------

/// Batching state of one collection instance.
pub struct BatchManager<P: ConnectionPool> {
    pool: Arc<P>,
    key: Arc<str>,
    threshold: NonZeroU64,
    state: Arc<Mutex<BatchState<P::Connection>>>,
}

impl<P: ConnectionPool> BatchManager<P> {
    /// Creates an Idle manager that forces a flush every `threshold`
    /// buffered writes.
    #[must_use]
    pub fn new(pool: Arc<P>, key: Arc<str>, threshold: NonZeroU64) -> Self {
        Self {
            pool,
            key,
            threshold,
            state: Arc::new(Mutex::new(BatchState::new())),
        }
    }

    /// Locks the instance. Everything done through the guard is atomic with
    /// respect to other operations on the same instance and to the deferred
    /// flush timer.
    pub async fn lock(&self) -> BatchGuard<'_, P> {
        BatchGuard {
            manager: self,
            state: self.state.lock().await,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }
}

impl<P: ConnectionPool> std::fmt::Debug for BatchManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchManager")
            .field("key", &self.key)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// BatchGuard
// ---------------------------------------------------------------------------

/// Exclusive access to one instance's batching state.
pub struct BatchGuard<'a, P: ConnectionPool> {
    manager: &'a BatchManager<P>,
    state: MutexGuard<'a, BatchState<P::Connection>>,
}

impl<P: ConnectionPool> BatchGuard<'_, P> {
    /// Admits one buffered write and returns the batch to queue it on.
    ///
    /// When the buffered-write counter sits on a multiple of the threshold
    /// the open batch is flushed first, so a batch never carries more than
    /// `max_without_sync` writes. If no batch is open afterwards a connection
    /// is borrowed and a new batch begins.
    ///
    /// # Errors
    ///
    /// Returns the failure of the forced flush or of borrowing a connection.
    /// The write is not counted in either case.
    pub async fn admit(&mut self) -> StoreResult<&mut Batch> {
        if self.state.writes % self.manager.threshold.get() == 0 {
            self.flush().await?;
        }
        let open = match self.state.open.take() {
            Some(open) => open,
            None => {
                let conn = self.manager.pool.acquire().await?;
                tracing::debug!(key = %self.manager.key, "opened batch");
                OpenBatch {
                    conn,
                    batch: Batch::new(),
                }
            }
        };
        self.state.writes += 1;
        tracing::trace!(key = %self.manager.key, writes = self.state.writes, "admitted write");
        Ok(&mut self.state.open.insert(open).batch)
    }

    /// Sends the open batch now. A no-op returning 0 when Idle.
    ///
    /// Cancels any pending deferred flush. The instance is Idle afterwards
    /// whether or not the round trip succeeded.
    ///
    /// # Errors
    ///
    /// Returns the store failure of the round trip.
    pub async fn flush(&mut self) -> StoreResult<usize> {
        let manager = self.manager;
        self.state
            .flush(manager.pool.as_ref(), &manager.key)
            .await
    }

    /// Arranges for the open batch to be flushed after `delay`.
    ///
    /// Only the write that opens a batch arms the timer; later writes into
    /// the same batch leave the pending flush alone. Does nothing when Idle.
    /// A failure of the deferred flush is kept and reported by the next
    /// operation on this instance.
    pub fn defer_flush(&mut self, delay: Duration) {
        if self.state.open.is_none() || self.state.timer.is_some() {
            return;
        }
        let state = Arc::clone(&self.manager.state);
        let pool = Arc::clone(&self.manager.pool);
        let key = Arc::clone(&self.manager.key);
        let span = tracing::debug_span!("deferred_flush", key = %key);

        let handle = tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                let mut state = state.lock().await;
                state.timer = None;
                if state.open.is_none() {
                    return;
                }
                if let Err(err) = state.flush(pool.as_ref(), &key).await {
                    state.deferred_failure = Some(err);
                }
            }
            .instrument(span),
        );
        self.state.timer = Some(handle);
    }

    /// Takes the failure of a deferred flush that nobody has seen yet.
    pub fn take_deferred_failure(&mut self) -> Option<StoreError> {
        self.state.deferred_failure.take()
    }

    /// Whether a batch is open (state Batching).
    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.state.open.is_some()
    }

    /// Number of commands queued on the open batch.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.state.open.as_ref().map_or(0, |open| open.batch.len())
    }

    /// Buffered writes admitted over the instance's lifetime.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.state.writes
    }

    /// Flushes that actually sent a batch.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.state.flushes
    }

    #[must_use]
    pub fn has_pending_timer(&self) -> bool {
        self.state.timer.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
