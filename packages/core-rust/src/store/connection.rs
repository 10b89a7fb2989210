//! Connection and connection-pool traits for the backing store.

use async_trait::async_trait;

use super::command::Batch;
use super::error::StoreResult;

/// One live connection to the store.
///
/// Each method is one round trip. Reads of a missing key return the empty
/// value for that primitive (`None`, `false`, `0` or an empty `Vec`), never an
/// error. A [`StoreError::ConnectionFault`](super::StoreError::ConnectionFault)
/// from any method means the connection must go back through
/// [`ConnectionPool::release_broken`].
#[async_trait]
pub trait Connection: Send + 'static {
    /// Sends every command of `batch` in one round trip, in order.
    ///
    /// Not atomic: commands after a failing one still run. Returns the first
    /// command failure, if any.
    async fn pipeline(&mut self, batch: Batch) -> StoreResult<()>;

    /// Runs `batch` as one all-or-nothing block (begin, commands, commit).
    ///
    /// No other command is interleaved, and if any command would fail none
    /// is applied.
    async fn atomic(&mut self, batch: Batch) -> StoreResult<()>;

    // --- Hash ---

    async fn hget(&mut self, key: &str, field: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    async fn hexists(&mut self, key: &str, field: &[u8]) -> StoreResult<bool>;

    async fn hlen(&mut self, key: &str) -> StoreResult<u64>;

    async fn hkeys(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>>;

    async fn hvals(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>>;

    async fn hgetall(&mut self, key: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Multi-get; the result has one slot per requested field.
    async fn hmget(&mut self, key: &str, fields: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    // --- Set ---

    async fn sismember(&mut self, key: &str, member: &[u8]) -> StoreResult<bool>;

    async fn smembers(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>>;

    async fn scard(&mut self, key: &str) -> StoreResult<u64>;

    // --- Sorted set ---

    async fn zscore(&mut self, key: &str, member: &[u8]) -> StoreResult<Option<f64>>;

    /// Members ranked `start..=stop` in ascending score order. Negative ranks
    /// count from the end (`-1` is the last member).
    async fn zrange(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Vec<u8>>>;

    async fn zcard(&mut self, key: &str) -> StoreResult<u64>;

    // --- String ---

    async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Length of the string value in bytes.
    async fn strlen(&mut self, key: &str) -> StoreResult<u64>;
}

/// Hands out store connections.
///
/// Every acquired connection must come back through exactly one of the two
/// release methods. Connections that raised a connection fault go through
/// [`release_broken`](ConnectionPool::release_broken) and must never be
/// handed out again.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: Connection;

    /// Checks out a connection, opening one if none is idle.
    async fn acquire(&self) -> StoreResult<Self::Connection>;

    /// Returns a connection that is still usable.
    fn release_healthy(&self, conn: Self::Connection);

    /// Reclaims a connection that hit a connection-level failure.
    fn release_broken(&self, conn: Self::Connection);
}
