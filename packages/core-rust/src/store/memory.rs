//! In-process implementation of the store protocol.
//!
//! [`MemoryStore`] keeps typed values per key in a [`DashMap`] and applies the
//! same rules as the real store: a key holds exactly one kind of value, a
//! collection key disappears when it becomes empty, and sorted-set members
//! order by `(score, member bytes)`. [`MemoryPool`] hands out
//! [`MemoryConnection`]s over a shared store, reuses idle ones, and drops
//! broken ones.
//!
//! Both expose counters and connection-fault injection so tests can assert
//! how many round trips an operation cost and which release path a
//! connection took.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ordered_float::OrderedFloat;
use parking_lot::{Mutex, RwLock};

use super::command::{Batch, Command};
use super::connection::{Connection, ConnectionPool};
use super::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Stored values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Hash,
    Set,
    SortedSet,
    String,
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<Vec<u8>, OrderedFloat<f64>>,
    ordered: BTreeSet<(OrderedFloat<f64>, Vec<u8>)>,
}

impl SortedSet {
    fn insert(&mut self, member: Vec<u8>, score: f64) {
        let score = OrderedFloat(score);
        if let Some(previous) = self.scores.insert(member.clone(), score) {
            self.ordered.remove(&(previous, member.clone()));
        }
        self.ordered.insert((score, member));
    }

    fn remove(&mut self, member: &[u8]) {
        if let Some(score) = self.scores.remove(member) {
            self.ordered.remove(&(score, member.to_vec()));
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug)]
enum StoredValue {
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    SortedSet(SortedSet),
    String(Vec<u8>),
}

impl StoredValue {
    fn empty(kind: Kind) -> Self {
        match kind {
            Kind::Hash => Self::Hash(HashMap::new()),
            Kind::Set => Self::Set(HashSet::new()),
            Kind::SortedSet => Self::SortedSet(SortedSet::default()),
            Kind::String => Self::String(Vec::new()),
        }
    }

    fn kind(&self) -> Kind {
        match self {
            Self::Hash(_) => Kind::Hash,
            Self::Set(_) => Kind::Set,
            Self::SortedSet(_) => Kind::SortedSet,
            Self::String(_) => Kind::String,
        }
    }

    /// Collections vanish when empty; strings persist even when zero-length.
    fn is_vacant(&self) -> bool {
        match self {
            Self::Hash(h) => h.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::SortedSet(z) => z.len() == 0,
            Self::String(_) => false,
        }
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

/// Kind a write command requires its key to hold (`None` for `DEL`).
fn required_kind(command: &Command) -> Option<Kind> {
    match command {
        Command::HSet { .. } | Command::HDel { .. } => Some(Kind::Hash),
        Command::SAdd { .. } | Command::SRem { .. } => Some(Kind::Set),
        Command::ZAdd { .. } | Command::ZRem { .. } => Some(Kind::SortedSet),
        Command::Append { .. } => Some(Kind::String),
        Command::Del { .. } => None,
    }
}

/// Whether a command creates its key when missing (removals never do).
fn creates_key(command: &Command) -> bool {
    matches!(
        command,
        Command::HSet { .. } | Command::SAdd { .. } | Command::ZAdd { .. } | Command::Append { .. }
    )
}

fn check_score(command: &Command) -> StoreResult<()> {
    match command {
        Command::ZAdd { score, .. } if score.is_nan() => {
            Err(StoreError::Command("score is not a number".to_string()))
        }
        _ => Ok(()),
    }
}

/// Resolves a rank range with negative indices into a clamped `start..end`.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn rank_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize + 1))
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Snapshot of the round-trip counters of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Every request/response exchange, including failed ones.
    pub round_trips: u64,
    /// Round trips that carried a pipelined batch.
    pub pipelines: u64,
    /// Round trips that carried an atomic block.
    pub atomic_blocks: u64,
    /// Write commands applied.
    pub commands: u64,
}

/// Shared in-memory keyspace.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    /// Atomic blocks take the write side so nothing interleaves with them.
    gate: RwLock<()>,
    pending_faults: AtomicU32,
    round_trips: AtomicU64,
    pipelines: AtomicU64,
    atomic_blocks: AtomicU64,
    commands: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` round trips fail with a connection fault.
    pub fn inject_connection_faults(&self, count: u32) {
        self.pending_faults.fetch_add(count, Ordering::SeqCst);
    }

    /// Current counter values.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            round_trips: self.round_trips.load(Ordering::SeqCst),
            pipelines: self.pipelines.load(Ordering::SeqCst),
            atomic_blocks: self.atomic_blocks.load(Ordering::SeqCst),
            commands: self.commands.load(Ordering::SeqCst),
        }
    }

    /// Whether `key` currently holds any value.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys in the store.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Counts one round trip and consumes an injected fault if one is pending.
    fn begin_round_trip(&self) -> StoreResult<()> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::ConnectionFault(
                "injected connection fault".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(&self, command: &Command) -> StoreResult<()> {
        let key = command.key();
        if let Command::Del { .. } = command {
            self.entries.remove(key);
            self.commands.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        let Some(kind) = required_kind(command) else {
            return Ok(());
        };
        check_score(command)?;

        let vacant = if creates_key(command) {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| StoredValue::empty(kind));
            Self::mutate(entry.value_mut(), command)?;
            entry.value().is_vacant()
        } else {
            match self.entries.get_mut(key) {
                Some(mut entry) => {
                    Self::mutate(entry.value_mut(), command)?;
                    entry.value().is_vacant()
                }
                None => false,
            }
        };
        if vacant {
            self.entries.remove_if(key, |_, value| value.is_vacant());
        }
        self.commands.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn mutate(value: &mut StoredValue, command: &Command) -> StoreResult<()> {
        match (value, command) {
            (StoredValue::Hash(hash), Command::HSet { field, value, .. }) => {
                hash.insert(field.clone(), value.clone());
            }
            (StoredValue::Hash(hash), Command::HDel { field, .. }) => {
                hash.remove(field);
            }
            (StoredValue::Set(set), Command::SAdd { member, .. }) => {
                set.insert(member.clone());
            }
            (StoredValue::Set(set), Command::SRem { member, .. }) => {
                set.remove(member);
            }
            (StoredValue::SortedSet(zset), Command::ZAdd { score, member, .. }) => {
                zset.insert(member.clone(), *score);
            }
            (StoredValue::SortedSet(zset), Command::ZRem { member, .. }) => {
                zset.remove(member);
            }
            (StoredValue::String(string), Command::Append { value, .. }) => {
                string.extend_from_slice(value);
            }
            (_, command) => return Err(wrong_type(command.key())),
        }
        Ok(())
    }

    /// Checks a whole block against the current keyspace, tracking the kinds
    /// earlier commands in the block would leave behind.
    fn validate(&self, batch: &Batch) -> StoreResult<()> {
        let mut overlay: HashMap<&str, Option<Kind>> = HashMap::new();
        for command in batch.commands() {
            let key = command.key();
            let current = match overlay.get(key) {
                Some(kind) => *kind,
                None => self.entries.get(key).map(|entry| entry.value().kind()),
            };
            match (required_kind(command), current) {
                (None, _) => {
                    overlay.insert(key, None);
                }
                (Some(required), Some(existing)) if required != existing => {
                    return Err(wrong_type(key));
                }
                (Some(_), _) => {
                    check_score(command)?;
                    if creates_key(command) {
                        overlay.insert(key, required_kind(command));
                    }
                }
            }
        }
        Ok(())
    }

    fn pipeline(&self, batch: &Batch) -> StoreResult<()> {
        self.begin_round_trip()?;
        self.pipelines.fetch_add(1, Ordering::SeqCst);
        let _gate = self.gate.read();
        let mut first_error = None;
        for command in batch.commands() {
            if let Err(err) = self.apply(command) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn atomic(&self, batch: &Batch) -> StoreResult<()> {
        self.begin_round_trip()?;
        self.atomic_blocks.fetch_add(1, Ordering::SeqCst);
        let _gate = self.gate.write();
        self.validate(batch)?;
        for command in batch.commands() {
            self.apply(command)?;
        }
        Ok(())
    }

    /// Runs `read` against the value at `key` if it has the expected kind.
    fn read<R>(
        &self,
        key: &str,
        read: impl FnOnce(&StoredValue) -> Option<R>,
    ) -> StoreResult<Option<R>> {
        self.begin_round_trip()?;
        let _gate = self.gate.read();
        match self.entries.get(key) {
            Some(entry) => read(entry.value()).map(Some).ok_or_else(|| wrong_type(key)),
            None => Ok(None),
        }
    }

    fn read_hash<R>(
        &self,
        key: &str,
        read: impl FnOnce(&HashMap<Vec<u8>, Vec<u8>>) -> R,
    ) -> StoreResult<Option<R>> {
        self.read(key, |value| match value {
            StoredValue::Hash(hash) => Some(read(hash)),
            _ => None,
        })
    }

    fn read_set<R>(&self, key: &str, read: impl FnOnce(&HashSet<Vec<u8>>) -> R) -> StoreResult<Option<R>> {
        self.read(key, |value| match value {
            StoredValue::Set(set) => Some(read(set)),
            _ => None,
        })
    }

    fn read_sorted_set<R>(&self, key: &str, read: impl FnOnce(&SortedSet) -> R) -> StoreResult<Option<R>> {
        self.read(key, |value| match value {
            StoredValue::SortedSet(zset) => Some(read(zset)),
            _ => None,
        })
    }

    fn read_string<R>(&self, key: &str, read: impl FnOnce(&[u8]) -> R) -> StoreResult<Option<R>> {
        self.read(key, |value| match value {
            StoredValue::String(string) => Some(read(string)),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryConnection
// ---------------------------------------------------------------------------

/// A connection to a [`MemoryStore`].
///
/// After a connection fault the connection is poisoned: every later call
/// fails with a connection fault as well, like a dropped socket would.
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    store: Arc<MemoryStore>,
    poisoned: bool,
}

impl MemoryConnection {
    /// Pool-assigned identifier, stable across reuse.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn call<R>(&mut self, op: impl FnOnce(&MemoryStore) -> StoreResult<R>) -> StoreResult<R> {
        if self.poisoned {
            return Err(StoreError::ConnectionFault("connection is closed".to_string()));
        }
        let result = op(self.store.as_ref());
        if matches!(&result, Err(err) if err.is_connection_fault()) {
            self.poisoned = true;
        }
        result
    }
}

#[allow(clippy::cast_possible_truncation)]
fn count(len: usize) -> u64 {
    len as u64
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn pipeline(&mut self, batch: Batch) -> StoreResult<()> {
        self.call(|store| store.pipeline(&batch))
    }

    async fn atomic(&mut self, batch: Batch) -> StoreResult<()> {
        self.call(|store| store.atomic(&batch))
    }

    async fn hget(&mut self, key: &str, field: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.call(|store| store.read_hash(key, |h| h.get(field).cloned()))
            .map(Option::flatten)
    }

    async fn hexists(&mut self, key: &str, field: &[u8]) -> StoreResult<bool> {
        self.call(|store| store.read_hash(key, |h| h.contains_key(field)))
            .map(|found| found.unwrap_or(false))
    }

    async fn hlen(&mut self, key: &str) -> StoreResult<u64> {
        self.call(|store| store.read_hash(key, |h| count(h.len())))
            .map(Option::unwrap_or_default)
    }

    async fn hkeys(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.call(|store| store.read_hash(key, |h| h.keys().cloned().collect()))
            .map(Option::unwrap_or_default)
    }

    async fn hvals(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.call(|store| store.read_hash(key, |h| h.values().cloned().collect()))
            .map(Option::unwrap_or_default)
    }

    async fn hgetall(&mut self, key: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.call(|store| {
            store.read_hash(key, |h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
        })
        .map(Option::unwrap_or_default)
    }

    async fn hmget(&mut self, key: &str, fields: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.call(|store| {
            store.read_hash(key, |h| fields.iter().map(|f| h.get(f).cloned()).collect())
        })
        .map(|found| found.unwrap_or_else(|| vec![None; fields.len()]))
    }

    async fn sismember(&mut self, key: &str, member: &[u8]) -> StoreResult<bool> {
        self.call(|store| store.read_set(key, |s| s.contains(member)))
            .map(|found| found.unwrap_or(false))
    }

    async fn smembers(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.call(|store| store.read_set(key, |s| s.iter().cloned().collect()))
            .map(Option::unwrap_or_default)
    }

    async fn scard(&mut self, key: &str) -> StoreResult<u64> {
        self.call(|store| store.read_set(key, |s| count(s.len())))
            .map(Option::unwrap_or_default)
    }

    async fn zscore(&mut self, key: &str, member: &[u8]) -> StoreResult<Option<f64>> {
        self.call(|store| store.read_sorted_set(key, |z| z.scores.get(member).map(|s| s.0)))
            .map(Option::flatten)
    }

    async fn zrange(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Vec<u8>>> {
        self.call(|store| {
            store.read_sorted_set(key, |z| match rank_range(z.len(), start, stop) {
                Some((from, to)) => z
                    .ordered
                    .iter()
                    .skip(from)
                    .take(to - from)
                    .map(|(_, member)| member.clone())
                    .collect(),
                None => Vec::new(),
            })
        })
        .map(Option::unwrap_or_default)
    }

    async fn zcard(&mut self, key: &str) -> StoreResult<u64> {
        self.call(|store| store.read_sorted_set(key, |z| count(z.len())))
            .map(Option::unwrap_or_default)
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.call(|store| store.read_string(key, <[u8]>::to_vec))
    }

    async fn strlen(&mut self, key: &str) -> StoreResult<u64> {
        self.call(|store| store.read_string(key, |s| count(s.len())))
            .map(Option::unwrap_or_default)
    }
}

// ---------------------------------------------------------------------------
// MemoryPool
// ---------------------------------------------------------------------------

/// Snapshot of the connection accounting of a [`MemoryPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened.
    pub created: u64,
    /// Successful `acquire()` calls.
    pub acquired: u64,
    /// Connections returned through `release_healthy`.
    pub healthy_returns: u64,
    /// Connections returned through `release_broken`.
    pub broken_returns: u64,
    /// Poisoned connections that were wrongly returned as healthy.
    pub misrouted_returns: u64,
}

impl PoolStats {
    /// Connections currently checked out.
    ///
    /// The counters are loaded one at a time, so a snapshot taken while
    /// connections come back may undercount; it never goes below zero.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.acquired
            .saturating_sub(self.healthy_returns)
            .saturating_sub(self.broken_returns)
    }
}

/// Connection pool over a shared [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryPool {
    store: Arc<MemoryStore>,
    idle: Mutex<Vec<MemoryConnection>>,
    next_id: AtomicU64,
    acquired: AtomicU64,
    healthy_returns: AtomicU64,
    broken_returns: AtomicU64,
    misrouted_returns: AtomicU64,
}

impl MemoryPool {
    /// Creates a pool over a fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Creates a pool over an existing store. Several pools may share one
    /// store, like several processes sharing one server.
    #[must_use]
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            idle: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            acquired: AtomicU64::new(0),
            healthy_returns: AtomicU64::new(0),
            broken_returns: AtomicU64::new(0),
            misrouted_returns: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.next_id.load(Ordering::SeqCst) - 1,
            acquired: self.acquired.load(Ordering::SeqCst),
            healthy_returns: self.healthy_returns.load(Ordering::SeqCst),
            broken_returns: self.broken_returns.load(Ordering::SeqCst),
            misrouted_returns: self.misrouted_returns.load(Ordering::SeqCst),
        }
    }

    /// Number of idle connections ready for reuse.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> StoreResult<MemoryConnection> {
        let reused = self.idle.lock().pop();
        let conn = reused.unwrap_or_else(|| MemoryConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            store: Arc::clone(&self.store),
            poisoned: false,
        });
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(conn)
    }

    fn release_healthy(&self, conn: MemoryConnection) {
        self.healthy_returns.fetch_add(1, Ordering::SeqCst);
        if conn.poisoned {
            self.misrouted_returns.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(conn = conn.id, "poisoned connection returned as healthy; dropping");
            return;
        }
        self.idle.lock().push(conn);
    }

    fn release_broken(&self, conn: MemoryConnection) {
        self.broken_returns.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(conn = conn.id, "discarding broken connection");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn hset(key: &str, field: &[u8], value: &[u8]) -> Command {
        Command::HSet {
            key: key.to_string(),
            field: field.to_vec(),
            value: value.to_vec(),
        }
    }

    fn zadd(key: &str, score: f64, member: &[u8]) -> Command {
        Command::ZAdd {
            key: key.to_string(),
            score,
            member: member.to_vec(),
        }
    }

    #[tokio::test]
    async fn missing_keys_read_as_empty() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.hget("h", b"f").await.unwrap(), None);
        assert!(!conn.hexists("h", b"f").await.unwrap());
        assert_eq!(conn.hlen("h").await.unwrap(), 0);
        assert!(conn.smembers("s").await.unwrap().is_empty());
        assert_eq!(conn.zscore("z", b"m").await.unwrap(), None);
        assert!(conn.zrange("z", 0, -1).await.unwrap().is_empty());
        assert_eq!(conn.get("str").await.unwrap(), None);
        assert_eq!(conn.strlen("str").await.unwrap(), 0);
        assert_eq!(
            conn.hmget("h", &[b"a".to_vec(), b"b".to_vec()]).await.unwrap(),
            vec![None, None]
        );
    }

    #[tokio::test]
    async fn pipeline_applies_in_order_in_one_round_trip() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        let batch: Batch = vec![
            hset("h", b"a", b"1"),
            hset("h", b"a", b"2"),
            hset("h", b"b", b"3"),
        ]
        .into_iter()
        .collect();
        conn.pipeline(batch).await.unwrap();

        let stats = pool.store().stats();
        assert_eq!(stats.round_trips, 1);
        assert_eq!(stats.pipelines, 1);
        assert_eq!(stats.commands, 3);
        assert_eq!(conn.hget("h", b"a").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(conn.hlen("h").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn wrong_kind_is_an_application_error() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        conn.pipeline(vec![hset("k", b"f", b"v")].into_iter().collect())
            .await
            .unwrap();

        let err = conn.smembers("k").await.unwrap_err();
        assert_eq!(err, StoreError::WrongType { key: "k".to_string() });
        assert!(!err.is_connection_fault());
        assert!(!conn.is_poisoned());
    }

    #[tokio::test]
    async fn pipeline_continues_after_failing_command() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        let batch: Batch = vec![
            hset("k", b"f", b"v"),
            Command::SAdd { key: "k".into(), member: b"m".to_vec() },
            hset("k", b"g", b"w"),
        ]
        .into_iter()
        .collect();
        let err = conn.pipeline(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
        assert_eq!(conn.hlen("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn atomic_block_is_all_or_nothing() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        conn.pipeline(vec![hset("k", b"f", b"v")].into_iter().collect())
            .await
            .unwrap();

        let batch: Batch = vec![
            Command::SAdd { key: "s".into(), member: b"x".to_vec() },
            Command::SAdd { key: "k".into(), member: b"y".to_vec() },
        ]
        .into_iter()
        .collect();
        assert!(conn.atomic(batch).await.is_err());
        assert_eq!(conn.scard("s").await.unwrap(), 0, "no command of the block applied");
    }

    #[tokio::test]
    async fn atomic_validation_follows_deletes_inside_the_block() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        conn.pipeline(vec![hset("k", b"f", b"v")].into_iter().collect())
            .await
            .unwrap();

        let batch: Batch = vec![
            Command::Del { key: "k".into() },
            Command::SAdd { key: "k".into(), member: b"x".to_vec() },
        ]
        .into_iter()
        .collect();
        conn.atomic(batch).await.unwrap();
        assert!(conn.sismember("k", b"x").await.unwrap());
        assert_eq!(pool.store().stats().atomic_blocks, 1);
    }

    #[tokio::test]
    async fn emptied_collections_disappear() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        conn.pipeline(
            vec![
                Command::SAdd { key: "s".into(), member: b"x".to_vec() },
                Command::SRem { key: "s".into(), member: b"x".to_vec() },
            ]
            .into_iter()
            .collect(),
        )
        .await
        .unwrap();
        assert!(!pool.store().contains_key("s"));
        assert_eq!(pool.store().key_count(), 0);
    }

    #[tokio::test]
    async fn sorted_set_orders_by_score_then_member() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        conn.pipeline(
            vec![
                zadd("z", 2.0, b"b"),
                zadd("z", 1.0, b"c"),
                zadd("z", 2.0, b"a"),
                zadd("z", 3.0, b"d"),
            ]
            .into_iter()
            .collect(),
        )
        .await
        .unwrap();

        let all = conn.zrange("z", 0, -1).await.unwrap();
        assert_eq!(all, vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec(), b"d".to_vec()]);
        assert_eq!(conn.zrange("z", -1, -1).await.unwrap(), vec![b"d".to_vec()]);
        assert_eq!(conn.zrange("z", 1, 2).await.unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(conn.zrange("z", 5, 10).await.unwrap().is_empty());
        assert!(conn.zrange("z", 2, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rescoring_moves_the_member() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        conn.pipeline(vec![zadd("z", 1.0, b"a"), zadd("z", 2.0, b"b"), zadd("z", 3.0, b"a")].into_iter().collect())
            .await
            .unwrap();
        assert_eq!(conn.zcard("z").await.unwrap(), 2);
        assert_eq!(conn.zscore("z", b"a").await.unwrap(), Some(3.0));
        assert_eq!(conn.zrange("z", 0, 0).await.unwrap(), vec![b"b".to_vec()]);
    }

    #[tokio::test]
    async fn injected_fault_poisons_the_connection() {
        let pool = MemoryPool::new();
        pool.store().inject_connection_faults(1);
        let mut conn = pool.acquire().await.unwrap();

        let err = conn.hlen("h").await.unwrap_err();
        assert!(err.is_connection_fault());
        assert!(conn.is_poisoned());
        assert!(conn.hlen("h").await.unwrap_err().is_connection_fault());

        pool.release_broken(conn);
        let stats = pool.stats();
        assert_eq!(stats.broken_returns, 1);
        assert_eq!(stats.outstanding(), 0);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn healthy_connections_are_reused() {
        let pool = MemoryPool::new();
        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        pool.release_healthy(conn);
        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.stats().created, 1);
        assert_eq!(pool.stats().outstanding(), 1);
    }

    #[test]
    fn outstanding_never_underflows_on_a_torn_snapshot() {
        let stats = PoolStats {
            acquired: 3,
            healthy_returns: 3,
            broken_returns: 1,
            ..PoolStats::default()
        };
        assert_eq!(stats.outstanding(), 0);
    }

    #[tokio::test]
    async fn misrouted_poisoned_connection_is_not_reused() {
        let pool = MemoryPool::new();
        pool.store().inject_connection_faults(1);
        let mut conn = pool.acquire().await.unwrap();
        let _ = conn.scard("s").await;
        pool.release_healthy(conn);
        assert_eq!(pool.stats().misrouted_returns, 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn append_and_get_string() {
        let pool = MemoryPool::new();
        let mut conn = pool.acquire().await.unwrap();
        conn.pipeline(
            vec![
                Command::Append { key: "s".into(), value: b"hel".to_vec() },
                Command::Append { key: "s".into(), value: b"lo".to_vec() },
            ]
            .into_iter()
            .collect(),
        )
        .await
        .unwrap();
        assert_eq!(conn.get("s").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(conn.strlen("s").await.unwrap(), 5);
    }

    #[test]
    fn rank_range_clamps_like_the_store() {
        assert_eq!(rank_range(5, 0, -1), Some((0, 5)));
        assert_eq!(rank_range(5, -2, -1), Some((3, 5)));
        assert_eq!(rank_range(5, -10, 1), Some((0, 2)));
        assert_eq!(rank_range(5, 3, 100), Some((3, 5)));
        assert_eq!(rank_range(5, 5, 6), None);
        assert_eq!(rank_range(0, 0, -1), None);
        assert_eq!(rank_range(5, 0, -6), None);
    }

    proptest::proptest! {
        #[test]
        fn rank_range_selects_the_inclusive_rank_window(
            len in 0..20_usize,
            start in -25..25_i64,
            stop in -25..25_i64,
        ) {
            #[allow(clippy::cast_possible_wrap)]
            let signed = len as i64;
            let resolve = |rank: i64| if rank < 0 { signed + rank } else { rank };
            let selected: Vec<usize> = (0..len)
                .filter(|&i| {
                    #[allow(clippy::cast_possible_wrap)]
                    let i = i as i64;
                    i >= resolve(start) && i <= resolve(stop)
                })
                .collect();
            let expected = match (selected.first(), selected.last()) {
                (Some(&first), Some(&last)) => Some((first, last + 1)),
                _ => None,
            };
            proptest::prop_assert_eq!(rank_range(len, start, stop), expected);
        }
    }
}
