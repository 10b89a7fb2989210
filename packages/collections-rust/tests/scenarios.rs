//! End-to-end collection behaviour against the in-process store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remcoll::{
    CollectionBuilder, CollectionConfig, CollectionError, Connection, ConnectionPool, JsonCodec,
    MemoryPool, RemoteMap, RemoteSet, RemoteSortedSet, RemoteString, Scored, StoreError,
};
use remcoll_core::{Batch, MemoryConnection, StoreResult};
use serde::{Deserialize, Serialize};

fn pool() -> Arc<MemoryPool> {
    Arc::new(MemoryPool::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Task {
    title: String,
    priority: u8,
}

impl Scored for Task {
    fn score(&self) -> f64 {
        f64::from(self.priority)
    }
}

// ---------------------------------------------------------------------------
// Collection scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn map_overwrite_scenario() {
    let pool = pool();
    let m: RemoteMap<MemoryPool, String, i32> = RemoteMap::new(Arc::clone(&pool), "m");
    m.clear().await.unwrap();
    m.insert("a", &1_i32).await.unwrap();
    m.insert("a", &2_i32).await.unwrap();
    assert_eq!(m.get("a").await.unwrap(), Some(2));
    assert_eq!(m.len().await.unwrap(), 1);
}

#[tokio::test]
async fn set_bulk_scenario() {
    let pool = pool();
    let s: RemoteSet<MemoryPool, String> = RemoteSet::new(Arc::clone(&pool), "s");
    s.clear().await.unwrap();
    s.insert("x").await.unwrap();
    s.insert("y").await.unwrap();
    let both = vec!["x".to_string(), "y".to_string()];
    assert!(s.contains_all(&both).await.unwrap());
    s.remove_all(&both[..1]).await.unwrap();
    assert_eq!(s.len().await.unwrap(), 1);
}

#[tokio::test]
async fn sorted_set_iterates_by_score() {
    let pool = pool();
    let tasks: RemoteSortedSet<MemoryPool, Task> = RemoteSortedSet::new(Arc::clone(&pool), "tasks");
    for (title, priority) in [("write", 2), ("plan", 1), ("ship", 3)] {
        tasks
            .insert(&Task {
                title: title.to_string(),
                priority,
            })
            .await
            .unwrap();
    }
    let scores: Vec<u8> = tasks.members().await.unwrap().iter().map(|t| t.priority).collect();
    assert_eq!(scores, vec![1, 2, 3]);
}

#[tokio::test]
async fn hundred_writes_flush_once_before_the_next() {
    let pool = pool();
    let config = CollectionConfig {
        max_without_sync: 100,
        delay_before_sync: Duration::from_secs(3600),
        ..CollectionConfig::default()
    };
    let m: RemoteMap<MemoryPool, u32, u32> = RemoteMap::with_config(Arc::clone(&pool), "m", config);
    for i in 0..100_u32 {
        m.insert(&i, &i).await.unwrap();
    }
    assert_eq!(pool.store().stats().pipelines, 0);

    m.insert(&100_u32, &100_u32).await.unwrap();
    let stats = pool.store().stats();
    assert_eq!(stats.pipelines, 1);
    assert_eq!(stats.commands, 100);

    assert_eq!(m.len().await.unwrap(), 101);
    assert_eq!(pool.store().stats().pipelines, 2);
}

#[tokio::test]
async fn string_append_and_positional_reads() {
    let pool = pool();
    let s = RemoteString::new(Arc::clone(&pool), "greeting");
    s.append("helloé$€").await.unwrap();
    s.append("ïüâ§").await.unwrap();
    assert_eq!(s.len().await.unwrap(), 12);
    assert_eq!(s.substring(8, 11).await.unwrap(), "ïüâ");
    s.clear().await.unwrap();
    assert!(matches!(
        s.char_at(0).await.unwrap_err(),
        CollectionError::AbsentValue { .. }
    ));
}

// ---------------------------------------------------------------------------
// Instance isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn instances_over_one_key_see_each_other_after_flush() {
    let pool = pool();
    let builder = CollectionBuilder::new(Arc::clone(&pool));
    let writer: RemoteMap<MemoryPool, String, u32> = builder.map("shared");
    let reader: RemoteMap<MemoryPool, String, u32> = builder.map("shared");

    writer.insert("k", &1_u32).await.unwrap();
    assert_eq!(reader.get("k").await.unwrap(), None);

    writer.sync().await.unwrap();
    assert_eq!(reader.get("k").await.unwrap(), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_on_one_instance_lose_nothing() {
    let pool = pool();
    let set: Arc<RemoteSet<MemoryPool, u32>> = Arc::new(
        CollectionBuilder::new(Arc::clone(&pool))
            .max_without_sync(7)
            .set("numbers"),
    );
    let mut writers = Vec::new();
    for w in 0..8_u32 {
        let set = Arc::clone(&set);
        writers.push(tokio::spawn(async move {
            for i in 0..50_u32 {
                set.insert(&(w * 1000 + i)).await.unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }
    assert_eq!(set.len().await.unwrap(), 400);
    assert_eq!(pool.stats().outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn idle_instance_flushes_after_the_quiet_period() {
    let pool = pool();
    let m: RemoteMap<MemoryPool, String, u32> = RemoteMap::new(Arc::clone(&pool), "lazy");
    m.insert("a", &1_u32).await.unwrap();
    assert!(!pool.store().contains_key("lazy"));

    tokio::time::sleep(Duration::from_millis(101)).await;
    assert!(pool.store().contains_key("lazy"));
    assert_eq!(pool.stats().outstanding(), 0);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flush_fault_reaches_the_writer_and_recovers() {
    let pool = pool();
    let m: RemoteMap<MemoryPool, String, u32> = CollectionBuilder::new(Arc::clone(&pool))
        .sync_immediate(true)
        .map("m");
    pool.store().inject_connection_faults(1);

    let err = m.insert("a", &1_u32).await.unwrap_err();
    assert!(matches!(err, CollectionError::Store(StoreError::ConnectionFault(_))));
    assert_eq!(pool.stats().broken_returns, 1);

    m.insert("b", &2_u32).await.unwrap();
    assert_eq!(m.keys().await.unwrap(), vec!["b".to_string()]);
    let stats = pool.stats();
    assert_eq!(stats.misrouted_returns, 0);
    assert_eq!(stats.outstanding(), 0);
}

#[tokio::test]
async fn wrong_kind_is_not_a_connection_fault() {
    let pool = pool();
    let text = RemoteString::new(Arc::clone(&pool), "k");
    text.append("x").await.unwrap();
    text.sync().await.unwrap();

    let set: RemoteSet<MemoryPool, u32> = RemoteSet::new(Arc::clone(&pool), "k");
    let err = set.len().await.unwrap_err();
    assert!(!err.is_connection_fault());
    assert_eq!(pool.stats().broken_returns, 0);
}

/// Wraps a [`MemoryPool`] and refuses to hand out connections while closed.
struct GatedPool {
    inner: MemoryPool,
    closed: AtomicBool,
}

#[async_trait]
impl ConnectionPool for GatedPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> StoreResult<MemoryConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionFault("pool exhausted".to_string()));
        }
        self.inner.acquire().await
    }

    fn release_healthy(&self, conn: MemoryConnection) {
        self.inner.release_healthy(conn);
    }

    fn release_broken(&self, conn: MemoryConnection) {
        self.inner.release_broken(conn);
    }
}

#[tokio::test]
async fn acquire_failure_leaves_the_instance_idle() {
    let pool = Arc::new(GatedPool {
        inner: MemoryPool::new(),
        closed: AtomicBool::new(true),
    });
    let m: RemoteMap<GatedPool, String, u32> = RemoteMap::new(Arc::clone(&pool), "m");

    assert!(m.insert("a", &1_u32).await.unwrap_err().is_connection_fault());
    assert!(m.get("a").await.unwrap_err().is_connection_fault());

    pool.closed.store(false, Ordering::SeqCst);
    m.insert("a", &1_u32).await.unwrap();
    assert_eq!(m.get("a").await.unwrap(), Some(1));
    assert_eq!(pool.inner.stats().outstanding(), 0);
}

#[tokio::test]
async fn bulk_insert_with_an_unencodable_value_commits_nothing() {
    let pool = pool();
    let m: RemoteMap<MemoryPool, String, HashMap<Vec<u8>, u32>, JsonCodec> =
        CollectionBuilder::new(Arc::clone(&pool))
            .codec::<JsonCodec>()
            .map("json");
    let entries = vec![
        ("first".to_string(), HashMap::new()),
        ("bad".to_string(), HashMap::from([(vec![1_u8], 1_u32)])),
        ("last".to_string(), HashMap::new()),
    ];

    let err = m
        .insert_all(entries.iter().map(|(k, v)| (k, v)))
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::Codec(_)));
    assert_eq!(pool.store().stats().round_trips, 0);
    assert!(!pool.store().contains_key("json"));
    assert!(m.is_empty().await.unwrap());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

const SLOW_ROUND_TRIP: Duration = Duration::from_millis(200);

/// A [`MemoryConnection`] whose pipelines and length reads take
/// [`SLOW_ROUND_TRIP`].
struct SlowConnection(MemoryConnection);

#[async_trait]
impl Connection for SlowConnection {
    async fn pipeline(&mut self, batch: Batch) -> StoreResult<()> {
        tokio::time::sleep(SLOW_ROUND_TRIP).await;
        self.0.pipeline(batch).await
    }

    async fn atomic(&mut self, batch: Batch) -> StoreResult<()> {
        self.0.atomic(batch).await
    }

    async fn hget(&mut self, key: &str, field: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.0.hget(key, field).await
    }

    async fn hexists(&mut self, key: &str, field: &[u8]) -> StoreResult<bool> {
        self.0.hexists(key, field).await
    }

    async fn hlen(&mut self, key: &str) -> StoreResult<u64> {
        tokio::time::sleep(SLOW_ROUND_TRIP).await;
        self.0.hlen(key).await
    }

    async fn hkeys(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.0.hkeys(key).await
    }

    async fn hvals(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.0.hvals(key).await
    }

    async fn hgetall(&mut self, key: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.0.hgetall(key).await
    }

    async fn hmget(&mut self, key: &str, fields: &[Vec<u8>]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.0.hmget(key, fields).await
    }

    async fn sismember(&mut self, key: &str, member: &[u8]) -> StoreResult<bool> {
        self.0.sismember(key, member).await
    }

    async fn smembers(&mut self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.0.smembers(key).await
    }

    async fn scard(&mut self, key: &str) -> StoreResult<u64> {
        self.0.scard(key).await
    }

    async fn zscore(&mut self, key: &str, member: &[u8]) -> StoreResult<Option<f64>> {
        self.0.zscore(key, member).await
    }

    async fn zrange(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Vec<u8>>> {
        self.0.zrange(key, start, stop).await
    }

    async fn zcard(&mut self, key: &str) -> StoreResult<u64> {
        self.0.zcard(key).await
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.0.get(key).await
    }

    async fn strlen(&mut self, key: &str) -> StoreResult<u64> {
        self.0.strlen(key).await
    }
}

struct SlowPool {
    inner: MemoryPool,
}

#[async_trait]
impl ConnectionPool for SlowPool {
    type Connection = SlowConnection;

    async fn acquire(&self) -> StoreResult<SlowConnection> {
        self.inner.acquire().await.map(SlowConnection)
    }

    fn release_healthy(&self, conn: SlowConnection) {
        self.inner.release_healthy(conn.0);
    }

    fn release_broken(&self, conn: SlowConnection) {
        self.inner.release_broken(conn.0);
    }
}

fn slow_pool() -> Arc<SlowPool> {
    Arc::new(SlowPool {
        inner: MemoryPool::new(),
    })
}

#[tokio::test(start_paused = true)]
async fn cancelled_read_returns_its_connection() {
    let pool = slow_pool();
    let m: RemoteMap<SlowPool, String, u32> = RemoteMap::new(Arc::clone(&pool), "m");

    let cancelled = tokio::time::timeout(Duration::from_millis(20), m.len()).await;
    assert!(cancelled.is_err());
    let stats = pool.inner.stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.broken_returns, 1);
    assert_eq!(stats.outstanding(), 0);

    assert_eq!(m.len().await.unwrap(), 0);
    assert_eq!(pool.inner.stats().outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_flush_is_reported_to_the_next_caller() {
    let pool = slow_pool();
    let m: RemoteMap<SlowPool, String, u32> = CollectionBuilder::new(Arc::clone(&pool))
        .delay_before_sync(Duration::from_secs(3600))
        .map("m");
    m.insert("a", &1_u32).await.unwrap();

    let cancelled = tokio::time::timeout(Duration::from_millis(20), m.sync()).await;
    assert!(cancelled.is_err());
    let stats = pool.inner.stats();
    assert_eq!(stats.broken_returns, 1);
    assert_eq!(stats.outstanding(), 0);

    let err = m.sync().await.unwrap_err();
    assert!(err.is_connection_fault());
    m.insert("b", &2_u32).await.unwrap();
    m.sync().await.unwrap();
    assert_eq!(m.get("b").await.unwrap(), Some(2));
    assert_eq!(pool.inner.stats().outstanding(), 0);
}
