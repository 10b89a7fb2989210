//! Fluent construction of collections sharing one pool and configuration.

use std::sync::Arc;
use std::time::Duration;

use remcoll_core::{Codec, CodecPool, ConnectionPool, MsgPackCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::adapter::CollectionAdapter;
use crate::collections::{RemoteMap, RemoteSet, RemoteSortedSet, RemoteString, Scored};
use crate::config::CollectionConfig;

/// Builds collection instances over one connection pool.
///
/// Every instance built by the same builder shares its codec pool; each gets
/// its own batching state.
///
/// ```ignore
/// let builder = CollectionBuilder::new(pool).max_without_sync(500);
/// let scores: RemoteMap<_, String, u64> = builder.map("scores");
/// ```
pub struct CollectionBuilder<P: ConnectionPool, C: Codec = MsgPackCodec> {
    pool: Arc<P>,
    config: CollectionConfig,
    codecs: Arc<CodecPool<C>>,
}

impl<P: ConnectionPool> CollectionBuilder<P> {
    /// A builder using the default configuration and `MsgPack` encoding.
    #[must_use]
    pub fn new(pool: Arc<P>) -> Self {
        Self {
            pool,
            config: CollectionConfig::default(),
            codecs: Arc::new(CodecPool::new()),
        }
    }
}

impl<P: ConnectionPool, C: Codec> CollectionBuilder<P, C> {
    #[must_use]
    pub fn sync_immediate(mut self, sync_immediate: bool) -> Self {
        self.config.sync_immediate = sync_immediate;
        self
    }

    #[must_use]
    pub fn max_without_sync(mut self, max_without_sync: u64) -> Self {
        self.config.max_without_sync = max_without_sync;
        self
    }

    #[must_use]
    pub fn delay_before_sync(mut self, delay: Duration) -> Self {
        self.config.delay_before_sync = delay;
        self
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: CollectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Switches to another codec with a fresh codec pool.
    #[must_use]
    pub fn codec<D: Codec>(self) -> CollectionBuilder<P, D> {
        self.codec_pool(Arc::new(CodecPool::new()))
    }

    /// Switches to an existing, possibly shared, codec pool.
    #[must_use]
    pub fn codec_pool<D: Codec>(self, codecs: Arc<CodecPool<D>>) -> CollectionBuilder<P, D> {
        CollectionBuilder {
            pool: self.pool,
            config: self.config,
            codecs,
        }
    }

    #[must_use]
    pub fn current_config(&self) -> &CollectionConfig {
        &self.config
    }

    fn adapter(&self, name: impl Into<Arc<str>>) -> CollectionAdapter<P, C> {
        CollectionAdapter::new(
            Arc::clone(&self.pool),
            name,
            self.config.clone(),
            Arc::clone(&self.codecs),
        )
    }

    #[must_use]
    pub fn map<K, V>(&self, name: impl Into<Arc<str>>) -> RemoteMap<P, K, V, C>
    where
        K: Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        RemoteMap::from_adapter(self.adapter(name))
    }

    #[must_use]
    pub fn set<V>(&self, name: impl Into<Arc<str>>) -> RemoteSet<P, V, C>
    where
        V: Serialize + DeserializeOwned,
    {
        RemoteSet::from_adapter(self.adapter(name))
    }

    #[must_use]
    pub fn sorted_set<V>(&self, name: impl Into<Arc<str>>) -> RemoteSortedSet<P, V, C>
    where
        V: Scored + Serialize + DeserializeOwned,
    {
        RemoteSortedSet::from_adapter(self.adapter(name))
    }

    /// Strings are stored as raw UTF-8 and never go through the codec.
    #[must_use]
    pub fn string(&self, name: impl Into<Arc<str>>) -> RemoteString<P> {
        RemoteString::from_adapter(CollectionAdapter::new(
            Arc::clone(&self.pool),
            name,
            self.config.clone(),
            Arc::new(CodecPool::new()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use remcoll_core::{JsonCodec, MemoryPool};

    use super::*;

    #[test]
    fn setters_land_in_the_config() {
        let builder = CollectionBuilder::new(Arc::new(MemoryPool::new()))
            .sync_immediate(true)
            .max_without_sync(7)
            .delay_before_sync(Duration::from_secs(2));
        let config = builder.current_config();
        assert!(config.sync_immediate);
        assert_eq!(config.max_without_sync, 7);
        assert_eq!(config.delay_before_sync, Duration::from_secs(2));

        let map: RemoteMap<MemoryPool, String, u32> = builder.map("m");
        assert_eq!(map.config(), config);
        assert_eq!(map.name(), "m");
    }

    #[tokio::test]
    async fn built_collections_share_the_pool() {
        let pool = Arc::new(MemoryPool::new());
        let builder = CollectionBuilder::new(Arc::clone(&pool)).sync_immediate(true);
        let set = builder.set::<String>("s");
        let text = builder.string("t");
        set.insert("a").await.unwrap();
        text.append("b").await.unwrap();
        assert!(pool.store().contains_key("s"));
        assert!(pool.store().contains_key("t"));
    }

    #[tokio::test]
    async fn codec_switch_changes_the_encoding() {
        let pool = Arc::new(MemoryPool::new());
        let builder = CollectionBuilder::new(Arc::clone(&pool)).codec::<JsonCodec>();
        let json = builder.map::<String, u32>("m");
        json.insert("k", &1_u32).await.unwrap();
        json.sync().await.unwrap();

        let msgpack: RemoteMap<MemoryPool, String, u32> = CollectionBuilder::new(Arc::clone(&pool)).map("m");
        assert_eq!(msgpack.get("k").await.unwrap(), None);
        assert_eq!(json.get("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn codec_pool_is_shared_between_instances() {
        let codecs = Arc::new(CodecPool::<JsonCodec>::new());
        let builder = CollectionBuilder::new(Arc::new(MemoryPool::new())).codec_pool(Arc::clone(&codecs));
        let a = builder.map::<String, u32>("a");
        let b = builder.set::<u32>("b");
        a.insert("k", &1_u32).await.unwrap();
        b.insert(&2_u32).await.unwrap();
        assert_eq!(codecs.created(), 1);
    }
}
