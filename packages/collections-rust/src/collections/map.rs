//! Remote hash map.

use std::borrow::Borrow;
use std::marker::PhantomData;
use std::sync::Arc;

use remcoll_core::{Batch, Codec, CodecPool, Command, Connection, ConnectionPool, MsgPackCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::to_len;
use crate::adapter::CollectionAdapter;
use crate::config::CollectionConfig;
use crate::error::{CollectionError, Result};

/// A map of `K` to `V` stored as one hash under a store key.
///
/// Keys and values are encoded with the codec `C`. Reads go to the store
/// after flushing this instance's buffered writes; single-entry writes are
/// buffered and never report the entry's previous value.
pub struct RemoteMap<P: ConnectionPool, K, V, C: Codec = MsgPackCodec> {
    adapter: CollectionAdapter<P, C>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<P, K, V, C> RemoteMap<P, K, V, C>
where
    P: ConnectionPool,
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Opens the map stored under `name` with the default configuration.
    #[must_use]
    pub fn new(pool: Arc<P>, name: impl Into<Arc<str>>) -> Self {
        Self::with_config(pool, name, CollectionConfig::default())
    }

    #[must_use]
    pub fn with_config(pool: Arc<P>, name: impl Into<Arc<str>>, config: CollectionConfig) -> Self {
        Self::from_adapter(CollectionAdapter::new(
            pool,
            name,
            config,
            Arc::new(CodecPool::new()),
        ))
    }

    pub(crate) fn from_adapter(adapter: CollectionAdapter<P, C>) -> Self {
        Self {
            adapter,
            _types: PhantomData,
        }
    }

    /// The store key holding this map.
    #[must_use]
    pub fn name(&self) -> &str {
        self.adapter.key()
    }

    #[must_use]
    pub fn config(&self) -> &CollectionConfig {
        self.adapter.config()
    }

    /// Sends every buffered write now.
    ///
    /// # Errors
    ///
    /// Returns the failure of the flush.
    pub async fn sync(&self) -> Result<()> {
        self.adapter.sync().await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns flush or store failures.
    pub async fn len(&self) -> Result<usize> {
        let key = self.adapter.shared_key();
        let len = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.hlen(&key).await?) }))
            .await?;
        Ok(to_len(len))
    }

    /// # Errors
    ///
    /// Returns flush or store failures.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn contains_key<Q>(&self, key: &Q) -> Result<bool>
    where
        K: Borrow<Q>,
        Q: Serialize + ?Sized,
    {
        let field = self.adapter.encode(key)?;
        let name = self.adapter.shared_key();
        self.adapter
            .run_immediate(move |conn| {
                Box::pin(async move { Ok(conn.hexists(&name, &field).await?) })
            })
            .await
    }

    /// Whether any entry holds `value`. Compares encoded forms, so it relies
    /// on the codec encoding equal values identically.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn contains_value<W>(&self, value: &W) -> Result<bool>
    where
        V: Borrow<W>,
        W: Serialize + ?Sized,
    {
        let encoded = self.adapter.encode(value)?;
        let name = self.adapter.shared_key();
        self.adapter
            .run_immediate(move |conn| {
                Box::pin(async move {
                    let values = conn.hvals(&name).await?;
                    Ok(values.iter().any(|v| *v == encoded))
                })
            })
            .await
    }

    /// The value stored for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn get<Q>(&self, key: &Q) -> Result<Option<V>>
    where
        K: Borrow<Q>,
        Q: Serialize + ?Sized,
    {
        let field = self.adapter.encode(key)?;
        let name = self.adapter.shared_key();
        let raw = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.hget(&name, &field).await?) }))
            .await?;
        raw.map(|bytes| self.adapter.decode(&bytes)).transpose()
    }

    /// Looks up several keys in one round trip. The result lines up with
    /// `keys`.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn get_many(&self, keys: &[K]) -> Result<Vec<Option<V>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let fields = keys
            .iter()
            .map(|key| self.adapter.encode(key))
            .collect::<Result<Vec<_>>>()?;
        let name = self.adapter.shared_key();
        let raw = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.hmget(&name, &fields).await?) }))
            .await?;
        raw.into_iter()
            .map(|bytes| bytes.map(|b| self.adapter.decode(&b)).transpose())
            .collect()
    }

    /// All keys, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn keys(&self) -> Result<Vec<K>> {
        let name = self.adapter.shared_key();
        let raw = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.hkeys(&name).await?) }))
            .await?;
        self.adapter.decode_all(raw)
    }

    /// All values, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn values(&self) -> Result<Vec<V>> {
        let name = self.adapter.shared_key();
        let raw = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.hvals(&name).await?) }))
            .await?;
        self.adapter.decode_all(raw)
    }

    /// All entries, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn entries(&self) -> Result<Vec<(K, V)>> {
        let name = self.adapter.shared_key();
        let raw = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.hgetall(&name).await?) }))
            .await?;
        raw.iter()
            .map(|(k, v)| Ok((self.adapter.decode(k)?, self.adapter.decode(v)?)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Buffers `key -> value`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns codec failures (nothing is buffered then) and failures of a
    /// flush this write triggers.
    pub async fn insert<Q, W>(&self, key: &Q, value: &W) -> Result<()>
    where
        K: Borrow<Q>,
        V: Borrow<W>,
        Q: Serialize + ?Sized,
        W: Serialize + ?Sized,
    {
        let field = self.adapter.encode(key)?;
        let value = self.adapter.encode(value)?;
        self.adapter
            .buffer(Command::HSet {
                key: self.name().to_string(),
                field,
                value,
            })
            .await
    }

    /// Buffers the removal of `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns codec failures and failures of a flush this write triggers.
    pub async fn remove<Q>(&self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Serialize + ?Sized,
    {
        let field = self.adapter.encode(key)?;
        self.adapter
            .buffer(Command::HDel {
                key: self.name().to_string(),
                field,
            })
            .await
    }

    /// Inserts every entry as one all-or-nothing block.
    ///
    /// # Errors
    ///
    /// Returns codec failures before anything is sent, and flush or store
    /// failures. Either way no entry of the call is applied.
    pub async fn insert_all<'a, I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
        K: 'a,
        V: 'a,
    {
        let mut batch = Batch::new();
        for (key, value) in entries {
            batch.push(Command::HSet {
                key: self.name().to_string(),
                field: self.adapter.encode(key)?,
                value: self.adapter.encode(value)?,
            });
        }
        self.adapter.run_atomic(batch).await
    }

    /// Removes every key as one all-or-nothing block.
    ///
    /// # Errors
    ///
    /// Returns codec failures before anything is sent, and flush or store
    /// failures.
    pub async fn remove_all<'a, I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut batch = Batch::new();
        for key in keys {
            batch.push(Command::HDel {
                key: self.name().to_string(),
                field: self.adapter.encode(key)?,
            });
        }
        self.adapter.run_atomic(batch).await
    }

    /// Keeps only the entries for which `keep` returns true. Returns whether
    /// anything was removed.
    ///
    /// Reading the entries and removing the rejected ones happen on one
    /// connection with this instance locked.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures. Nothing is removed when
    /// decoding any entry fails.
    pub async fn retain<F>(&self, mut keep: F) -> Result<bool>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let name = self.name();
        let mut lease = self.adapter.immediate().await?;
        let result = async {
            let mut batch = Batch::new();
            for (field, value) in lease.hgetall(name).await? {
                let (k, v): (K, V) = (self.adapter.decode(&field)?, self.adapter.decode(&value)?);
                if !keep(&k, &v) {
                    batch.push(Command::HDel {
                        key: name.to_string(),
                        field,
                    });
                }
            }
            let removed = !batch.is_empty();
            if removed {
                lease.atomic(batch).await?;
            }
            Ok::<_, CollectionError>(removed)
        }
        .await;
        lease.finish(result)
    }

    /// Removes the whole map.
    ///
    /// # Errors
    ///
    /// Returns failures of a flush this write triggers.
    pub async fn clear(&self) -> Result<()> {
        self.adapter
            .buffer(Command::Del {
                key: self.name().to_string(),
            })
            .await
    }
}

impl<P: ConnectionPool, K, V, C: Codec> std::fmt::Debug for RemoteMap<P, K, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMap")
            .field("adapter", &self.adapter)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
