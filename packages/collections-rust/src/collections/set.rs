//! Remote unordered set.

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

/// A set of `V` stored under one store key. Membership is decided on the
/// encoded form of the element.
pub struct RemoteSet<P: ConnectionPool, V, C: Codec = MsgPackCodec> {
    adapter: CollectionAdapter<P, C>,
    _types: PhantomData<fn() -> V>,
}

impl<P, V, C> RemoteSet<P, V, C>
where
    P: ConnectionPool,
    V: Serialize + DeserializeOwned,
    C: Codec,
{
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

    /// # Errors
    ///
    /// Returns flush or store failures.
    pub async fn len(&self) -> Result<usize> {
        let name = self.adapter.shared_key();
        let len = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.scard(&name).await?) }))
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
    pub async fn contains<Q>(&self, value: &Q) -> Result<bool>
    where
        V: Borrow<Q>,
        Q: Serialize + ?Sized,
    {
        let member = self.adapter.encode(value)?;
        let name = self.adapter.shared_key();
        self.adapter
            .run_immediate(move |conn| {
                Box::pin(async move { Ok(conn.sismember(&name, &member).await?) })
            })
            .await
    }

    /// Whether every element of `values` is a member. True for an empty
    /// input. Stops asking the store at the first miss.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn contains_all<'a, I>(&self, values: I) -> Result<bool>
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        let members = values
            .into_iter()
            .map(|value| self.adapter.encode(value))
            .collect::<Result<Vec<_>>>()?;
        let name = self.adapter.shared_key();
        self.adapter
            .run_immediate(move |conn| {
                Box::pin(async move {
                    for member in &members {
                        if !conn.sismember(&name, member).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                })
            })
            .await
    }

    /// All elements, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn members(&self) -> Result<Vec<V>> {
        let name = self.adapter.shared_key();
        let raw = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.smembers(&name).await?) }))
            .await?;
        self.adapter.decode_all(raw)
    }

    /// Buffers the addition of `value`. Adding a present element is a no-op
    /// in the store.
    ///
    /// # Errors
    ///
    /// Returns codec failures and failures of a flush this write triggers.
    pub async fn insert<Q>(&self, value: &Q) -> Result<()>
    where
        V: Borrow<Q>,
        Q: Serialize + ?Sized,
    {
        let member = self.adapter.encode(value)?;
        self.adapter
            .buffer(Command::SAdd {
                key: self.name().to_string(),
                member,
            })
            .await
    }

    /// Buffers the removal of `value`.
    ///
    /// # Errors
    ///
    /// Returns codec failures and failures of a flush this write triggers.
    pub async fn remove<Q>(&self, value: &Q) -> Result<()>
    where
        V: Borrow<Q>,
        Q: Serialize + ?Sized,
    {
        let member = self.adapter.encode(value)?;
        self.adapter
            .buffer(Command::SRem {
                key: self.name().to_string(),
                member,
            })
            .await
    }

    /// Adds every element as one all-or-nothing block.
    ///
    /// # Errors
    ///
    /// Returns codec failures before anything is sent, and flush or store
    /// failures.
    pub async fn insert_all<'a, I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        let batch = self.member_batch(values, |key, member| Command::SAdd { key, member })?;
        self.adapter.run_atomic(batch).await
    }

    /// Removes every element as one all-or-nothing block.
    ///
    /// # Errors
    ///
    /// Returns codec failures before anything is sent, and flush or store
    /// failures.
    pub async fn remove_all<'a, I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        let batch = self.member_batch(values, |key, member| Command::SRem { key, member })?;
        self.adapter.run_atomic(batch).await
    }

    /// Keeps only the elements for which `keep` returns true. Returns whether
    /// anything was removed.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures. Nothing is removed when
    /// decoding any element fails.
    pub async fn retain<F>(&self, mut keep: F) -> Result<bool>
    where
        F: FnMut(&V) -> bool,
    {
        let name = self.name();
        let mut lease = self.adapter.immediate().await?;
        let result = async {
            let mut batch = Batch::new();
            for member in lease.smembers(name).await? {
                let value: V = self.adapter.decode(&member)?;
                if !keep(&value) {
                    batch.push(Command::SRem {
                        key: name.to_string(),
                        member,
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

    /// Keeps only the elements also present in `others`.
    ///
    /// # Errors
    ///
    /// See [`retain`](Self::retain).
    pub async fn retain_all(&self, others: &[V]) -> Result<bool>
    where
        V: PartialEq,
    {
        self.retain(|value| others.contains(value)).await
    }

    /// Removes the whole set.
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

    fn member_batch<'a, I>(
        &self,
        values: I,
        command: impl Fn(String, Vec<u8>) -> Command,
    ) -> Result<Batch>
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        values
            .into_iter()
            .map(|value| Ok(command(self.name().to_string(), self.adapter.encode(value)?)))
            .collect()
    }
}

impl<P: ConnectionPool, V, C: Codec> std::fmt::Debug for RemoteSet<P, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSet")
            .field("adapter", &self.adapter)
            .finish()
    }
}
