//! Remote sorted set.
//!
//! Elements carry their own ordering key through [`Scored`]. The store keeps
//! members ordered by `(score, encoded member)`, so elements with equal scores
//! come back in the byte order of their encodings.

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

/// An element that knows its position in a [`RemoteSortedSet`].
pub trait Scored {
    /// Sort key. Must not be NaN.
    fn score(&self) -> f64;
}

macro_rules! scored_as_f64 {
    ($($ty:ty),*) => {
        $(
            impl Scored for $ty {
                fn score(&self) -> f64 {
                    f64::from(*self)
                }
            }
        )*
    };
}

scored_as_f64!(u8, u16, u32, i8, i16, i32, f32, f64);

/// A set of `V` ordered by [`Scored::score`], stored under one store key.
pub struct RemoteSortedSet<P: ConnectionPool, V, C: Codec = MsgPackCodec> {
    adapter: CollectionAdapter<P, C>,
    _types: PhantomData<fn() -> V>,
}

impl<P, V, C> RemoteSortedSet<P, V, C>
where
    P: ConnectionPool,
    V: Scored + Serialize + DeserializeOwned,
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
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.zcard(&name).await?) }))
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
        Ok(self.score_of(value).await?.is_some())
    }

    /// Whether every element of `values` is a member. Checked on one
    /// connection; an empty input is trivially contained.
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
                        if conn.zscore(&name, member).await?.is_none() {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                })
            })
            .await
    }

    /// The score stored for `value`, if it is a member.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn score_of<Q>(&self, value: &Q) -> Result<Option<f64>>
    where
        V: Borrow<Q>,
        Q: Serialize + ?Sized,
    {
        let member = self.adapter.encode(value)?;
        let name = self.adapter.shared_key();
        self.adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.zscore(&name, &member).await?) }))
            .await
    }

    /// Elements by rank, inclusive on both ends. Negative ranks count from
    /// the end, so `range(0, -1)` is everything in order.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn range(&self, start: i64, stop: i64) -> Result<Vec<V>> {
        let name = self.adapter.shared_key();
        let raw = self
            .adapter
            .run_immediate(move |conn| {
                Box::pin(async move { Ok(conn.zrange(&name, start, stop).await?) })
            })
            .await?;
        self.adapter.decode_all(raw)
    }

    /// All elements in ascending order.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn members(&self) -> Result<Vec<V>> {
        self.range(0, -1).await
    }

    /// The lowest-ranked element.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn first(&self) -> Result<Option<V>> {
        Ok(self.range(0, 0).await?.into_iter().next())
    }

    /// The highest-ranked element.
    ///
    /// # Errors
    ///
    /// Returns codec, flush or store failures.
    pub async fn last(&self) -> Result<Option<V>> {
        Ok(self.range(-1, -1).await?.into_iter().next())
    }

    /// Buffers the addition of `value` at its score. Re-adding a member
    /// moves it to the new score.
    ///
    /// # Errors
    ///
    /// Returns codec failures and failures of a flush this write triggers.
    pub async fn insert(&self, value: &V) -> Result<()> {
        let command = self.add_command(value)?;
        self.adapter.buffer(command).await
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
            .buffer(Command::ZRem {
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
        let batch = values
            .into_iter()
            .map(|value| self.add_command(value))
            .collect::<Result<Batch>>()?;
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
        let batch = values
            .into_iter()
            .map(|value| {
                Ok(Command::ZRem {
                    key: self.name().to_string(),
                    member: self.adapter.encode(value)?,
                })
            })
            .collect::<Result<Batch>>()?;
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
            for member in lease.zrange(name, 0, -1).await? {
                let value: V = self.adapter.decode(&member)?;
                if !keep(&value) {
                    batch.push(Command::ZRem {
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

    /// Removes the whole sorted set.
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

    fn add_command(&self, value: &V) -> Result<Command> {
        Ok(Command::ZAdd {
            key: self.name().to_string(),
            score: value.score(),
            member: self.adapter.encode(value)?,
        })
    }
}

impl<P: ConnectionPool, V, C: Codec> std::fmt::Debug for RemoteSortedSet<P, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSortedSet")
            .field("adapter", &self.adapter)
            .finish()
    }
}
