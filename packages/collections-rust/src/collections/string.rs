//! Remote append-only text.

use std::sync::Arc;

use remcoll_core::{CodecError, CodecPool, Command, Connection, ConnectionPool};

use super::to_len;
use crate::adapter::CollectionAdapter;
use crate::config::CollectionConfig;
use crate::error::{CollectionError, Result};

/// Text stored as raw UTF-8 under one store key.
///
/// Lengths and positions count characters, not bytes. A missing key reads as
/// the empty string except for positional reads, which report
/// [`CollectionError::AbsentValue`].
pub struct RemoteString<P: ConnectionPool> {
    adapter: CollectionAdapter<P>,
}

impl<P: ConnectionPool> RemoteString<P> {
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

    pub(crate) fn from_adapter(adapter: CollectionAdapter<P>) -> Self {
        Self { adapter }
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

    async fn read(&self) -> Result<Option<String>> {
        let name = self.adapter.shared_key();
        let raw = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.get(&name).await?) }))
            .await?;
        raw.map(|bytes| {
            let len = bytes.len();
            String::from_utf8(bytes)
                .map_err(|err| CollectionError::from(CodecError::decode("utf-8", len, err)))
        })
        .transpose()
    }

    async fn read_present(&self) -> Result<String> {
        self.read().await?.ok_or_else(|| CollectionError::AbsentValue {
            key: self.name().to_string(),
        })
    }

    /// The whole text, empty when the key is missing.
    ///
    /// # Errors
    ///
    /// Returns flush or store failures, or a codec error when the stored
    /// bytes are not UTF-8.
    pub async fn contents(&self) -> Result<String> {
        Ok(self.read().await?.unwrap_or_default())
    }

    /// Number of characters. 0 when the key is missing.
    ///
    /// # Errors
    ///
    /// See [`contents`](Self::contents).
    pub async fn len(&self) -> Result<usize> {
        Ok(self.read().await?.map_or(0, |text| text.chars().count()))
    }

    /// # Errors
    ///
    /// See [`contents`](Self::contents).
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Stored size in bytes, answered by the store without transferring the
    /// text.
    ///
    /// # Errors
    ///
    /// Returns flush or store failures.
    pub async fn byte_len(&self) -> Result<usize> {
        let name = self.adapter.shared_key();
        let len = self
            .adapter
            .run_immediate(move |conn| Box::pin(async move { Ok(conn.strlen(&name).await?) }))
            .await?;
        Ok(to_len(len))
    }

    /// The character at `index`.
    ///
    /// # Errors
    ///
    /// [`CollectionError::AbsentValue`] when the key is missing,
    /// [`CollectionError::OutOfRange`] when `index` is not below the length,
    /// plus the failures of [`contents`](Self::contents).
    pub async fn char_at(&self, index: usize) -> Result<char> {
        let text = self.read_present().await?;
        text.chars().nth(index).ok_or_else(|| CollectionError::OutOfRange {
            index,
            len: text.chars().count(),
        })
    }

    /// Characters `start..end`.
    ///
    /// # Errors
    ///
    /// [`CollectionError::AbsentValue`] when the key is missing,
    /// [`CollectionError::OutOfRange`] when `end` exceeds the length or
    /// `start` exceeds `end`, plus the failures of
    /// [`contents`](Self::contents).
    pub async fn substring(&self, start: usize, end: usize) -> Result<String> {
        let text = self.read_present().await?;
        let len = text.chars().count();
        if end > len {
            return Err(CollectionError::OutOfRange { index: end, len });
        }
        if start > end {
            return Err(CollectionError::OutOfRange { index: start, len });
        }
        Ok(text.chars().skip(start).take(end - start).collect())
    }

    /// Buffers appending `text`. Appending to a missing key creates it.
    ///
    /// # Errors
    ///
    /// Returns failures of a flush this write triggers.
    pub async fn append(&self, text: &str) -> Result<()> {
        self.adapter
            .buffer(Command::Append {
                key: self.name().to_string(),
                value: text.as_bytes().to_vec(),
            })
            .await
    }

    /// Removes the text.
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

impl<P: ConnectionPool> std::fmt::Debug for RemoteString<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteString")
            .field("key", &self.adapter.key())
            .field("config", self.adapter.config())
            .finish()
    }
}
