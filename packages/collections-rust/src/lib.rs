//! remcoll: map, set, sorted set and string collections persisted in a
//! remote key-value store, with per-instance write batching.
//!
//! Writes are buffered on the instance that issued them and sent in one
//! round trip when the batch reaches its threshold, when the quiet period
//! after the batch opened elapses, when the caller asks for [`sync`], or
//! before any read on that instance. Reads therefore always observe the
//! instance's own earlier writes.
//!
//! [`sync`]: RemoteMap::sync

pub mod adapter;
pub mod batch;
pub mod builder;
pub mod collections;
pub mod config;
pub mod error;

pub use adapter::{CollectionAdapter, ConnFuture, ImmediateLease};
pub use batch::{BatchGuard, BatchManager};
pub use builder::CollectionBuilder;
pub use collections::{RemoteMap, RemoteSet, RemoteSortedSet, RemoteString, Scored};
pub use config::{CollectionConfig, DEFAULT_DELAY_BEFORE_SYNC, DEFAULT_MAX_WITHOUT_SYNC};
pub use error::{CollectionError, Result};

pub use remcoll_core::{
    Codec, CodecPool, Connection, ConnectionPool, JsonCodec, MemoryPool, MemoryStore, MsgPackCodec,
    StoreError,
};
