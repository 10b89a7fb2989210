//! `remcoll` core: codecs, codec pooling, and the store protocol consumed by
//! the remote collections.

pub mod codec;
pub mod store;

pub use codec::{Codec, CodecError, CodecPool, JsonCodec, MsgPackCodec, PooledCodec};
pub use store::{
    Batch, Command, Connection, ConnectionPool, MemoryConnection, MemoryPool, MemoryStore,
    PoolStats, StoreError, StoreResult, StoreStats,
};
