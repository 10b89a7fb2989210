//! Key/value codecs and codec pooling.
//!
//! A [`Codec`] turns serde values into store-compatible byte sequences and
//! back. Codec instances keep a scratch buffer between calls, so they are not
//! shared between tasks; callers check one out of a [`CodecPool`] for the
//! duration of a single encode or decode.
//!
//! Two implementations are provided:
//!
//! - [`MsgPackCodec`]: `MsgPack` via `rmp-serde` with named struct fields (default)
//! - [`JsonCodec`]: JSON via `serde_json`

mod json;
mod msgpack;
mod pool;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
pub use pool::{CodecPool, PooledCodec};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Boxed underlying cause of a codec failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Scratch buffers larger than this are released instead of being retained
/// by a pooled codec instance.
pub(crate) const MAX_RETAINED_SCRATCH: usize = 64 * 1024;

/// Errors raised while converting values to or from bytes.
///
/// Always wraps the underlying serializer error as its `source`.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{codec} codec failed to encode value")]
    Encode {
        codec: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("{codec} codec failed to decode {len} bytes")]
    Decode {
        codec: &'static str,
        len: usize,
        #[source]
        source: BoxError,
    },
}

impl CodecError {
    /// Wraps an encoder failure.
    pub fn encode(codec: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Encode {
            codec,
            source: source.into(),
        }
    }

    /// Wraps a decoder failure for an input of `len` bytes.
    pub fn decode(codec: &'static str, len: usize, source: impl Into<BoxError>) -> Self {
        Self::Decode {
            codec,
            len,
            source: source.into(),
        }
    }
}

/// Pluggable value ⇄ bytes conversion.
///
/// `encode` must be deterministic within one process: the same value always
/// yields the same bytes, because encoded bytes are used as hash fields and
/// set members. `decode` must be the left inverse of `encode` for every value
/// written through the collections.
///
/// Instances are constructed through [`Default`] by [`CodecPool`] and may hold
/// mutable scratch state, hence `&mut self`.
pub trait Codec: Default + Send + 'static {
    /// Short name used in error messages and logs.
    const NAME: &'static str;

    /// Encodes `value` into a fresh byte vector.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value cannot be represented.
    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decodes a value previously produced by [`encode`](Codec::encode).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] for malformed or mismatched input.
    fn decode<T: DeserializeOwned>(&mut self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Hands the encoded scratch buffer out and leaves a fresh one sized for the
/// next value of similar length. Nothing is reserved after an oversized value.
pub(crate) fn take_scratch(scratch: &mut Vec<u8>) -> Vec<u8> {
    let out = std::mem::take(scratch);
    if out.len() <= MAX_RETAINED_SCRATCH {
        scratch.reserve_exact(out.len());
    }
    out
}
