//! JSON codec backed by `serde_json`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{take_scratch, Codec, CodecError};

/// Encodes values as compact JSON. Larger than [`MsgPackCodec`](super::MsgPackCodec)
/// but readable with generic store tooling.
#[derive(Debug, Default)]
pub struct JsonCodec {
    scratch: Vec<u8>,
}

impl Codec for JsonCodec {
    const NAME: &'static str = "json";

    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<Vec<u8>, CodecError> {
        self.scratch.clear();
        match serde_json::to_writer(&mut self.scratch, value) {
            Ok(()) => Ok(take_scratch(&mut self.scratch)),
            Err(err) => {
                self.scratch.clear();
                Err(CodecError::encode(Self::NAME, err))
            }
        }
    }

    fn decode<T: DeserializeOwned>(&mut self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|err| CodecError::decode(Self::NAME, bytes.len(), err))
    }
}
