//! `MsgPack` codec backed by `rmp-serde`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{take_scratch, Codec, CodecError};

/// Encodes values as `MsgPack` with named struct fields
/// (`rmp_serde::encode::write_named`), so stored bytes stay readable when
/// fields are reordered.
#[derive(Debug, Default)]
pub struct MsgPackCodec {
    scratch: Vec<u8>,
}

impl Codec for MsgPackCodec {
    const NAME: &'static str = "msgpack";

    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<Vec<u8>, CodecError> {
        self.scratch.clear();
        match rmp_serde::encode::write_named(&mut self.scratch, value) {
            Ok(()) => Ok(take_scratch(&mut self.scratch)),
            Err(err) => {
                self.scratch.clear();
                Err(CodecError::encode(Self::NAME, err))
            }
        }
    }

    fn decode<T: DeserializeOwned>(&mut self, bytes: &[u8]) -> Result<T, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|err| CodecError::decode(Self::NAME, bytes.len(), err))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        label: String,
    }

    #[test]
    fn struct_round_trip() {
        let mut codec = MsgPackCodec::default();
        let point = Point { x: 7, label: "seven".to_string() };
        let bytes = codec.encode(&point).unwrap();
        let decoded: Point = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, point);
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut codec = MsgPackCodec::default();
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 1);
        let first = codec.encode(&map).unwrap();
        let second = codec.encode(&map).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn scratch_does_not_leak_between_calls() {
        let mut codec = MsgPackCodec::default();
        let long = codec.encode("a much longer string value").unwrap();
        let short = codec.encode("x").unwrap();
        assert!(short.len() < long.len());
        let decoded: String = codec.decode(&short).unwrap();
        assert_eq!(decoded, "x");
    }

    #[test]
    fn decoding_wrong_type_fails() {
        let mut codec = MsgPackCodec::default();
        let bytes = codec.encode("text").unwrap();
        let err = codec.decode::<u64>(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }
}
