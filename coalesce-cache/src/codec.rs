//! Serialization of fetched values into stored bytes.

use coalesce_core::CodecError;
use serde::{de::DeserializeOwned, Serialize};

/// Lossless codec for stored values.
///
/// `decode(encode(v))` must reproduce `v` exactly. A value the format cannot
/// represent faithfully is refused by `encode` with [`CodecError::Encode`],
/// and bytes that cannot be turned back into a `T` yield
/// [`CodecError::Decode`]. Neither side may substitute a different value.
pub trait ValueCodec: Send + Sync + 'static {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + DeserializeOwned + PartialEq;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`. The default for every getter.
///
/// JSON collapses several distinct values onto `null`: non-finite floats,
/// `Some(None)` and `Some(())` all serialize that way and read back as
/// `None`. `encode` therefore decodes its own output and refuses any value
/// that does not come back equal. Values holding NaN never compare equal
/// and are always refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + DeserializeOwned + PartialEq,
    {
        let bytes = serde_json::to_vec(value).map_err(CodecError::encode)?;
        match serde_json::from_slice::<T>(&bytes) {
            Ok(decoded) if decoded == *value => Ok(bytes),
            Ok(_) => Err(CodecError::encode("value does not survive a JSON round trip")),
            Err(err) => Err(CodecError::encode(format!(
                "value does not survive a JSON round trip: {}",
                err
            ))),
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::decode)
    }
}
