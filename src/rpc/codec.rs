//! Payload serialization between typed messages and frame bytes.
//!
//! The transport only carries opaque payload bytes; a [`Codec`] turns requests,
//! replies and one-way messages into those bytes and back. [`JsonCodec`] is the
//! default.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Pluggable payload format.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Encodes a message to bytes.
    ///
    /// # Errors
    /// [`CodecError::Encode`] if serialization fails.
    fn encode<T: Serialize + ?Sized>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decodes bytes to a message.
    ///
    /// # Errors
    /// [`CodecError::Decode`] if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using `serde_json`.
///
/// ```rust
/// use fleetvisor::{Codec, JsonCodec};
///
/// let bytes = JsonCodec.encode(&("status", 3u32)).unwrap();
/// assert_eq!(&bytes, br#"["status",3]"#);
/// let back: (String, u32) = JsonCodec.decode(&bytes).unwrap();
/// assert_eq!(back, ("status".to_string(), 3));
/// ```
#[derive(Clone, Copy, Default, Debug)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
