//! Body codecs selectable by the handshake.

use crate::error::{CodecError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::str::FromStr;

/// Encoding applied to headers and bodies once the handshake has completed.
///
/// The tag strings are what travels in the handshake.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum CodecType {
    /// CBOR via ciborium.
    #[default]
    #[serde(rename = "application/cbor")]
    Cbor,

    /// bincode.
    #[serde(rename = "application/bincode")]
    Bincode,

    /// JSON via `serde_json`.
    #[serde(rename = "application/json")]
    Json,
}

impl CodecType {
    /// Every supported codec.
    pub const ALL: [Self; 3] = [Self::Cbor, Self::Bincode, Self::Json];

    /// The tag string used in the handshake.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cbor => "application/cbor",
            Self::Bincode => "application/bincode",
            Self::Json => "application/json",
        }
    }

    /// Encode a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Bytes> {
        let vec = match self {
            Self::Cbor => {
                let mut vec = Vec::new();
                ciborium::ser::into_writer(value, &mut vec)?;
                vec
            }
            Self::Bincode => bincode::serialize(value)?,
            Self::Json => serde_json::to_vec(value)
                .map_err(|e| CodecError::SerializationFailed(e.to_string()))?,
        };
        Ok(Bytes::from(vec))
    }

    /// Decode a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not a valid encoding of `T`.
    pub fn decode<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            Self::Cbor => Ok(ciborium::de::from_reader(data)?),
            Self::Bincode => bincode::deserialize(data)
                .map_err(|e| CodecError::DeserializationFailed(e.to_string())),
            Self::Json => serde_json::from_slice(data)
                .map_err(|e| CodecError::DeserializationFailed(e.to_string())),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.as_str() == s)
            .ok_or_else(|| CodecError::UnsupportedCodec(s.to_string()))
    }
}
