//! Error types for the frame codec.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while encoding, decoding or moving frames.
///
/// The type is `Clone` so a single terminal error can be handed to every
/// caller waiting on a connection.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to serialize: {0}")]
    SerializationFailed(String),

    /// Deserialization failed.
    #[error("Failed to deserialize: {0}")]
    DeserializationFailed(String),

    /// Unsupported codec type.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// The stream ended between a header and its body.
    #[error("Stream ended before the body frame")]
    MissingBody,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl CodecError {
    /// Whether the error came from the underlying stream rather than from a
    /// value that failed to (de)serialize.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::MissingBody)
    }

    /// Whether the stream ended partway through a header/body pair.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        match self {
            Self::MissingBody => true,
            Self::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<ciborium::de::Error<io::Error>> for CodecError {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        Self::DeserializationFailed(err.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for CodecError {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}
