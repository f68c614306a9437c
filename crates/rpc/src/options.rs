//! Per-connection options exchanged in the handshake.

use arpc_codec::CodecType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sentinel that opens every handshake.
pub const MAGIC_NUMBER: u32 = 0x003b_ef5c;

/// Options sent by the client once, before the first request.
///
/// The server decodes headers and bodies with `codec_type` and bounds every
/// handler on the connection by `handle_timeout`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Options {
    /// Must equal [`MAGIC_NUMBER`].
    pub magic_number: u32,

    /// Codec for every frame after the handshake.
    pub codec_type: CodecType,

    /// Bound on dialing plus handshake. Zero means no limit.
    pub connect_timeout: Duration,

    /// Bound on each handler on the server. Zero means no limit.
    pub handle_timeout: Duration,
}

impl Options {
    /// Set the codec.
    #[must_use]
    pub const fn with_codec_type(mut self, codec_type: CodecType) -> Self {
        self.codec_type = codec_type;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the server-side handle timeout.
    #[must_use]
    pub const fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::default(),
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
        }
    }
}
