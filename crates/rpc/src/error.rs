//! Error types for the RPC framework.

use arpc_codec::CodecError;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for RPC operations.
///
/// Callers tell causes apart through the variant or, for errors reported by
/// the remote side, through the message text. The type is `Clone` so one
/// terminal error can complete every call pending on a connection.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The client is closing or its connection has failed.
    #[error("connection is shut down")]
    Shutdown,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Codec errors during serialization/deserialization or framing.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A reply body arrived but could not be decoded.
    #[error("reading body {0}")]
    ReadingBody(CodecError),

    /// Error reported by the server in the response header.
    #[error("{0}")]
    Remote(String),

    /// Service or method lookup failed on the server.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// Invalid service registration.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The handshake was rejected.
    #[error("rpc handshake: {0}")]
    Handshake(String),

    /// The HTTP CONNECT tunnel could not be established.
    #[error("rpc tunnel: {0}")]
    Tunnel(String),

    /// Address is not in `protocol@addr` form.
    #[error("rpc client err: wrong format '{0}', expect protocol@addr")]
    InvalidAddress(String),

    /// Connecting (dial plus handshake) took too long.
    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    /// The caller's deadline passed before the response arrived.
    #[error("rpc client: call failed: deadline exceeded after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the call.
    #[error("rpc client: call failed: context canceled")]
    Cancelled,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl Error {
    /// Whether this is the shutdown error.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Whether the call ended because a deadline or cancellation won.
    #[must_use]
    pub const fn is_deadline(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Lookup failures for a `Service.Method` string.
///
/// These are per-request: the server reports them in the response header and
/// keeps the connection open.
#[derive(Clone, Debug, Error)]
pub enum NotFoundError {
    /// The string is not of the form `Service.Method`.
    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormed(String),

    /// No service with this name.
    #[error("rpc server: can't find service {0}")]
    Service(String),

    /// The service exists but has no such method.
    #[error("rpc server: can't find method {0}")]
    Method(String),
}

/// Invalid service registration. Fatal to the registration attempt only.
#[derive(Clone, Debug, Error)]
pub enum RegistrationError {
    /// Service names must be non-empty, exported and free of `.`.
    #[error("rpc server: {0:?} is not a valid service name")]
    InvalidServiceName(String),

    /// Method names must be non-empty, exported and free of `.`.
    #[error("rpc server: {0:?} is not a valid method name")]
    InvalidMethodName(String),

    /// A method with this name is already part of the service.
    #[error("rpc server: method already defined: {0}")]
    DuplicateMethod(String),

    /// A service with this name is already registered.
    #[error("rpc: service already defined: {0}")]
    DuplicateService(String),
}
