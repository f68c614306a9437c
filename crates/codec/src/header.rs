//! Request/response header.

use serde::{Deserialize, Serialize};

/// Header sent in front of every body.
///
/// On a request it names the method and carries the sequence chosen by the
/// client. On a response it echoes both, and `error` is non-empty when the
/// body is a placeholder instead of a reply.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Header {
    /// Target method, formatted as `Service.Method`.
    pub service_method: String,

    /// Sequence number chosen by the client.
    pub seq: u64,

    /// Remote error, empty on success.
    pub error: String,
}

impl Header {
    /// Creates a request header.
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Returns a copy of this header carrying `error`.
    #[must_use]
    pub fn with_error(&self, error: impl Into<String>) -> Self {
        Self {
            service_method: self.service_method.clone(),
            seq: self.seq,
            error: error.into(),
        }
    }

    /// Whether this header reports a remote error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
