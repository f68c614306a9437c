//! In-flight calls.

use crate::error::{Error, Result};

use arpc_codec::CodecType;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Completion side of a pending call, erased over the reply type.
pub(crate) trait ReplySlot: Send {
    /// Deliver the raw reply body or the call's error. Consumes the slot, so
    /// a call completes at most once.
    fn complete(self: Box<Self>, outcome: Result<Bytes>);
}

/// Slot decoding the body into `R` before handing it to the caller.
pub(crate) struct TypedSlot<R> {
    codec: CodecType,
    tx: oneshot::Sender<Result<R>>,
}

impl<R> TypedSlot<R> {
    pub(crate) fn new(codec: CodecType) -> (Self, oneshot::Receiver<Result<R>>) {
        let (tx, rx) = oneshot::channel();
        (Self { codec, tx }, rx)
    }
}

impl<R: DeserializeOwned + Send> ReplySlot for TypedSlot<R> {
    fn complete(self: Box<Self>, outcome: Result<Bytes>) {
        let reply = outcome.and_then(|body| self.codec.decode(&body).map_err(Error::ReadingBody));
        // The caller may have given up on the call already.
        let _ = self.tx.send(reply);
    }
}

/// An asynchronous call.
///
/// Resolves once, with the decoded reply or the call's error. A call that
/// could not be registered has sequence number 0 and resolves immediately.
#[must_use = "calls do nothing unless awaited"]
pub struct Call<R> {
    service_method: String,
    seq: u64,
    done: oneshot::Receiver<Result<R>>,
}

impl<R> Call<R> {
    pub(crate) const fn new(
        service_method: String,
        seq: u64,
        done: oneshot::Receiver<Result<R>>,
    ) -> Self {
        Self {
            service_method,
            seq,
            done,
        }
    }

    /// The `Service.Method` this call targets.
    #[must_use]
    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// The sequence number assigned by the client.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

impl<R> Future for Call<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.done)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Shutdown)))
    }
}

impl<R> std::fmt::Debug for Call<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("service_method", &self.service_method)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
