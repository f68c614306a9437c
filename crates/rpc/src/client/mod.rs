//! RPC client: many concurrent calls multiplexed over one connection.

mod call;
mod dial;

pub use call::Call;
pub use dial::{dial, dial_http, xdial};

use call::{ReplySlot, TypedSlot};

use crate::error::{Error, Result};
use crate::handshake;
use crate::options::Options;

use arpc_codec::{FrameReader, FrameWriter, Header};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Bookkeeping guarded by the short-lived state lock.
struct ClientState {
    seq: u64,
    pending: HashMap<u64, Box<dyn ReplySlot>>,
    /// The user called [`Client::close`].
    closing: bool,
    /// The connection failed.
    shutdown: bool,
}

struct ClientInner {
    options: Options,
    /// Sending lock. Held for a whole header+body write so requests never
    /// interleave on the wire.
    writer: tokio::sync::Mutex<FrameWriter<BoxedWriter>>,
    state: Mutex<ClientState>,
    /// Stops the receive loop on close.
    cancel: CancellationToken,
}

impl ClientInner {
    /// Assign the next sequence number to a call.
    ///
    /// Hands the slot back if the client is closing or shut down.
    fn register_call(
        &self,
        slot: Box<dyn ReplySlot>,
    ) -> std::result::Result<u64, Box<dyn ReplySlot>> {
        let mut state = self.state.lock();
        if state.closing || state.shutdown {
            return Err(slot);
        }

        let seq = state.seq;
        state.pending.insert(seq, slot);
        state.seq += 1;
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<Box<dyn ReplySlot>> {
        self.state.lock().pending.remove(&seq)
    }

    /// Fail every pending call with `err` and refuse new ones.
    async fn terminate_calls(&self, err: &Error) {
        let _sending = self.writer.lock().await;
        let mut state = self.state.lock();
        state.shutdown = true;
        for (_, slot) in state.pending.drain() {
            slot.complete(Err(err.clone()));
        }
    }

    /// Register the call and write its request.
    ///
    /// Returns the assigned sequence number, or 0 when the call was completed
    /// with an error before reaching the wire. Closing the client interrupts
    /// a send that is waiting for the sending lock or stalled mid-write.
    async fn send(&self, service_method: &str, body: Bytes, slot: Box<dyn ReplySlot>) -> u64 {
        let writer = tokio::select! {
            () = self.cancel.cancelled() => None,
            writer = self.writer.lock() => Some(writer),
        };
        let Some(mut writer) = writer else {
            slot.complete(Err(Error::Shutdown));
            return 0;
        };

        let seq = match self.register_call(slot) {
            Ok(seq) => seq,
            Err(slot) => {
                slot.complete(Err(Error::Shutdown));
                return 0;
            }
        };

        let header = Header::new(service_method, seq);
        let written = tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Shutdown),
            result = writer.write_header_and_encoded_body(&header, body) => result.map_err(Error::from),
        };
        if let Err(e) = written {
            // The receive loop may have failed the call in the meantime.
            if let Some(slot) = self.remove_call(seq) {
                slot.complete(Err(e));
            }
        }

        seq
    }
}

/// Read responses and route them to their calls until the connection fails
/// or the client is closed.
async fn receive<R: AsyncRead + Unpin>(inner: Arc<ClientInner>, mut reader: FrameReader<R>) {
    let err = loop {
        let header = tokio::select! {
            () = inner.cancel.cancelled() => break Error::Shutdown,
            header = reader.read_header() => match header {
                Ok(Some(header)) => header,
                Ok(None) => break Error::ConnectionClosed,
                Err(e) => break e.into(),
            },
        };

        let slot = inner.remove_call(header.seq);

        let body = match reader.read_body_bytes().await {
            Ok(body) => body,
            Err(e) => {
                let err = Error::from(e);
                if let Some(slot) = slot {
                    slot.complete(Err(err.clone()));
                }
                break err;
            }
        };

        match slot {
            // Already failed by the writer or abandoned by a deadline.
            None => debug!("rpc client: discarding response for seq {}", header.seq),
            Some(slot) if header.is_error() => slot.complete(Err(Error::Remote(header.error))),
            Some(slot) => slot.complete(Ok(body)),
        }
    };

    debug!("rpc client: receive loop stopped: {}", err);
    inner.terminate_calls(&err).await;
}

/// An RPC client.
///
/// Any number of calls may be in flight at once; responses are matched to
/// calls by sequence number and may arrive in any order.
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Perform the handshake on `stream` and start the receive loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the options cannot be written.
    pub async fn new<S>(stream: S, options: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        handshake::write_options(&mut write_half, &options).await?;

        let codec = options.codec_type;
        let reader = FrameReader::new(read_half, codec);
        let writer: BoxedWriter = Box::pin(write_half);

        let inner = Arc::new(ClientInner {
            options,
            writer: tokio::sync::Mutex::new(FrameWriter::new(writer, codec)),
            state: Mutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(receive(Arc::clone(&inner), reader));

        Ok(Self { inner })
    }

    /// The options negotiated for this connection.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Whether new calls can still be issued.
    #[must_use]
    pub fn is_available(&self) -> bool {
        let state = self.inner.state.lock();
        !state.closing && !state.shutdown
    }

    /// Start a call without waiting for its reply.
    ///
    /// The request has been written (or the call has failed) when this
    /// returns; await the [`Call`] for the reply.
    pub async fn go<A, R>(&self, service_method: &str, args: &A) -> Call<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let codec = self.inner.options.codec_type;
        let (slot, done) = TypedSlot::<R>::new(codec);

        let seq = match codec.encode(args) {
            Ok(body) => {
                let inner = Arc::clone(&self.inner);
                let method = service_method.to_string();
                // Detached so a caller that stops waiting cannot leave half a
                // request on the wire.
                tokio::spawn(async move { inner.send(&method, body, Box::new(slot)).await })
                    .await
                    .unwrap_or(0)
            }
            Err(e) => {
                Box::new(slot).complete(Err(e.into()));
                0
            }
        };

        Call::new(service_method.to_string(), seq, done)
    }

    /// Call a method and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns the remote error, a transport error, or [`Error::Shutdown`].
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.go(service_method, args).await.await
    }

    /// Call a method, giving up after `timeout`.
    ///
    /// A call that times out is forgotten; a late reply is discarded and the
    /// client stays usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the deadline passes first, otherwise as
    /// [`call`](Self::call).
    pub async fn call_timeout<A, R>(
        &self,
        timeout: Duration,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let deadline = tokio::time::sleep(timeout);
        self.call_until(deadline, Error::Timeout(timeout), service_method, args)
            .await
    }

    /// Call a method, giving up when `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token fires first, otherwise as
    /// [`call`](Self::call).
    pub async fn call_with_cancel<A, R>(
        &self,
        token: &CancellationToken,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.call_until(token.cancelled(), Error::Cancelled, service_method, args)
            .await
    }

    async fn call_until<A, R, D>(
        &self,
        deadline: D,
        on_deadline: Error,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
        D: Future<Output = ()>,
    {
        let mut deadline = std::pin::pin!(deadline);

        // The request is still written in the background; its reply is
        // discarded.
        let call = tokio::select! {
            () = &mut deadline => {
                warn!("rpc client: {} abandoned before sending: {}", service_method, on_deadline);
                return Err(on_deadline);
            }
            call = self.go(service_method, args) => call,
        };
        let seq = call.seq();

        tokio::select! {
            () = deadline => {
                warn!("rpc client: {} (seq {}) abandoned: {}", service_method, seq, on_deadline);
                self.inner.remove_call(seq);
                Err(on_deadline)
            }
            result = call => result,
        }
    }

    /// Close the connection.
    ///
    /// Pending calls fail with [`Error::Shutdown`], including one whose
    /// request is stuck behind a peer that stopped reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] if the client was already closed, or the
    /// error from shutting down the stream.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.closing {
                return Err(Error::Shutdown);
            }
            state.closing = true;
        }

        self.inner.cancel.cancel();
        self.inner
            .writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(Into::into)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.inner.options)
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}
