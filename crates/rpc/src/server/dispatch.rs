//! Per-connection request dispatch.

use super::Server;
use crate::handshake;
use crate::options::Options;
use crate::registry::{Invocation, MethodDescriptor};

use arpc_codec::{CodecError, FrameReader, FrameWriter, Header};
use bytes::Bytes;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument, warn};

type SharedWriter<W> = Arc<Mutex<FrameWriter<W>>>;

/// Writes the single response for one request.
///
/// Whoever writes first (the handler or the timeout) wins; any later attempt
/// is dropped.
struct Responder<W> {
    header: Header,
    writer: SharedWriter<W>,
    responded: AtomicBool,
}

impl<W: AsyncWrite + Unpin> Responder<W> {
    const fn new(header: Header, writer: SharedWriter<W>) -> Self {
        Self {
            header,
            writer,
            responded: AtomicBool::new(false),
        }
    }

    async fn respond(&self, error: Option<String>, body: Bytes) {
        let mut writer = self.writer.lock().await;
        if self.responded.swap(true, Ordering::AcqRel) {
            debug!(
                "rpc server: dropping late response for {} (seq {})",
                self.header.service_method, self.header.seq
            );
            return;
        }

        let header = match error {
            Some(error) => self.header.with_error(error),
            None => self.header.clone(),
        };
        if let Err(e) = writer.write_header_and_encoded_body(&header, body).await {
            error!("rpc server: write response error: {}", e);
        }
    }
}

/// Handshake, then serve requests on `stream`.
pub(super) async fn serve_conn<S>(server: Arc<Server>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, write_half) = tokio::io::split(stream);

    let options = match handshake::read_options(&mut read_half).await {
        Ok(options) => options,
        Err(e) => {
            error!("rpc server: options error: {}", e);
            return;
        }
    };

    let max_frame_length = server.config().max_frame_length;
    let reader =
        FrameReader::new(read_half, options.codec_type).with_max_frame_length(max_frame_length);
    let writer =
        FrameWriter::new(write_half, options.codec_type).with_max_frame_length(max_frame_length);

    serve_codec(server, reader, writer, options).await;
}

/// Read requests until the stream ends, dispatching each to its own task.
///
/// Waits for every dispatched request before closing the writer.
#[instrument(skip_all, fields(codec = %options.codec_type))]
async fn serve_codec<R, W>(
    server: Arc<Server>,
    mut reader: FrameReader<R>,
    writer: FrameWriter<W>,
    options: Options,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let codec = reader.codec();
    let placeholder = match codec.encode(&()) {
        Ok(placeholder) => placeholder,
        Err(e) => {
            error!("rpc server: cannot encode placeholder body: {}", e);
            return;
        }
    };

    let writer = Arc::new(Mutex::new(writer));
    let tracker = TaskTracker::new();

    loop {
        let header = match reader.read_header().await {
            Ok(Some(header)) => header,
            Ok(None) => {
                debug!("rpc server: client closed the connection");
                break;
            }
            Err(e) if e.is_eof() => {
                debug!("rpc server: connection ended mid-frame: {}", e);
                break;
            }
            Err(e) => {
                error!("rpc server: read header error: {}", e);
                break;
            }
        };

        let method = match server.find(&header.service_method) {
            Ok((_, method)) => method,
            Err(e) => {
                warn!("{}", e);
                if let Err(e) = reader.discard_body().await {
                    log_read_body_error(&e);
                    break;
                }

                let mut writer = writer.lock().await;
                let header = header.with_error(e.to_string());
                if let Err(e) = writer
                    .write_header_and_encoded_body(&header, placeholder.clone())
                    .await
                {
                    error!("rpc server: write response error: {}", e);
                }
                continue;
            }
        };

        let body = match reader.read_body_bytes().await {
            Ok(body) => body,
            Err(e) => {
                log_read_body_error(&e);
                break;
            }
        };

        let invocation = match method.prepare(codec, &body) {
            Ok(invocation) => invocation,
            Err(e) => {
                error!("rpc server: read argv err: {}", e);
                break;
            }
        };

        let responder = Arc::new(Responder::new(header, Arc::clone(&writer)));
        tracker.spawn(handle_request(
            responder,
            method,
            invocation,
            options.handle_timeout,
            placeholder.clone(),
        ));
    }

    tracker.close();
    tracker.wait().await;

    if let Err(e) = writer.lock().await.close().await {
        debug!("rpc server: close error: {}", e);
    }
}

fn log_read_body_error(e: &CodecError) {
    if e.is_eof() {
        debug!("rpc server: connection ended before the body: {}", e);
    } else {
        error!("rpc server: read body error: {}", e);
    }
}

/// Run one request, bounded by `handle_timeout` (zero means unbounded).
///
/// The handler runs on its own task. On timeout an error response is sent at
/// once and the handler's eventual response is dropped.
async fn handle_request<W>(
    responder: Arc<Responder<W>>,
    method: Arc<MethodDescriptor>,
    invocation: Invocation,
    handle_timeout: Duration,
    placeholder: Bytes,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (called_tx, called_rx) = oneshot::channel::<()>();
    let (sent_tx, sent_rx) = oneshot::channel::<()>();

    let worker_responder = Arc::clone(&responder);
    let worker_placeholder = placeholder.clone();
    tokio::spawn(async move {
        let outcome = AssertUnwindSafe(method.invoke(invocation))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(format!("rpc server: method {} panicked", method.name())));
        let _ = called_tx.send(());

        match outcome {
            Ok(reply) => worker_responder.respond(None, reply).await,
            Err(e) => {
                error!("rpc server: {} failed: {}", method.name(), e);
                worker_responder.respond(Some(e), worker_placeholder).await;
            }
        }
        let _ = sent_tx.send(());
    });

    if handle_timeout.is_zero() {
        let _ = called_rx.await;
        let _ = sent_rx.await;
        return;
    }

    tokio::select! {
        () = tokio::time::sleep(handle_timeout) => {
            let message = format!(
                "rpc server: request handle timeout: expect within {handle_timeout:?}"
            );
            warn!("{}", message);
            responder.respond(Some(message), placeholder).await;
        }
        _ = called_rx => {
            let _ = sent_rx.await;
        }
    }
}
