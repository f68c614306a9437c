//! Type-erased method handlers.

use arpc_codec::{CodecError, CodecType};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::resume_unwind;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Type alias for boxed futures
pub type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Encoded reply on success, the handler's error text on failure.
pub type InvokeResult = Result<Bytes, String>;

/// A decoded request bound to its handler, ready to run.
pub struct Invocation(BoxedFuture<InvokeResult>);

/// Trait for type-erased method handlers
pub(crate) trait Method: Send + Sync {
    /// Decode the argument and bind it, together with a fresh reply, to the
    /// handler.
    fn prepare(&self, codec: CodecType, body: &[u8]) -> Result<Invocation, CodecError>;
}

/// A registered method and its call counter.
pub struct MethodDescriptor {
    name: String,
    method: Box<dyn Method>,
    num_calls: AtomicU64,
}

impl MethodDescriptor {
    pub(crate) fn new(name: String, method: Box<dyn Method>) -> Self {
        Self {
            name,
            method,
            num_calls: AtomicU64::new(0),
        }
    }

    /// The method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times the method has been invoked.
    #[must_use]
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    /// Decode a request body for this method.
    pub(crate) fn prepare(&self, codec: CodecType, body: &[u8]) -> Result<Invocation, CodecError> {
        self.method.prepare(codec, body)
    }

    /// Run a prepared invocation.
    pub(crate) async fn invoke(&self, invocation: Invocation) -> InvokeResult {
        self.num_calls.fetch_add(1, Ordering::Relaxed);
        invocation.0.await
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("num_calls", &self.num_calls())
            .finish_non_exhaustive()
    }
}

/// Blocking handler filling a caller-provided reply.
///
/// Runs on the blocking pool since it may do arbitrary work.
pub(crate) struct SyncMethod<T, A, R, E, F> {
    pub(crate) instance: Arc<T>,
    pub(crate) handler: Arc<F>,
    pub(crate) _phantom: PhantomData<fn(A) -> (R, E)>,
}

impl<T, A, R, E, F> Method for SyncMethod<T, A, R, E, F>
where
    T: Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Default + Send + 'static,
    E: fmt::Display + 'static,
    F: Fn(&T, A, &mut R) -> Result<(), E> + Send + Sync + 'static,
{
    fn prepare(&self, codec: CodecType, body: &[u8]) -> Result<Invocation, CodecError> {
        let args: A = codec.decode(body)?;
        let instance = Arc::clone(&self.instance);
        let handler = Arc::clone(&self.handler);

        Ok(Invocation(Box::pin(async move {
            let joined = tokio::task::spawn_blocking(move || {
                let mut reply = R::default();
                (*handler)(&*instance, args, &mut reply)
                    .map(|()| reply)
                    .map_err(|e| e.to_string())
            })
            .await;

            match joined {
                Ok(Ok(reply)) => codec.encode(&reply).map_err(|e| e.to_string()),
                Ok(Err(e)) => Err(e),
                Err(e) if e.is_panic() => resume_unwind(e.into_panic()),
                Err(e) => Err(e.to_string()),
            }
        })))
    }
}

/// Async handler returning its reply.
pub(crate) struct AsyncMethod<T, A, F> {
    pub(crate) instance: Arc<T>,
    pub(crate) handler: Arc<F>,
    pub(crate) _phantom: PhantomData<fn(A)>,
}

impl<T, A, R, E, F, Fut> Method for AsyncMethod<T, A, F>
where
    T: Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display,
    F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    fn prepare(&self, codec: CodecType, body: &[u8]) -> Result<Invocation, CodecError> {
        let args: A = codec.decode(body)?;
        let fut = (self.handler)(Arc::clone(&self.instance), args);

        Ok(Invocation(Box::pin(async move {
            match fut.await {
                Ok(reply) => codec.encode(&reply).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        })))
    }
}
