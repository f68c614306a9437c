//! Method registry.
//!
//! Services are built from typed handlers and erased behind a common method
//! trait, so the dispatcher can decode an argument, invoke, and encode the
//! reply without knowing the concrete types.

mod method;
mod service;

pub(crate) use method::Invocation;
pub use method::{BoxedFuture, InvokeResult, MethodDescriptor};
pub use service::{Service, ServiceBuilder};
