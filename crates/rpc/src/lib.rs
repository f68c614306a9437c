//! aRPC: call methods on remote services over a single stream connection.
//!
//! A [`Client`] multiplexes any number of concurrent calls over one
//! connection, matching responses to calls by sequence number. A [`Server`]
//! resolves each request to a registered [`Service`] method, runs it on its
//! own task and writes the response back, optionally bounding the handler by
//! a per-connection timeout.
//!
//! ```no_run
//! use arpc::{Options, Server, ServiceBuilder};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! struct Arith;
//!
//! # async fn example() -> arpc::Result<()> {
//! let server = Arc::new(Server::default());
//! server.register(
//!     ServiceBuilder::new(Arith)?
//!         .method("Add", |_: &Arith, args: (i64, i64), reply: &mut i64| {
//!             *reply = args.0 + args.1;
//!             Ok::<(), String>(())
//!         })?
//!         .build(),
//! )?;
//!
//! let listener = TcpListener::bind("127.0.0.1:0").await?;
//! let addr = listener.local_addr()?;
//! tokio::spawn(Arc::clone(&server).accept(listener));
//!
//! let client = arpc::dial(addr, Options::default()).await?;
//! let sum: i64 = client.call("Arith.Add", &(2, 3)).await?;
//! assert_eq!(sum, 5);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod handshake;
pub mod options;
pub mod registry;
pub mod server;
pub mod tunnel;

pub use arpc_codec::{CodecType, Header};
pub use client::{Call, Client, dial, dial_http, xdial};
pub use error::{Error, NotFoundError, RegistrationError, Result};
pub use options::{MAGIC_NUMBER, Options};
pub use registry::{MethodDescriptor, Service, ServiceBuilder};
pub use server::{Server, ServerConfig};
pub use tokio_util::sync::CancellationToken;
