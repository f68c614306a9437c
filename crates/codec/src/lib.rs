//! Frame codec for the aRPC wire protocol.
//!
//! A connection carries a repeating sequence of `Header` + body pairs. Each
//! header and each body travels as its own length-delimited frame, and the
//! frame payload is encoded with the body codec negotiated during the
//! handshake (see [`CodecType`]).
//!
//! Reading and writing are split so that one task can own the read half while
//! any number of tasks share the write half behind a lock:
//!
//! ```no_run
//! use arpc_codec::{CodecType, FrameReader, FrameWriter, Header};
//!
//! # async fn example(stream: tokio::net::TcpStream) -> arpc_codec::Result<()> {
//! let (read, write) = tokio::io::split(stream);
//! let mut reader = FrameReader::new(read, CodecType::Cbor);
//! let mut writer = FrameWriter::new(write, CodecType::Cbor);
//!
//! writer
//!     .write_header_and_body(&Header::new("Arith.Add", 1), &(2, 3))
//!     .await?;
//!
//! if let Some(header) = reader.read_header().await? {
//!     let sum: i64 = reader.read_body().await?;
//!     println!("{} -> {sum}", header.service_method);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod codec_type;
pub mod error;
pub mod framing;
pub mod header;

pub use codec_type::CodecType;
pub use error::{CodecError, Result};
pub use framing::{FrameReader, FrameWriter, MAX_FRAME_LENGTH};
pub use header::Header;
