//! Header/body framing over a byte stream.

use crate::codec_type::CodecType;
use crate::error::{CodecError, Result};
use crate::header::Header;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::warn;

/// Maximum frame size (10MB by default).
pub const MAX_FRAME_LENGTH: usize = 10 * 1024 * 1024;

fn length_delimited(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Read half of a connection.
///
/// Every header is followed by exactly one body frame. Callers must consume
/// that body with [`read_body`](Self::read_body),
/// [`read_body_bytes`](Self::read_body_bytes) or
/// [`discard_body`](Self::discard_body) before reading the next header.
pub struct FrameReader<R> {
    frames: FramedRead<R, LengthDelimitedCodec>,
    codec: CodecType,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader decoding with `codec`.
    pub fn new(reader: R, codec: CodecType) -> Self {
        Self {
            frames: FramedRead::new(reader, length_delimited(MAX_FRAME_LENGTH)),
            codec,
        }
    }

    /// Set a custom max frame length.
    #[must_use]
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.frames
            .decoder_mut()
            .set_max_frame_length(max_frame_length);
        self
    }

    /// The negotiated body codec.
    pub const fn codec(&self) -> CodecType {
        self.codec
    }

    async fn next_frame(&mut self) -> Result<Option<BytesMut>> {
        match self.frames.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            // A frame cut short by the end of the stream.
            Some(Err(e))
                if e.kind() == io::ErrorKind::Other && !self.frames.read_buffer().is_empty() =>
            {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, e).into())
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Read the next header.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly between two
    /// frames.
    ///
    /// # Errors
    ///
    /// Returns an error on any I/O failure or if the frame is not a header.
    /// Either way the connection can no longer be used.
    pub async fn read_header(&mut self) -> Result<Option<Header>> {
        match self.next_frame().await? {
            Some(frame) => self.codec.decode(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Read the raw body frame that follows a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or ends before the body.
    pub async fn read_body_bytes(&mut self) -> Result<Bytes> {
        self.next_frame()
            .await?
            .map(BytesMut::freeze)
            .ok_or(CodecError::MissingBody)
    }

    /// Read and decode the body that follows a header.
    ///
    /// The body frame is consumed even when decoding fails, so the stream
    /// stays aligned on the next header.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or the body does not decode as `T`.
    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        let body = self.read_body_bytes().await?;
        self.codec.decode(&body)
    }

    /// Consume the body that follows a header without decoding it.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or ends before the body.
    pub async fn discard_body(&mut self) -> Result<()> {
        self.read_body_bytes().await.map(drop)
    }
}

/// Write half of a connection.
///
/// A header and its body are flushed together. The writer does not lock
/// itself: callers sharing it must serialize access so that frames from
/// different writers never interleave.
pub struct FrameWriter<W> {
    frames: FramedWrite<W, LengthDelimitedCodec>,
    codec: CodecType,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Create a writer encoding with `codec`.
    pub fn new(writer: W, codec: CodecType) -> Self {
        Self {
            frames: FramedWrite::new(writer, length_delimited(MAX_FRAME_LENGTH)),
            codec,
        }
    }

    /// Set a custom max frame length.
    #[must_use]
    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.frames
            .encoder_mut()
            .set_max_frame_length(max_frame_length);
        self
    }

    /// The negotiated body codec.
    pub const fn codec(&self) -> CodecType {
        self.codec
    }

    /// Encode `body` and write it after `header`.
    ///
    /// Nothing reaches the stream when encoding fails.
    ///
    /// # Errors
    ///
    /// Returns an error if either value fails to encode or the write fails.
    /// A failed write closes the stream.
    pub async fn write_header_and_body<T: Serialize + ?Sized>(
        &mut self,
        header: &Header,
        body: &T,
    ) -> Result<()> {
        let body = self.codec.encode(body)?;
        self.write_header_and_encoded_body(header, body).await
    }

    /// Write `header` followed by a body that is already encoded with this
    /// writer's codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the header fails to encode or the write fails.
    /// A failed write closes the stream.
    pub async fn write_header_and_encoded_body(
        &mut self,
        header: &Header,
        body: Bytes,
    ) -> Result<()> {
        let header_bytes = self.codec.encode(header)?;

        if let Err(e) = self.write_pair(header_bytes, body).await {
            warn!("Error writing frame for {}: {}", header.service_method, e);
            let _ = self.close().await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn write_pair(&mut self, header: Bytes, body: Bytes) -> io::Result<()> {
        self.frames.feed(header).await?;
        self.frames.feed(body).await?;
        SinkExt::<Bytes>::flush(&mut self.frames).await
    }

    /// Flush and shut down the write side of the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or shutting down fails.
    pub async fn close(&mut self) -> Result<()> {
        SinkExt::<Bytes>::close(&mut self.frames)
            .await
            .map_err(Into::into)
    }

    /// Shut down the write side of the stream, dropping any frame bytes an
    /// abandoned write left in the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if shutting down fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.frames.write_buffer_mut().clear();
        self.frames.get_mut().shutdown().await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_header_body_pairs_in_order() {
        let (client, server) = duplex(4096);
        let mut writer = FrameWriter::new(client, CodecType::Cbor);
        let mut reader = FrameReader::new(server, CodecType::Cbor);

        writer
            .write_header_and_body(&Header::new("Arith.Add", 1), &(2_i64, 3_i64))
            .await
            .unwrap();
        writer
            .write_header_and_body(&Header::new("Echo.Say", 2), "hello")
            .await
            .unwrap();

        let first = reader.read_header().await.unwrap().unwrap();
        assert_eq!(first.seq, 1);
        let args: (i64, i64) = reader.read_body().await.unwrap();
        assert_eq!(args, (2, 3));

        let second = reader.read_header().await.unwrap().unwrap();
        assert_eq!(second.service_method, "Echo.Say");
        let said: String = reader.read_body().await.unwrap();
        assert_eq!(said, "hello");
    }

    #[tokio::test]
    async fn test_discarded_and_undecodable_bodies_keep_alignment() {
        let (client, server) = duplex(4096);
        let mut writer = FrameWriter::new(client, CodecType::Json);
        let mut reader = FrameReader::new(server, CodecType::Json);

        writer
            .write_header_and_body(&Header::new("A.B", 1), &vec![1, 2, 3])
            .await
            .unwrap();
        writer
            .write_header_and_body(&Header::new("A.C", 2), "not a number")
            .await
            .unwrap();
        writer
            .write_header_and_body(&Header::new("A.D", 3), &7_u32)
            .await
            .unwrap();

        reader.read_header().await.unwrap().unwrap();
        reader.discard_body().await.unwrap();

        reader.read_header().await.unwrap().unwrap();
        assert!(reader.read_body::<u32>().await.is_err());

        let third = reader.read_header().await.unwrap().unwrap();
        assert_eq!(third.seq, 3);
        assert_eq!(reader.read_body::<u32>().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_clean_eof_and_missing_body() {
        let (client, server) = duplex(4096);
        let mut writer = FrameWriter::new(client, CodecType::Bincode);
        let mut reader = FrameReader::new(server, CodecType::Bincode);

        writer.close().await.unwrap();
        assert!(reader.read_header().await.unwrap().is_none());

        let (mut client, server) = duplex(4096);
        let mut reader = FrameReader::new(server, CodecType::Bincode);
        let header = CodecType::Bincode.encode(&Header::new("A.B", 1)).unwrap();
        #[allow(clippy::cast_possible_truncation)]
        client.write_u32(header.len() as u32).await.unwrap();
        client.write_all(&header).await.unwrap();
        client.shutdown().await.unwrap();

        assert!(reader.read_header().await.unwrap().is_some());
        assert!(matches!(
            reader.read_body_bytes().await,
            Err(CodecError::MissingBody)
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_eof() {
        let (mut client, server) = duplex(4096);
        let mut reader = FrameReader::new(server, CodecType::Cbor);

        client.write_u32(64).await.unwrap();
        client.write_all(b"short").await.unwrap();
        client.shutdown().await.unwrap();

        let err = reader.read_header().await.unwrap_err();
        assert!(err.is_eof(), "{err}");
    }

    #[tokio::test]
    async fn test_shutdown_drops_buffered_bytes() {
        let (client, mut server) = duplex(4096);
        let mut writer = FrameWriter::new(client, CodecType::Json);

        writer
            .write_header_and_body(&Header::new("Echo.Say", 1), "hi")
            .await
            .unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = FrameReader::new(&mut server, CodecType::Json);
        assert_eq!(reader.read_header().await.unwrap().unwrap().seq, 1);
        assert_eq!(reader.read_body::<String>().await.unwrap(), "hi");
        assert!(reader.read_header().await.unwrap().is_none());
    }

    proptest::proptest! {
        #[test]
        fn prop_discarding_any_body_keeps_alignment(
            bodies in proptest::collection::vec(proptest::collection::vec(proptest::num::u8::ANY, 0..256), 1..16),
            keep in proptest::num::usize::ANY,
        ) {
            tokio_test::block_on(async {
                let (client, server) = duplex(64 * 1024);
                let mut writer = FrameWriter::new(client, CodecType::Bincode);
                let mut reader = FrameReader::new(server, CodecType::Bincode);
                let keep = keep % bodies.len();

                for (seq, body) in (1..).zip(&bodies) {
                    writer
                        .write_header_and_body(&Header::new("Blob.Put", seq), body)
                        .await
                        .unwrap();
                }
                writer.close().await.unwrap();

                for (seq, body) in (1..).zip(&bodies) {
                    let header = reader.read_header().await.unwrap().unwrap();
                    assert_eq!(header.seq, seq);
                    if seq as usize == keep + 1 {
                        assert_eq!(&reader.read_body::<Vec<u8>>().await.unwrap(), body);
                    } else {
                        reader.discard_body().await.unwrap();
                    }
                }
                assert!(reader.read_header().await.unwrap().is_none());
            });
        }
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let (client, server) = duplex(4096);
        let mut writer = FrameWriter::new(client, CodecType::Cbor);
        let mut reader = FrameReader::new(server, CodecType::Cbor).with_max_frame_length(64);

        writer
            .write_header_and_body(&Header::new("Echo.Say", 1), &"x".repeat(200))
            .await
            .unwrap();

        reader.read_header().await.unwrap().unwrap();
        let err = reader.read_body_bytes().await.unwrap_err();
        assert!(err.is_io());
    }
}
