//! One-shot options exchange at the start of a connection.
//!
//! The options travel as a single length-prefixed JSON value, independent of
//! the codec they select. They are read byte-exactly so nothing that follows
//! is swallowed by a buffer.

use crate::error::{Error, Result};
use crate::options::{MAGIC_NUMBER, Options};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Largest accepted handshake payload.
const MAX_OPTIONS_LENGTH: u32 = 64 * 1024;

/// Write the options to a fresh connection.
///
/// # Errors
///
/// Returns an error if the options cannot be encoded or the write fails.
pub async fn write_options<W: AsyncWrite + Unpin>(writer: &mut W, options: &Options) -> Result<()> {
    let encoded = serde_json::to_vec(options).map_err(|e| Error::Handshake(e.to_string()))?;
    let length = u32::try_from(encoded.len())
        .map_err(|_| Error::Handshake(format!("options too large: {} bytes", encoded.len())))?;

    writer.write_u32(length).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;

    Ok(())
}

/// Read and validate the options sent by a client.
///
/// # Errors
///
/// Returns an error if the read fails, the value is malformed, or the magic
/// number does not match.
pub async fn read_options<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Options> {
    let length = reader.read_u32().await?;
    if length > MAX_OPTIONS_LENGTH {
        return Err(Error::Handshake(format!(
            "options size {length} exceeds maximum {MAX_OPTIONS_LENGTH}"
        )));
    }

    let mut buffer = vec![0u8; length as usize];
    reader.read_exact(&mut buffer).await?;

    let options: Options =
        serde_json::from_slice(&buffer).map_err(|e| Error::Handshake(e.to_string()))?;

    if options.magic_number != MAGIC_NUMBER {
        return Err(Error::Handshake(format!(
            "invalid magic number {:#x}",
            options.magic_number
        )));
    }

    debug!("handshake accepted: {:?}", options);

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arpc_codec::CodecType;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_options_exchange() {
        let (mut client, mut server) = duplex(1024);
        let options = Options::default()
            .with_codec_type(CodecType::Json)
            .with_handle_timeout(Duration::from_millis(250));

        write_options(&mut client, &options).await.unwrap();
        client.write_all(b"next frame").await.unwrap();

        assert_eq!(read_options(&mut server).await.unwrap(), options);

        let mut rest = [0u8; 10];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"next frame");
    }

    #[tokio::test]
    async fn test_bad_magic_number() {
        let (mut client, mut server) = duplex(1024);
        let options = Options {
            magic_number: 0x1234,
            ..Options::default()
        };

        write_options(&mut client, &options).await.unwrap();

        let err = read_options(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("invalid magic number 0x1234"));
    }

    #[tokio::test]
    async fn test_unsupported_codec_tag() {
        let (mut client, mut server) = duplex(1024);
        let json = br#"{"magic_number":3927900,"codec_type":"application/gob","connect_timeout":{"secs":0,"nanos":0},"handle_timeout":{"secs":0,"nanos":0}}"#;

        #[allow(clippy::cast_possible_truncation)]
        client.write_u32(json.len() as u32).await.unwrap();
        client.write_all(json).await.unwrap();

        assert!(matches!(
            read_options(&mut server).await,
            Err(Error::Handshake(_))
        ));
    }
}
