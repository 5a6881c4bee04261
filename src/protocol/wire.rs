//! Frame codec for the gate socket.
//!
//! Frames are length-prefixed: [4 bytes big-endian u32][payload]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{GateError, ProtocolErrorKind};

/// Default frame size limit (1 MB); request bodies count toward it after base64.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;

/// Read one frame, returning its payload.
///
/// A clean EOF before the length prefix reports `ConnectionClosed`; a declared
/// length above `max_size` is rejected before any payload is buffered.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, GateError>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(GateError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            });
        }
        Err(e) => return Err(GateError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(GateError::Protocol {
            kind: ProtocolErrorKind::MessageTooLarge {
                size: len,
                max: max_size,
            },
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<(), GateError>
where
    W: AsyncWriteExt + Unpin,
{
    let len = u32::try_from(data.len()).map_err(|_| GateError::Protocol {
        kind: ProtocolErrorKind::MessageTooLarge {
            size: data.len(),
            max: u32::MAX as usize,
        },
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame, failing with `ConnectionTimeout` after `timeout_duration`.
pub async fn read_frame_with_timeout<R>(
    reader: &mut R,
    max_size: usize,
    timeout_duration: Duration,
) -> Result<Vec<u8>, GateError>
where
    R: AsyncReadExt + Unpin,
{
    timeout(timeout_duration, read_frame(reader, max_size))
        .await
        .map_err(|_| GateError::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        })?
}

/// Write a frame, failing with `ConnectionTimeout` after `timeout_duration`.
pub async fn write_frame_with_timeout<W>(
    writer: &mut W,
    data: &[u8],
    timeout_duration: Duration,
) -> Result<(), GateError>
where
    W: AsyncWriteExt + Unpin,
{
    timeout(timeout_duration, write_frame(writer, data))
        .await
        .map_err(|_| GateError::Protocol {
            kind: ProtocolErrorKind::ConnectionTimeout,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_layout() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, br#"{"method":"POST"}"#).await.unwrap();

        assert_eq!(&buffer[0..4], &[0, 0, 0, 17]);

        let mut cursor = Cursor::new(buffer);
        let payload = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(payload, br#"{"method":"POST"}"#);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut data = 2_000_000u32.to_be_bytes().to_vec();
        data.extend_from_slice(&[0u8; 16]);
        let mut cursor = Cursor::new(data);

        let result = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(
            result,
            Err(GateError::Protocol {
                kind: ProtocolErrorKind::MessageTooLarge { size: 2_000_000, .. }
            })
        ));
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(matches!(
            read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await,
            Err(GateError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed
            })
        ));
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (mut client, _server) = tokio::io::duplex(64);
        let result = read_frame_with_timeout(
            &mut client,
            DEFAULT_MAX_FRAME_SIZE,
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(
            result,
            Err(GateError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout
            })
        ));
    }
}
