//! Wire-level helpers shared by the DNS proxy and the metrics merge handler.
//!
//! DNS over TCP prefixes every message with its length as a 2-byte
//! big-endian integer (RFC 1035 §4.2.2). UDP carries messages unframed.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

/// Receive buffer size for DNS over UDP.
pub const UDP_BUFFER_SIZE: usize = 512;

/// Largest message the 16-bit TCP length prefix can describe.
pub const MAX_TCP_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Prepend the 2-byte big-endian length to `msg`.
pub fn encode_length_prefixed(msg: &[u8]) -> Result<Bytes, Error> {
    let len = u16::try_from(msg.len()).map_err(|_| Error::MessageTooLarge(msg.len()))?;
    let mut buf = BytesMut::with_capacity(2 + msg.len());
    buf.put_u16(len);
    buf.put_slice(msg);
    Ok(buf.freeze())
}

/// Read the 2-byte length prefix of the next TCP message.
pub async fn read_length<R>(reader: &mut R) -> std::io::Result<u16>
where
    R: AsyncRead + Unpin,
{
    reader.read_u16().await
}

/// Read exactly one length-prefixed message.
pub async fn read_message<R>(reader: &mut R) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let len = read_length(reader).await?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Write one message with its length prefix.
///
/// Nothing is written if the message does not fit the prefix.
pub async fn write_message<W>(writer: &mut W, msg: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let framed = encode_length_prefixed(msg)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Whether a datagram of `len` bytes fits the UDP receive buffer.
pub fn fits_udp_buffer(len: usize) -> bool {
    len <= UDP_BUFFER_SIZE
}

/// Append a Prometheus text exposition verbatim.
///
/// Expositions concatenate safely on line boundaries, so a newline is
/// inserted only when the previous exposition did not end with one.
pub fn append_exposition(out: &mut BytesMut, body: &[u8]) {
    if !out.is_empty() && !out.ends_with(b"\n") && !body.is_empty() {
        out.put_u8(b'\n');
    }
    out.put_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_prefix_is_big_endian() {
        let framed = encode_length_prefixed(&[0xAB; 258]).unwrap();
        assert_eq!(&framed[..2], &[0x01, 0x02]);
        assert_eq!(framed.len(), 260);
    }

    #[test]
    fn test_prefix_limit() {
        assert!(encode_length_prefixed(&vec![0; MAX_TCP_MESSAGE_SIZE]).is_ok());
        assert!(matches!(
            encode_length_prefixed(&vec![0; MAX_TCP_MESSAGE_SIZE + 1]),
            Err(Error::MessageTooLarge(65536))
        ));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        for len in [0usize, 1, 512, MAX_TCP_MESSAGE_SIZE] {
            let msg: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut wire = Vec::new();
            write_message(&mut wire, &msg).await.unwrap();
            assert_eq!(wire.len(), len + 2);

            let mut reader = Cursor::new(wire);
            let read = read_message(&mut reader).await.unwrap();
            assert_eq!(&read[..], &msg[..]);
        }
    }

    #[tokio::test]
    async fn test_oversized_write_emits_nothing() {
        let mut wire = Vec::new();
        let result = write_message(&mut wire, &vec![0; MAX_TCP_MESSAGE_SIZE + 1]).await;
        assert!(result.is_err());
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_message_is_eof() {
        let mut reader = Cursor::new(vec![0x00, 0x05, 1, 2]);
        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_udp_bound() {
        assert!(fits_udp_buffer(512));
        assert!(!fits_udp_buffer(513));
    }

    #[test]
    fn test_append_exposition() {
        let mut out = BytesMut::new();
        append_exposition(&mut out, b"a 1");
        assert_eq!(&out[..], b"a 1");

        append_exposition(&mut out, b"b 2\n");
        append_exposition(&mut out, b"");
        append_exposition(&mut out, b"c 3\n");
        assert_eq!(&out[..], b"a 1\nb 2\nc 3\n");
    }
}
