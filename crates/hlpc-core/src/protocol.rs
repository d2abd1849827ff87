//! Wire framing for HLPC messages.
//!
//! Every message is a fixed-width ASCII header carrying the payload length,
//! right-padded with spaces, followed by the UTF-8 payload.
//!
//! ```text
//! [64 bytes: decimal length, space padded][UTF-8 payload of that length]
//! ```
//!
//! The server answers each frame with the bare bytes `Msg received`, without a
//! header.

use crate::config::ProtocolConfig;
use crate::{HlpcError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Encode a payload length into a fixed-width header.
pub fn encode_header(len: usize) -> Result<[u8; ProtocolConfig::HEADER_LEN]> {
    let digits = len.to_string();
    if digits.len() > ProtocolConfig::HEADER_LEN {
        return Err(HlpcError::framing(format!(
            "length {} does not fit in a {} byte header",
            len,
            ProtocolConfig::HEADER_LEN
        )));
    }

    let mut header = [b' '; ProtocolConfig::HEADER_LEN];
    header[..digits.len()].copy_from_slice(digits.as_bytes());
    Ok(header)
}

/// Decode a header into the payload length it announces.
///
/// Padding is trimmed first. An all-blank header announces an empty payload.
pub fn decode_header(header: &[u8]) -> Result<usize> {
    if header.len() != ProtocolConfig::HEADER_LEN {
        return Err(HlpcError::framing(format!(
            "header is {} bytes, expected {}",
            header.len(),
            ProtocolConfig::HEADER_LEN
        )));
    }

    let text = std::str::from_utf8(header)
        .map_err(|_| HlpcError::framing("header is not valid ASCII"))?
        .trim();

    if text.is_empty() {
        return Ok(0);
    }

    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HlpcError::framing(format!(
            "header {:?} is not a non-negative integer",
            text
        )));
    }

    let len: usize = text
        .parse()
        .map_err(|_| HlpcError::framing(format!("header {:?} is out of range", text)))?;

    if len > ProtocolConfig::MAX_MESSAGE_SIZE {
        return Err(HlpcError::framing(format!(
            "message size {} exceeds maximum {}",
            len,
            ProtocolConfig::MAX_MESSAGE_SIZE
        )));
    }

    Ok(len)
}

/// Encode a complete frame: header followed by the UTF-8 payload.
pub fn encode_frame(message: &str) -> Result<Vec<u8>> {
    let payload = message.as_bytes();
    let header = encode_header(payload.len())?;

    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read and decode one header.
///
/// Returns `None` on clean EOF (peer closed connection before sending any
/// header byte). EOF partway through the header is a framing error.
pub async fn read_header<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<usize>> {
    let mut header = [0u8; ProtocolConfig::HEADER_LEN];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(HlpcError::framing(format!(
                "connection closed after {} of {} header bytes",
                filled,
                ProtocolConfig::HEADER_LEN
            )));
        }
        filled += n;
    }

    decode_header(&header).map(Some)
}

/// Read exactly `len` payload bytes as UTF-8 text.
pub async fn read_payload<R: AsyncReadExt + Unpin>(reader: &mut R, len: usize) -> Result<String> {
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    String::from_utf8(payload).map_err(|_| HlpcError::framing("payload is not valid UTF-8"))
}

/// Read one frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection) before a header.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<String>> {
    match read_header(reader).await? {
        Some(len) => read_payload(reader, len).await.map(Some),
        None => Ok(None),
    }
}

/// Write one frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, message: &str) -> Result<()> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Send the acknowledgement for a received frame.
pub async fn write_ack<W: AsyncWriteExt + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(ProtocolConfig::ACK_MESSAGE.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one acknowledgement. EOF before a full ack is `ConnectionClosed`.
pub async fn read_ack<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<String> {
    let mut ack = vec![0u8; ProtocolConfig::ACK_MESSAGE.len()];
    match reader.read_exact(&mut ack).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(HlpcError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }

    String::from_utf8(ack).map_err(|_| HlpcError::framing("acknowledgement is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_space_padded_decimal() {
        let header = encode_header(9).unwrap();

        assert_eq!(header.len(), ProtocolConfig::HEADER_LEN);
        assert_eq!(header[0], b'9');
        assert!(header[1..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_hey_there_frame_layout() {
        let frame = encode_frame("Hey there").unwrap();

        assert_eq!(frame.len(), 64 + 9);
        assert_eq!(&frame[..1], b"9");
        assert_eq!(&frame[1..64], [b' '; 63].as_slice());
        assert_eq!(&frame[64..], b"Hey there");
    }

    #[test]
    fn test_disconnect_frame_announces_11_bytes() {
        let frame = encode_frame(ProtocolConfig::DISCONNECT_MESSAGE).unwrap();
        assert_eq!(decode_header(&frame[..64]).unwrap(), 11);
    }

    #[test]
    fn test_decode_multi_digit_length() {
        let header = encode_header(4096).unwrap();
        assert_eq!(decode_header(&header).unwrap(), 4096);
    }

    #[test]
    fn test_decode_blank_header_is_empty_payload() {
        let header = [b' '; ProtocolConfig::HEADER_LEN];
        assert_eq!(decode_header(&header).unwrap(), 0);
    }

    #[test]
    fn test_decode_rejects_non_numeric_header() {
        let mut header = [b' '; ProtocolConfig::HEADER_LEN];
        header[..5].copy_from_slice(b"hello");

        let err = decode_header(&header).unwrap_err();
        assert!(matches!(err, HlpcError::Framing { .. }));
        assert!(err.to_string().contains("not a non-negative integer"));
    }

    #[test]
    fn test_decode_rejects_negative_length() {
        let mut header = [b' '; ProtocolConfig::HEADER_LEN];
        header[..2].copy_from_slice(b"-5");
        assert!(matches!(
            decode_header(&header),
            Err(HlpcError::Framing { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_header_width() {
        let err = decode_header(b"9   ").unwrap_err();
        assert!(err.to_string().contains("expected 64"));
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let header = encode_header(ProtocolConfig::MAX_MESSAGE_SIZE + 1).unwrap();
        let err = decode_header(&header).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "héllo wörld").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor).await.unwrap();

        assert_eq!(read_back.as_deref(), Some("héllo wörld"));
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_header_read_truncated_header_is_error() {
        let mut cursor = std::io::Cursor::new(b"12   ".to_vec());
        let err = read_header(&mut cursor).await.unwrap_err();
        assert!(matches!(err, HlpcError::Framing { .. }));
        assert!(err.to_string().contains("after 5 of 64 header bytes"));
    }

    #[tokio::test]
    async fn test_header_read_across_partial_reads() {
        let (mut client, mut server) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            let header = encode_header(321).unwrap();
            for chunk in header.chunks(3) {
                tokio::io::AsyncWriteExt::write_all(&mut client, chunk)
                    .await
                    .unwrap();
            }
        });

        assert_eq!(read_header(&mut server).await.unwrap(), Some(321));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_read_truncated_payload_is_error() {
        let mut buf = encode_header(10).unwrap().to_vec();
        buf.extend_from_slice(b"abc");

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, HlpcError::Io { .. }));
    }

    #[tokio::test]
    async fn test_frame_read_invalid_utf8_payload() {
        let mut buf = encode_header(2).unwrap().to_vec();
        buf.extend_from_slice(&[0xff, 0xfe]);

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[tokio::test]
    async fn test_frame_read_handles_split_writes() {
        let (mut client, mut server) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            write_frame(&mut client, "split across many small writes")
                .await
                .unwrap();
        });

        let msg = read_frame(&mut server).await.unwrap();
        writer.await.unwrap();
        assert_eq!(msg.as_deref(), Some("split across many small writes"));
    }

    #[tokio::test]
    async fn test_ack_roundtrip_and_eof() {
        let mut buf = Vec::new();
        write_ack(&mut buf).await.unwrap();
        assert_eq!(buf, b"Msg received");

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_ack(&mut cursor).await.unwrap(), "Msg received");

        let mut short = std::io::Cursor::new(b"Msg".to_vec());
        assert!(matches!(
            read_ack(&mut short).await,
            Err(HlpcError::ConnectionClosed)
        ));
    }
}
