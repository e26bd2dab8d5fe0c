//! Binary frame codec
//!
//! ```text
//! +------+---------+----------------------+-------------------+
//! | ZBXD | 0x01    | payload length (u64) | JSON payload      |
//! | 4 B  | 1 B     | 8 B, little-endian   | `length` bytes    |
//! +------+---------+----------------------+-------------------+
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AgentError, AgentResult};

pub const MAGIC: &[u8; 4] = b"ZBXD";

pub const PROTOCOL_VERSION: u8 = 0x01;

/// Magic plus version byte
pub const HEADER_LEN: usize = 5;

pub const LENGTH_FIELD_LEN: usize = 8;

/// Bytes preceding the JSON payload
pub const FRAME_PREFIX_LEN: usize = HEADER_LEN + LENGTH_FIELD_LEN;

/// Largest payload accepted from a server
pub const MAX_PAYLOAD_LEN: u64 = 128 * 1024 * 1024;

/// Opening bytes of an `agent data` submission payload
pub const AGENT_DATA_OPENER: &[u8] = br#"{"request":"agent data","data":["#;

/// Closing bytes of an `agent data` submission payload
pub fn agent_data_closer(clock: i64) -> Vec<u8> {
    format!(r#"],"clock":{clock}}}"#).into_bytes()
}

/// Magic and version, as written in front of the length field
pub fn header() -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(MAGIC);
    header[4] = PROTOCOL_VERSION;
    header
}

pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&header());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn check_header(prefix: &[u8]) -> AgentResult<u64> {
    if &prefix[..4] != MAGIC {
        return Err(AgentError::Protocol(format!(
            "bad frame magic {:?}",
            String::from_utf8_lossy(&prefix[..4])
        )));
    }
    if prefix[4] != PROTOCOL_VERSION {
        return Err(AgentError::Protocol(format!(
            "unsupported protocol version {:#04x}",
            prefix[4]
        )));
    }

    let mut length = [0u8; LENGTH_FIELD_LEN];
    length.copy_from_slice(&prefix[HEADER_LEN..FRAME_PREFIX_LEN]);
    let length = u64::from_le_bytes(length);

    if length > MAX_PAYLOAD_LEN {
        return Err(AgentError::Protocol(format!(
            "payload of {length} bytes exceeds limit"
        )));
    }
    Ok(length)
}

/// Extract exactly the announced payload from a complete frame
pub fn decode_frame(frame: &[u8]) -> AgentResult<&[u8]> {
    if frame.len() < FRAME_PREFIX_LEN {
        return Err(AgentError::Protocol(format!(
            "frame of {} bytes is shorter than its header",
            frame.len()
        )));
    }

    let length = check_header(&frame[..FRAME_PREFIX_LEN])? as usize;
    let body = &frame[FRAME_PREFIX_LEN..];
    if body.len() < length {
        return Err(AgentError::Protocol(format!(
            "truncated frame: announced {length} bytes, got {}",
            body.len()
        )));
    }
    Ok(&body[..length])
}

/// Read one frame from `reader` and return its payload
pub async fn read_frame<R>(reader: &mut R) -> AgentResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FRAME_PREFIX_LEN];
    reader.read_exact(&mut prefix).await?;

    let length = check_header(&prefix)?;
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> AgentResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_encode_layout_is_byte_exact() {
        let frame = encode_frame(b"{}");
        assert_eq!(&frame[..5], b"ZBXD\x01");
        assert_eq!(&frame[5..13], &[2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&frame[13..], b"{}");
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut frame = encode_frame(b"abc");
        frame.extend_from_slice(b"garbage");
        assert_eq!(decode_frame(&frame).unwrap(), b"abc");
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_matches!(decode_frame(b"ZBX"), Err(AgentError::Protocol(_)));
        assert_matches!(
            decode_frame(b"HTTP/1.1 200 OK\r\n"),
            Err(AgentError::Protocol(_))
        );

        let mut frame = encode_frame(b"abc");
        frame[4] = 0x02;
        assert_matches!(decode_frame(&frame), Err(AgentError::Protocol(_)));

        let frame = encode_frame(b"abcdef");
        assert_matches!(decode_frame(&frame[..15]), Err(AgentError::Protocol(_)));
    }

    #[test]
    fn test_closer_carries_clock() {
        assert_eq!(agent_data_closer(1700000000), br#"],"clock":1700000000}"#.to_vec());
    }

    #[tokio::test]
    async fn test_read_frame_from_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, br#"{"response":"success"}"#).await.unwrap();

        let payload = read_frame(&mut server).await.unwrap();
        assert_eq!(payload, br#"{"response":"success"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversize() {
        let mut bytes = header().to_vec();
        bytes.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        let mut reader = bytes.as_slice();
        assert_matches!(read_frame(&mut reader).await, Err(AgentError::Protocol(_)));
    }
}
