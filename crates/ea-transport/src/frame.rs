//! Wire codec: `[4-byte big-endian length][UTF-8 JSON body]`.
use signal_core::{CoreError, CoreResult, EaMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub fn encode(message: &EaMessage) -> CoreResult<Vec<u8>> {
    let body = serde_json::to_vec(message)
        .map_err(|e| CoreError::ShapeError(format!("failed to encode EA message: {e}")))?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &EaMessage) -> CoreResult<()> {
    let frame = encode(message)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| CoreError::TransientIo(format!("write failed: {e}")))
}

/// Reads exactly one frame, rejecting bodies larger than `max_frame_bytes`.
/// Returns `Ok(None)` on clean EOF before any bytes of a new frame arrive.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_bytes: usize,
) -> CoreResult<Option<EaMessage>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CoreError::TransientIo(format!("read length prefix failed: {e}"))),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(CoreError::ProtocolViolation(format!(
            "frame of {len} bytes exceeds max_frame_bytes={max_frame_bytes}"
        )));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| CoreError::TransientIo(format!("read frame body failed: {e}")))?;
    let message: EaMessage = serde_json::from_slice(&body)
        .map_err(|e| CoreError::ProtocolViolation(format!("malformed EA message: {e}")))?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use signal_core::EaMessageType;

    #[tokio::test]
    async fn round_trips_through_an_in_memory_pipe() {
        let message = EaMessage {
            message_type: EaMessageType::Heartbeat,
            data: serde_json::json!({}),
            timestamp: Utc::now(),
        };
        let frame = encode(&message).unwrap();
        let mut cursor = std::io::Cursor::new(frame);
        let decoded = read_frame(&mut cursor, 1 << 20).await.unwrap().unwrap();
        assert_eq!(decoded.message_type, message.message_type);
    }

    #[tokio::test]
    async fn oversized_frame_is_protocol_violation() {
        let mut len_buf = Vec::new();
        len_buf.extend_from_slice(&(100u32).to_be_bytes());
        let mut cursor = std::io::Cursor::new(len_buf);
        let err = read_frame(&mut cursor, 10).await.unwrap_err();
        assert!(matches!(err, CoreError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn clean_eof_before_frame_yields_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor, 1024).await.unwrap().is_none());
    }
}
