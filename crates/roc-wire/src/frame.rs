//! Length-prefixed, parity-checked frame I/O.
//!
//! Wire layout: `type:u8 | len:u32 LE | parity:u8 | payload[len]`. Parity
//! is the XOR of the five preceding header bytes (`type` and the four
//! `len` bytes); a frame whose parity does not match is a fatal protocol
//! error — the connection is not salvageable once framing is lost.
//!
//! Generic over `AsyncRead`/`AsyncWrite` rather than tied to `TcpStream`,
//! the way `spark-transport-tcp::channel` drives IO directly against
//! `tokio::io::{AsyncReadExt, AsyncWriteExt}`; this lets tests run the
//! same codec over `tokio::io::duplex` pairs.

use bytes::{Bytes, BytesMut};
use roc_core::error::{EngineError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HEADER_LEN: usize = 6;

/// Default cap on a single frame's payload length; callers may tighten
/// this per listener.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Authentication,
    Request,
}

impl MessageType {
    fn to_byte(self) -> u8 {
        match self {
            MessageType::Authentication => 0,
            MessageType::Request => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(MessageType::Authentication),
            1 => Ok(MessageType::Request),
            other => Err(EngineError::protocol(
                "frame.unexpected_message_type",
                format!("unknown message type byte {other}"),
            )),
        }
    }
}

fn header_parity(type_byte: u8, len_bytes: [u8; 4]) -> u8 {
    len_bytes.iter().fold(type_byte, |acc, b| acc ^ b)
}

/// Reads one frame, enforcing `max_payload_len`. A partial header or
/// payload read surfaces as an `Io`-category `EngineError` wrapping
/// `UnexpectedEof`, matching spec.md §4.1.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload_len: u32,
) -> Result<(MessageType, Bytes)> {
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|err| EngineError::io("frame.read_header", err))?;

    let type_byte = header[0];
    let len_bytes = [header[1], header[2], header[3], header[4]];
    let parity = header[5];

    if header_parity(type_byte, len_bytes) != parity {
        return Err(EngineError::protocol(
            "frame.parity_mismatch",
            "frame header failed parity check",
        ));
    }

    let len = u32::from_le_bytes(len_bytes);
    if len > max_payload_len {
        return Err(EngineError::protocol(
            "frame.payload_too_large",
            format!("frame declares {len} bytes, cap is {max_payload_len}"),
        ));
    }

    let msg_type = MessageType::from_byte(type_byte)?;

    let mut payload = BytesMut::zeroed(len as usize);
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|err| EngineError::io("frame.read_payload", err))?;

    Ok((msg_type, payload.freeze()))
}

/// Writes one frame from a sequence of payload chunks, so a sender can
/// hand over a producer's scatter-gather output without first
/// concatenating it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg_type: MessageType,
    chunks: &[&[u8]],
) -> Result<()> {
    let total_len: usize = chunks.iter().map(|c| c.len()).sum();
    let len: u32 = total_len
        .try_into()
        .map_err(|_| EngineError::protocol("frame.payload_too_large", "payload exceeds u32::MAX"))?;

    let len_bytes = len.to_le_bytes();
    let type_byte = msg_type.to_byte();
    let parity = header_parity(type_byte, len_bytes);

    let mut header = [0u8; HEADER_LEN];
    header[0] = type_byte;
    header[1..5].copy_from_slice(&len_bytes);
    header[5] = parity;

    writer
        .write_all(&header)
        .await
        .map_err(|err| EngineError::io("frame.write_header", err))?;
    for chunk in chunks {
        writer
            .write_all(chunk)
            .await
            .map_err(|err| EngineError::io("frame.write_payload", err))?;
    }
    writer
        .flush()
        .await
        .map_err(|err| EngineError::io("frame.flush", err))?;
    Ok(())
}
