//! Length-prefixed frame codec.
//!
//! Every frame on the wire is a 4-byte big-endian unsigned length, followed
//! by exactly that many payload bytes. The codec is byte-oriented: it never
//! inspects or re-serialises payload contents, which is what lets the broker
//! forward a frame exactly as it arrived.

use std::io::{Error as IoError, ErrorKind};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload length, in bytes, permitted by the protocol.
pub const MAX_FRAME_LEN: usize = 1_048_576;

/// A framing-level protocol violation.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The declared length was zero or exceeded [`MAX_FRAME_LEN`].
    #[error("frame length {len} out of range (1..={MAX_FRAME_LEN})")]
    LengthOutOfRange {
        /// The length as declared on the wire.
        len: u32,
    },
    /// A caller attempted to write more than [`MAX_FRAME_LEN`] payload bytes.
    #[error("payload of {len} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    PayloadTooLarge {
        /// The offending payload length.
        len: usize,
    },
    /// Any other I/O failure while reading or writing a frame.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for IoError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => e,
            other => IoError::new(ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// Reads a single frame from `stream`.
///
/// Reads exactly 4 bytes for the big-endian length prefix, rejects a length
/// of zero or a length greater than [`MAX_FRAME_LEN`] with
/// [`FrameError::LengthOutOfRange`], then reads exactly that many payload
/// bytes. A short read during either phase surfaces as
/// [`FrameError::Io`] wrapping [`std::io::ErrorKind::UnexpectedEof`].
pub async fn read_frame(
    stream: &mut (impl AsyncRead + Unpin + Send),
) -> Result<Vec<u8>, FrameError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);

    if len == 0 || len as usize > MAX_FRAME_LEN {
        return Err(FrameError::LengthOutOfRange { len });
    }

    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes a single frame to `stream` and flushes it.
///
/// A `None` payload is normalised to an empty slice. A payload longer than
/// [`MAX_FRAME_LEN`] raises [`FrameError::PayloadTooLarge`] without writing
/// any bytes. Callers are responsible for serialising the 4-byte header and
/// payload write atomically with respect to other writers on the same
/// stream — this function itself issues two `write_all` calls plus a flush,
/// none of which are atomic on their own.
pub async fn write_frame(
    stream: &mut (impl AsyncWrite + Unpin + Send),
    payload: Option<&[u8]>,
) -> Result<(), FrameError> {
    let payload = payload.unwrap_or(&[]);
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
        });
    }

    let len_bytes = (payload.len() as u32).to_be_bytes();
    stream.write_all(&len_bytes).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// True if `err` indicates the peer went away rather than a genuine fault.
pub fn is_disconnect(err: &IoError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset
    )
}
