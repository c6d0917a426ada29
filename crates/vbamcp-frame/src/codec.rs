use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Line terminator on the wire.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Default maximum line length: 16 MiB.
pub const DEFAULT_MAX_LINE_LEN: usize = 16 * 1024 * 1024;

/// Encode one payload as a wire line.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────────┬──────┐
/// │ UTF-8 JSON document          │ \n   │
/// │ (no raw newline inside)      │      │
/// └──────────────────────────────┴──────┘
/// ```
pub fn encode_line(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if let Some(offset) = payload.iter().position(|b| *b == LINE_TERMINATOR) {
        return Err(FrameError::EmbeddedNewline { offset });
    }
    dst.reserve(payload.len() + 1);
    dst.put_slice(payload);
    dst.put_u8(LINE_TERMINATOR);
    Ok(())
}

/// Decode the next complete line from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't hold a terminator yet.
/// On success, consumes the line and its terminator; a trailing `\r` is dropped.
pub fn decode_line(src: &mut BytesMut, max_line_len: usize) -> Result<Option<Bytes>> {
    let Some(pos) = src.iter().position(|b| *b == LINE_TERMINATOR) else {
        if src.len() > max_line_len {
            return Err(FrameError::LineTooLong {
                size: src.len(),
                max: max_line_len,
            });
        }
        return Ok(None); // Need more data
    };

    if pos > max_line_len {
        return Err(FrameError::LineTooLong {
            size: pos,
            max: max_line_len,
        });
    }

    let mut line = src.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(pos - 1);
    }
    Ok(Some(line.freeze()))
}

/// Take whatever is left in the buffer as a final, unterminated line.
///
/// Used at end of stream. Returns `None` when nothing but whitespace is left.
pub fn take_remainder(src: &mut BytesMut) -> Option<Bytes> {
    if src.iter().all(|b| b.is_ascii_whitespace()) {
        src.clear();
        return None;
    }
    let mut line = src.split();
    if line.last() == Some(&b'\r') {
        let len = line.len();
        line.truncate(len - 1);
    }
    Some(line.freeze())
}

/// Configuration for the line codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum line length in bytes. Default: 16 MiB.
    pub max_line_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}
