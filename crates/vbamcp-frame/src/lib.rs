//! Newline-delimited framing for JSON-RPC over a child's stdio.
//!
//! Every message is exactly one UTF-8 JSON document followed by `\n`:
//! - no length prefix, no content-length header
//! - a trailing `\r` before the terminator is tolerated on input
//! - payloads containing a raw `\n` are refused on output
//!
//! Callers get whole lines; partial reads are buffered internally.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_line, encode_line, take_remainder, FrameConfig, DEFAULT_MAX_LINE_LEN, LINE_TERMINATOR,
};
pub use error::{FrameError, Result};
pub use reader::LineReader;
pub use writer::LineWriter;
