use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};

use crate::codec::{decode_line, take_remainder, FrameConfig, LINE_TERMINATOR};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete lines from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete lines,
/// without the terminator.
pub struct LineReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    eof: bool,
    discarding: bool,
}

impl<T: Read> LineReader<T> {
    /// Create a new line reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new line reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            eof: false,
            discarding: false,
        }
    }

    /// Read the next complete line (blocking).
    ///
    /// A final line without a terminator is returned once at end of stream.
    /// After that, returns `Err(FrameError::ConnectionClosed)`.
    ///
    /// An oversized line yields `Err(FrameError::LineTooLong)` once; its bytes
    /// are dropped up to the next terminator so the following read resumes on
    /// a line boundary.
    pub fn read_line(&mut self) -> Result<Bytes> {
        loop {
            if self.discarding {
                self.skip_oversized();
            }

            if !self.discarding {
                match decode_line(&mut self.buf, self.config.max_line_len) {
                    Ok(Some(line)) => return Ok(line),
                    Ok(None) => {}
                    Err(err @ FrameError::LineTooLong { .. }) => {
                        self.discarding = true;
                        self.skip_oversized();
                        return Err(err);
                    }
                    Err(err) => return Err(err),
                }
            }

            if self.eof {
                if self.discarding {
                    self.buf.clear();
                    self.discarding = false;
                    return Err(FrameError::ConnectionClosed);
                }
                return match take_remainder(&mut self.buf) {
                    Some(line) => Ok(line),
                    None => Err(FrameError::ConnectionClosed),
                };
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                self.eof = true;
                continue;
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn skip_oversized(&mut self) {
        match self.buf.iter().position(|b| *b == LINE_TERMINATOR) {
            Some(pos) => {
                let _ = self.buf.split_to(pos + 1);
                self.discarding = false;
            }
            None => self.buf.clear(),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current line reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: Read> Iterator for LineReader<T> {
    type Item = Result<Bytes>;

    /// Yields lines until the stream closes; a close ends iteration instead
    /// of surfacing `ConnectionClosed`.
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_line() {
            Ok(line) => Some(Ok(line)),
            Err(FrameError::ConnectionClosed) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
