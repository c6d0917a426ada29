use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use serde::Serialize;

use crate::codec::{encode_line, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete lines to any `Write` stream.
pub struct LineWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> LineWriter<T> {
    /// Create a new line writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new line writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Serialize a value as compact JSON and send it as one line.
    pub fn send_json<V: Serialize>(&mut self, value: &V) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.send(&payload)
    }

    /// Send one payload followed by the line terminator, then flush.
    ///
    /// The whole line is written before returning, so concurrent writers
    /// sharing this writer behind a lock never interleave partial lines.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_line_len {
            return Err(FrameError::LineTooLong {
                size: payload.len(),
                max: self.config.max_line_len,
            });
        }

        self.buf.clear();
        encode_line(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(FrameError::ConnectionClosed)
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(FrameError::ConnectionClosed)
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current line writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::reader::LineReader;

    #[test]
    fn send_writes_terminated_line() {
        let mut writer = LineWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"{\"ok\":true}").unwrap();
        assert_eq!(writer.get_ref().get_ref().as_slice(), b"{\"ok\":true}\n");
    }

    #[test]
    fn send_json_is_single_line() {
        let mut writer = LineWriter::new(Cursor::new(Vec::<u8>::new()));
        writer
            .send_json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": { "code": "Sub A()\r\n  MsgBox 1\r\nEnd Sub" }
            }))
            .unwrap();

        let written = writer.into_inner().into_inner();
        assert_eq!(written.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(written.last(), Some(&b'\n'));

        let value: serde_json::Value =
            serde_json::from_slice(&written[..written.len() - 1]).unwrap();
        assert_eq!(value["id"], 3);
    }

    #[test]
    fn send_rejects_raw_newline() {
        let mut writer = LineWriter::new(Cursor::new(Vec::<u8>::new()));
        let err = writer.send(b"line one\nline two").unwrap_err();
        assert!(matches!(err, FrameError::EmbeddedNewline { offset: 8 }));
        assert!(writer.get_ref().get_ref().is_empty());
    }

    #[test]
    fn send_rejects_oversized_payload() {
        let cfg = FrameConfig { max_line_len: 4 };
        let mut writer = LineWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        let err = writer.send(b"too long").unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { size: 8, max: 4 }));
    }

    #[test]
    fn zero_length_write_reports_closed() {
        let mut writer = LineWriter::new(ZeroWriter);
        let err = writer.send(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn broken_pipe_reports_closed() {
        let mut writer = LineWriter::new(BrokenPipeWriter);
        let err = writer.send(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn roundtrip_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = LineWriter::new(left);
        let mut reader = LineReader::new(right);

        writer.send(b"ping").unwrap();
        writer.send_json(&serde_json::json!({ "id": 1 })).unwrap();

        assert_eq!(reader.read_line().unwrap().as_ref(), b"ping");
        assert_eq!(reader.read_line().unwrap().as_ref(), b"{\"id\":1}");
    }

    #[test]
    fn concurrent_reader_writer_threads() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = LineWriter::new(left);
        let mut reader = LineReader::new(right);

        let reader_thread = std::thread::spawn(move || {
            for expected in 0..64u32 {
                let line = reader.read_line().unwrap();
                assert_eq!(line.as_ref(), format!("msg-{expected}").as_bytes());
            }
        });

        for i in 0..64u32 {
            writer.send(format!("msg-{i}").as_bytes()).unwrap();
        }

        reader_thread.join().unwrap();
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipeWriter;

    impl Write for BrokenPipeWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
