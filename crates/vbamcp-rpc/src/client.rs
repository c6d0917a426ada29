use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use serde_json::{json, Value};
use tracing::{debug, trace};
use vbamcp_frame::{decode_line, take_remainder, FrameConfig, FrameError, LINE_TERMINATOR};
use vbamcp_transport::{LineSink, TransportError};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Result, RpcError};
use crate::message::{Inbound, Reply, Request};
use crate::table::{CorrelationTable, PendingReply};

/// JSON-RPC client over a line sink.
///
/// Requests are written through the [`LineSink`]; responses are fed back in
/// with [`RpcClient::dispatch_line`] (or [`RpcClient::dispatch_chunk`] for
/// raw, unframed reads). Any number of calls may be outstanding; replies
/// settle by id in whatever order they arrive.
///
/// Ids come from an id source that may be shared between clients, so a
/// replacement client never reuses an id already sent by its predecessor.
pub struct RpcClient {
    sink: Arc<dyn LineSink>,
    next_id: Arc<AtomicU64>,
    table: Mutex<CorrelationTable>,
    diagnostics: Arc<Diagnostics>,
    partial: Mutex<ChunkBuffer>,
    frame: FrameConfig,
}

#[derive(Default)]
struct ChunkBuffer {
    buf: BytesMut,
    discarding: bool,
}

impl RpcClient {
    /// Create a client writing to `sink`, with its own diagnostics channel.
    pub fn new(sink: Arc<dyn LineSink>) -> Self {
        Self::with_diagnostics(sink, Arc::new(Diagnostics::new()))
    }

    /// Create a client that reports to a shared diagnostics channel.
    pub fn with_diagnostics(sink: Arc<dyn LineSink>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            sink,
            next_id: new_id_source(),
            table: Mutex::new(CorrelationTable::new()),
            diagnostics,
            partial: Mutex::new(ChunkBuffer::default()),
            frame: FrameConfig::default(),
        }
    }

    /// Draw request ids from `ids` instead of a counter of this client's own.
    pub fn with_id_source(mut self, ids: Arc<AtomicU64>) -> Self {
        self.next_id = ids;
        self
    }

    /// Line framing limits used by [`RpcClient::dispatch_chunk`].
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    /// Send a request and return a handle to wait for its reply.
    ///
    /// Fails with [`RpcError::NotRunning`] without writing anything when the
    /// sink has no peer. If the write fails the call is forgotten.
    pub fn call(&self, method: &str, params: Value) -> Result<PendingReply> {
        if !self.sink.is_running() {
            return Err(RpcError::NotRunning);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = Request::new(id, method, &params).to_line()?;

        let reply = self.table().insert(id, method);
        debug!(id, method, "sending request");

        if let Err(err) = self.sink.send_line(&line) {
            self.table().remove(id);
            return Err(match err {
                TransportError::NotRunning => RpcError::NotRunning,
                other => RpcError::Transport(other),
            });
        }

        Ok(reply)
    }

    /// Call a tool: `tools/call` with `{name, arguments}`.
    pub fn call_tool(&self, name: &str, arguments: Value) -> Result<PendingReply> {
        self.call("tools/call", json!({ "name": name, "arguments": arguments }))
    }

    /// Feed one complete stdout line (without terminator).
    ///
    /// Responses settle their pending call. Everything else is reported as a
    /// [`Diagnostic`] and skipped.
    pub fn dispatch_line(&self, line: &[u8]) {
        match Inbound::classify(line) {
            Inbound::Blank => {}
            Inbound::Malformed(err) => self.diagnostics.emit(Diagnostic::MalformedLine {
                line: String::from_utf8_lossy(line).into_owned(),
                error: err.to_string(),
            }),
            Inbound::NotAResponse(_) => self.diagnostics.emit(Diagnostic::NotAResponse {
                line: String::from_utf8_lossy(line).into_owned(),
            }),
            Inbound::Response(response) => {
                let outcome = match response.reply {
                    Reply::Result(value) => Ok(value),
                    Reply::Error(value) => Err(RpcError::Remote(value)),
                };
                let settled = self.table().settle(response.id, outcome);
                if !settled {
                    self.diagnostics
                        .emit(Diagnostic::StaleResponse { id: response.id });
                }
            }
        }
    }

    /// Feed an arbitrary chunk of stdout bytes.
    ///
    /// Partial lines are buffered until their terminator arrives in a later
    /// chunk. An oversized line is reported and dropped up to its terminator.
    pub fn dispatch_chunk(&self, chunk: &[u8]) {
        let lines = {
            let mut partial = self.partial();
            partial.buf.extend_from_slice(chunk);
            self.drain_lines(&mut partial)
        };
        for line in lines {
            self.dispatch_line(&line);
        }
    }

    /// Dispatch whatever unterminated tail is buffered (end of stream).
    pub fn flush_partial(&self) {
        let tail = {
            let mut partial = self.partial();
            let discarding = std::mem::take(&mut partial.discarding);
            let tail = take_remainder(&mut partial.buf);
            if discarding {
                None
            } else {
                tail
            }
        };
        if let Some(line) = tail {
            self.dispatch_line(&line);
        }
    }

    fn drain_lines(&self, partial: &mut ChunkBuffer) -> Vec<Bytes> {
        let mut lines = Vec::new();
        loop {
            if partial.discarding {
                match partial.buf.iter().position(|b| *b == LINE_TERMINATOR) {
                    Some(pos) => {
                        let _ = partial.buf.split_to(pos + 1);
                        partial.discarding = false;
                    }
                    None => {
                        partial.buf.clear();
                        return lines;
                    }
                }
            }

            match decode_line(&mut partial.buf, self.frame.max_line_len) {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => return lines,
                Err(FrameError::LineTooLong { size, max }) => {
                    self.diagnostics.emit(Diagnostic::MalformedLine {
                        line: String::new(),
                        error: format!("line of {size} bytes exceeds limit of {max}"),
                    });
                    partial.discarding = true;
                }
                Err(err) => {
                    trace!(error = %err, "unexpected framing error; clearing buffer");
                    partial.buf.clear();
                    return lines;
                }
            }
        }
    }

    /// Reject every outstanding call with [`RpcError::ChildExit`].
    ///
    /// Emits [`Diagnostic::ChildExited`] and returns the number of calls
    /// rejected. Also drops any buffered partial line.
    pub fn fail_all_pending(&self, code: Option<i32>) -> usize {
        self.partial().buf.clear();
        let rejected = self.table().fail_all(|| RpcError::ChildExit { code });
        self.diagnostics
            .emit(Diagnostic::ChildExited { code, rejected });
        rejected
    }

    /// Number of calls awaiting a reply.
    pub fn pending(&self) -> usize {
        self.table().len()
    }

    /// Whether the underlying sink has a peer attached.
    pub fn is_running(&self) -> bool {
        self.sink.is_running()
    }

    /// Diagnostics channel this client reports to.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    fn table(&self) -> MutexGuard<'_, CorrelationTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn partial(&self) -> MutexGuard<'_, ChunkBuffer> {
        self.partial.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A fresh id counter. The first id handed out is 1.
pub fn new_id_source() -> Arc<AtomicU64> {
    Arc::new(AtomicU64::new(1))
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("pending", &self.pending())
            .finish()
    }
}
