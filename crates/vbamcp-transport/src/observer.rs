use std::fmt;

use crate::error::Result;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Start generation of the child that exited.
    pub generation: u64,
    /// Exit code, if the child exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the child was killed by one (Unix only).
    pub signal: Option<i32>,
    /// True when the exit followed an explicit `stop()`.
    pub requested: bool,
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Receives events from a running child.
///
/// Called from the transport's pump threads, never concurrently for the
/// same stream. Stdout lines arrive in order, then exactly one `on_exit`.
pub trait ChildObserver: Send + Sync + 'static {
    /// One complete line from the child's stdout, without the terminator.
    fn on_stdout_line(&self, line: &[u8]);

    /// One complete line from the child's stderr.
    fn on_stderr_line(&self, _line: &[u8]) {}

    /// The child's stdout closed and the process was reaped.
    fn on_exit(&self, _exit: &ExitInfo) {}
}

/// Outbound half of a line transport.
///
/// Implemented by [`crate::ChildTransport`]; the RPC client writes requests
/// through this seam so it can be driven by an in-memory sink in tests.
pub trait LineSink: Send + Sync {
    /// Whether a peer is currently attached.
    fn is_running(&self) -> bool;

    /// Write one payload as a complete line.
    fn send_line(&self, payload: &[u8]) -> Result<()>;
}
