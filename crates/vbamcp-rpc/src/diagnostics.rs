use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

const PREVIEW_LEN: usize = 200;

/// Something the client noticed on the wire that did not settle a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A stdout line that is not JSON (server banner, stray print).
    MalformedLine { line: String, error: String },
    /// Valid JSON that is not a response to any request shape we know.
    NotAResponse { line: String },
    /// A response whose id matches no pending call.
    StaleResponse { id: u64 },
    /// The tool server exited; `rejected` pending calls were failed.
    ChildExited { code: Option<i32>, rejected: usize },
    /// A line the tool server wrote to stderr.
    ServerStderr { line: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MalformedLine { line, error } => {
                write!(f, "malformed line ({error}): {}", preview(line))
            }
            Diagnostic::NotAResponse { line } => write!(f, "not a response: {}", preview(line)),
            Diagnostic::StaleResponse { id } => write!(f, "response for unknown id {id}"),
            Diagnostic::ChildExited { code, rejected } => match code {
                Some(code) => write!(
                    f,
                    "tool server exited with code {code}; {rejected} pending call(s) rejected"
                ),
                None => write!(
                    f,
                    "tool server exited without a code; {rejected} pending call(s) rejected"
                ),
            },
            Diagnostic::ServerStderr { line } => write!(f, "server stderr: {line}"),
        }
    }
}

/// Fan-out of [`Diagnostic`] events to any number of subscribers.
///
/// Every event is also logged. Subscribers whose receiver was dropped are
/// pruned on the next emit.
#[derive(Default)]
pub struct Diagnostics {
    subscribers: Mutex<Vec<Sender<Diagnostic>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<Diagnostic> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    /// Number of live subscribers as of the last emit.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Log `event` and deliver it to every subscriber.
    pub fn emit(&self, event: Diagnostic) {
        log_event(&event);
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<Diagnostic>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn log_event(event: &Diagnostic) {
    match event {
        Diagnostic::MalformedLine { line, error } => {
            debug!(error = %error, line = %preview(line), "skipping non-JSON line");
        }
        Diagnostic::NotAResponse { line } => {
            debug!(line = %preview(line), "skipping non-response message");
        }
        Diagnostic::StaleResponse { id } => {
            debug!(id, "dropping response for unknown id");
        }
        Diagnostic::ChildExited { code, rejected: 0 } => {
            info!(code = ?code, "tool server exited");
        }
        Diagnostic::ChildExited { code, rejected } => {
            warn!(code = ?code, rejected, "tool server exited with calls outstanding");
        }
        // Stderr lines are already logged by the transport.
        Diagnostic::ServerStderr { .. } => {}
    }
}

fn preview(line: &str) -> &str {
    if line.len() <= PREVIEW_LEN {
        return line;
    }
    let mut end = PREVIEW_LEN;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_every_event() {
        let diagnostics = Diagnostics::new();
        let first = diagnostics.subscribe();
        let second = diagnostics.subscribe();

        diagnostics.emit(Diagnostic::StaleResponse { id: 4 });

        assert_eq!(first.try_recv().unwrap(), Diagnostic::StaleResponse { id: 4 });
        assert_eq!(second.try_recv().unwrap(), Diagnostic::StaleResponse { id: 4 });
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let diagnostics = Diagnostics::new();
        let kept = diagnostics.subscribe();
        drop(diagnostics.subscribe());
        assert_eq!(diagnostics.subscriber_count(), 2);

        diagnostics.emit(Diagnostic::ServerStderr {
            line: "warming up".into(),
        });
        assert_eq!(diagnostics.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        Diagnostics::new().emit(Diagnostic::ChildExited {
            code: Some(0),
            rejected: 0,
        });
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            Diagnostic::ChildExited {
                code: Some(2),
                rejected: 3
            }
            .to_string(),
            "tool server exited with code 2; 3 pending call(s) rejected"
        );
        assert_eq!(
            Diagnostic::StaleResponse { id: 9 }.to_string(),
            "response for unknown id 9"
        );
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let long = "é".repeat(PREVIEW_LEN);
        let cut = preview(&long);
        assert!(cut.len() <= PREVIEW_LEN);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(preview("short"), "short");
    }
}
