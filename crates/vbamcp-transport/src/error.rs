/// Errors that can occur in child transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A child process is already running for this transport.
    #[error("tool server already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// No child process is running.
    #[error("tool server not running")]
    NotRunning,

    /// The child process could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// A standard stream was not captured at spawn time.
    #[error("child {0} was not piped")]
    MissingPipe(&'static str),

    /// Framing error while writing to the child.
    #[error("frame error: {0}")]
    Frame(#[from] vbamcp_frame::FrameError),

    /// An I/O error occurred on the child's streams.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
