/// Errors that can occur during line encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// An unterminated line grew past the configured maximum.
    #[error("line too long ({size} bytes, max {max})")]
    LineTooLong { size: usize, max: usize },

    /// The outgoing payload contains a raw newline and would break framing.
    #[error("payload contains a raw newline at byte {offset}")]
    EmbeddedNewline { offset: usize },

    /// The outgoing value could not be serialized.
    #[error("json encode error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing lines.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached end of file.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
