use std::time::Duration;

use serde_json::Value;

/// Errors that can occur in RPC client and session operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No tool server is running; nothing was sent.
    #[error("tool server not running")]
    NotRunning,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] vbamcp_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] vbamcp_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with an `error` member, passed through as sent.
    #[error("remote error: {}", remote_summary(.0))]
    Remote(Value),

    /// The tool server exited while the call was outstanding.
    #[error("tool server exited ({}) before replying", exit_summary(.code))]
    ChildExit { code: Option<i32> },

    /// No reply arrived within the caller's wait. The call stays pending.
    #[error("no reply after {0:?}")]
    Timeout(Duration),

    /// The client was dropped before a reply arrived.
    #[error("call abandoned before a reply arrived")]
    Abandoned,

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A tool result could not be decoded into the expected payload.
    #[error("unusable result from {tool}: {message}")]
    ToolPayload { tool: String, message: String },

    /// Tool arguments failed schema validation.
    #[cfg(feature = "schema")]
    #[error("schema validation error: {0}")]
    Schema(#[from] vbamcp_schema::SchemaError),
}

impl RpcError {
    /// Human-readable message of a remote error, when the server sent one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            RpcError::Remote(value) => value.get("message").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Numeric code of a remote error, when the server sent one.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            RpcError::Remote(value) => value.get("code").and_then(Value::as_i64),
            _ => None,
        }
    }

    pub(crate) fn tool_payload(tool: &str, message: impl Into<String>) -> Self {
        RpcError::ToolPayload {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

fn remote_summary(value: &Value) -> String {
    match value.get("message").and_then(Value::as_str) {
        Some(message) => match value.get("code").and_then(Value::as_i64) {
            Some(code) => format!("{message} (code {code})"),
            None => message.to_string(),
        },
        None => value.to_string(),
    }
}

fn exit_summary(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn remote_error_display_uses_message_and_code() {
        let err = RpcError::Remote(json!({"code": -32601, "message": "Method not found"}));
        assert_eq!(err.to_string(), "remote error: Method not found (code -32601)");
        assert_eq!(err.remote_message(), Some("Method not found"));
        assert_eq!(err.remote_code(), Some(-32601));
    }

    #[test]
    fn remote_error_display_falls_back_to_raw_value() {
        let err = RpcError::Remote(json!("boom"));
        assert_eq!(err.to_string(), "remote error: \"boom\"");
        assert_eq!(err.remote_message(), None);
    }

    #[test]
    fn child_exit_display() {
        assert_eq!(
            RpcError::ChildExit { code: Some(1) }.to_string(),
            "tool server exited (exit code 1) before replying"
        );
        assert_eq!(
            RpcError::ChildExit { code: None }.to_string(),
            "tool server exited (no exit code) before replying"
        );
    }
}
