use std::fmt;
use std::io;

use vbamcp_rpc::RpcError;
use vbamcp_transport::TransportError;

pub const SUCCESS: i32 = 0;
/// The tool ran and reported failure, or the server answered with an error.
pub const FAILURE: i32 = 1;
/// The tool server could not be launched or went away.
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
/// Arguments or results that do not have the expected shape.
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        io::ErrorKind::TimedOut => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Spawn { ref source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        TransportError::Frame(err) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Transport(err) => transport_error(context, err),
        RpcError::NotRunning | RpcError::ChildExit { .. } | RpcError::Abandoned => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        RpcError::HandshakeFailed(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        RpcError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::Remote(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        RpcError::Frame(_)
        | RpcError::Json(_)
        | RpcError::ToolPayload { .. }
        | RpcError::Schema(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn rpc_errors_map_to_exit_codes() {
        assert_eq!(rpc_error("call", RpcError::NotRunning).code, TRANSPORT_ERROR);
        assert_eq!(
            rpc_error("call", RpcError::ChildExit { code: Some(2) }).code,
            TRANSPORT_ERROR
        );
        assert_eq!(
            rpc_error("call", RpcError::Timeout(Duration::from_secs(1))).code,
            TIMEOUT
        );
        assert_eq!(
            rpc_error("call", RpcError::Remote(json!({"code": -32601}))).code,
            FAILURE
        );
    }

    #[test]
    fn spawn_failure_is_a_transport_error() {
        let err = TransportError::Spawn {
            program: "missing-server".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let cli = rpc_error("start failed", RpcError::Transport(err));
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.starts_with("start failed: failed to spawn missing-server"));
    }
}
