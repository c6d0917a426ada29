//! JSON-RPC client for stdio tool servers.
//!
//! Requests go out as one JSON object per line on the child's stdin.
//! Responses are matched back to their callers by id, in any order, while
//! log lines and other non-response output are reported as [`Diagnostic`]
//! events instead of being dropped silently.
//!
//! [`Session`] feeds the client whole lines from the transport's stdout pump
//! through [`RpcClient::dispatch_line`]. Callers that own the raw byte stream
//! instead (a socket, a pty, a recorded capture) feed arbitrary chunks
//! through [`RpcClient::dispatch_chunk`] and call
//! [`RpcClient::flush_partial`] at end of stream.
//!
//! ```no_run
//! use serde_json::json;
//! use vbamcp_rpc::{Session, SessionConfig};
//! use vbamcp_transport::LaunchConfig;
//!
//! let session = Session::new(SessionConfig::new(
//!     LaunchConfig::new("node").arg("dist-server/server.js"),
//! ));
//! session.start()?;
//! let result = session.call_tool("ping", json!({}))?;
//! println!("{}", result.first_text().unwrap_or_default());
//! # Ok::<(), vbamcp_rpc::RpcError>(())
//! ```

pub mod client;
pub mod diagnostics;
pub mod error;
pub mod handshake;
pub mod message;
pub mod session;
pub mod table;
pub mod tools;

pub use client::{new_id_source, RpcClient};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{Result, RpcError};
pub use handshake::{handshake, HandshakeConfig, HandshakeResult, ToolDescriptor, PROTOCOL_VERSION};
pub use message::{Inbound, Reply, Request, Response};
pub use session::{Session, SessionConfig, StartOutcome};
pub use table::{CorrelationTable, PendingReply};
pub use tools::ToolResult;
