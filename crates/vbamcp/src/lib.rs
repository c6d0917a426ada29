//! Client for line-delimited JSON-RPC tool servers running as child processes.
//!
//! vbamcp launches a tool server (such as the VBA/Excel tool server), talks
//! JSON-RPC to it over stdin/stdout one object per line, and decodes the
//! results of its tools.
//!
//! # Crate Structure
//!
//! - [`frame`]: newline-delimited JSON framing
//! - [`transport`]: child process launch, stdio pumps, and lifecycle
//! - [`rpc`]: request/response correlation, handshake, sessions, and tool
//!   contracts (behind the default `rpc` feature)
//! - [`schema`]: tool argument validation against advertised input schemas
//!   (behind the `schema` feature)

/// Re-export frame types.
pub mod frame {
    pub use vbamcp_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use vbamcp_transport::*;
}

/// Re-export RPC client and session types (requires `rpc` feature).
#[cfg(feature = "rpc")]
pub mod rpc {
    pub use vbamcp_rpc::*;
}

/// Re-export schema types (requires `schema` feature).
#[cfg(feature = "schema")]
pub mod schema {
    pub use vbamcp_schema::*;
}
