//! JSON Schema validation of tool-call arguments.
//!
//! Tool servers advertise an `inputSchema` per tool in their `tools/list`
//! result. This crate compiles those schemas and checks `tools/call`
//! arguments against them before a request goes out.
//!
//! Optional: the RPC client only pulls it in with the `schema` feature.

pub mod config;
pub mod error;
pub mod registry;
pub mod validator;

pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use registry::ToolSchemaRegistry;
