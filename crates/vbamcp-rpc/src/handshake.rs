use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::RpcClient;
use crate::error::{Result, RpcError};
use crate::table::PendingReply;

/// Protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Configuration for the `initialize` / `tools/list` handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Protocol revision sent in `initialize`.
    pub protocol_version: String,
    /// `clientInfo.name`.
    pub client_name: String,
    /// `clientInfo.version`.
    pub client_version: String,
    /// Capabilities object sent in `initialize`.
    pub capabilities: Value,
    /// Deadline for the whole handshake. Enforced here, not by the client.
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_name: "vbamcp".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: json!({ "tools": {}, "resources": {} }),
            timeout: Duration::from_secs(20),
        }
    }
}

impl HandshakeConfig {
    /// Params object for the `initialize` request.
    pub fn initialize_params(&self) -> Value {
        json!({
            "protocolVersion": self.protocol_version,
            "capabilities": self.capabilities,
            "clientInfo": {
                "name": self.client_name,
                "version": self.client_version,
            },
        })
    }
}

/// One entry of a `tools/list` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        rename = "inputSchema",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<Value>,
}

/// What the server told us during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResult {
    /// `protocolVersion` the server answered with, if any.
    pub protocol_version: Option<String>,
    /// `serverInfo` object, passed through.
    pub server_info: Option<Value>,
    /// `capabilities` object, passed through (`null` when absent).
    pub capabilities: Value,
    /// Advertised tools.
    pub tools: Vec<ToolDescriptor>,
}

impl HandshakeResult {
    /// `serverInfo.name`, when present.
    pub fn server_name(&self) -> Option<&str> {
        self.server_info.as_ref()?.get("name")?.as_str()
    }

    /// `serverInfo.version`, when present.
    pub fn server_version(&self) -> Option<&str> {
        self.server_info.as_ref()?.get("version")?.as_str()
    }

    /// Look up an advertised tool by name.
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

/// Run `initialize` then `tools/list`.
///
/// The client imposes no ordering; this is the caller's convention.
pub fn handshake(client: &RpcClient, config: &HandshakeConfig) -> Result<HandshakeResult> {
    let deadline = Instant::now() + config.timeout;

    let init = client.call("initialize", config.initialize_params())?;
    let init = wait_until(init, deadline)?;
    let Value::Object(init) = init else {
        return Err(RpcError::HandshakeFailed(format!(
            "initialize result is not an object: {init}"
        )));
    };

    let protocol_version = init
        .get("protocolVersion")
        .and_then(Value::as_str)
        .map(str::to_string);
    match protocol_version.as_deref() {
        Some(version) if version == config.protocol_version => {}
        Some(version) => warn!(
            requested = %config.protocol_version,
            server = version,
            "server answered with a different protocol version"
        ),
        None => warn!("server did not report a protocol version"),
    }

    let list = client.call("tools/list", json!({}))?;
    let list = wait_until(list, deadline)?;
    let tools = match list.get("tools") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| serde_json::from_value(item.clone()))
            .collect::<serde_json::Result<Vec<ToolDescriptor>>>()
            .map_err(|err| RpcError::HandshakeFailed(format!("bad tool descriptor: {err}")))?,
        _ => {
            return Err(RpcError::HandshakeFailed(
                "tools/list result has no tools array".to_string(),
            ))
        }
    };

    let result = HandshakeResult {
        protocol_version,
        server_info: init.get("serverInfo").cloned(),
        capabilities: init.get("capabilities").cloned().unwrap_or(Value::Null),
        tools,
    };
    info!(
        server = result.server_name().unwrap_or("unknown"),
        protocol = result.protocol_version.as_deref().unwrap_or("unknown"),
        tools = result.tools.len(),
        "handshake complete"
    );
    Ok(result)
}

fn wait_until(reply: PendingReply, deadline: Instant) -> Result<Value> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    reply.wait_timeout(remaining)
}
