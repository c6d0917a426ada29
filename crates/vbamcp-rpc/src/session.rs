use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use vbamcp_transport::{ChildObserver, ChildTransport, ExitInfo, LaunchConfig, TransportError};

use crate::client::{new_id_source, RpcClient};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Result, RpcError};
use crate::handshake::{handshake, HandshakeConfig, HandshakeResult, ToolDescriptor};
use crate::table::PendingReply;
use crate::tools::ToolResult;

/// Configuration for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How to launch the tool server.
    pub launch: LaunchConfig,
    /// Handshake parameters and deadline.
    pub handshake: HandshakeConfig,
    /// Wait applied by the blocking `call*` helpers. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Validation settings for [`Session::call_tool_checked`].
    #[cfg(feature = "schema")]
    pub schema: vbamcp_schema::RegistryConfig,
}

impl SessionConfig {
    pub fn new(launch: LaunchConfig) -> Self {
        Self {
            launch,
            handshake: HandshakeConfig::default(),
            call_timeout: None,
            #[cfg(feature = "schema")]
            schema: vbamcp_schema::RegistryConfig::default(),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// What [`Session::start`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new tool server was spawned and the handshake completed.
    Started { pid: u32 },
    /// A tool server was already running; nothing changed.
    AlreadyRunning { pid: u32 },
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            StartOutcome::Started { pid } | StartOutcome::AlreadyRunning { pid } => *pid,
        }
    }
}

/// One tool server connection: the child process, its RPC client, and the
/// handshake state.
///
/// Nothing is spawned until [`Session::start`]. Each start gets a fresh
/// client, so a late exit from an earlier child can only reject calls made
/// to that child. All of those clients draw ids from one counter, so an id
/// is never sent twice over the session's lifetime. Dropping the session
/// stops the child.
pub struct Session {
    config: SessionConfig,
    transport: Arc<ChildTransport>,
    ids: Arc<AtomicU64>,
    diagnostics: Arc<Diagnostics>,
    state: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    client: Option<Arc<RpcClient>>,
    handshake: Option<HandshakeResult>,
    #[cfg(feature = "schema")]
    schemas: Option<Arc<vbamcp_schema::ToolSchemaRegistry>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            transport: Arc::new(ChildTransport::new()),
            ids: new_id_source(),
            diagnostics: Arc::new(Diagnostics::new()),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Spawn the tool server and run the handshake.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] without doing anything if a
    /// server is up. If the handshake fails the server is stopped again and
    /// the error returned.
    pub fn start(&self) -> Result<StartOutcome> {
        let mut state = self.lock();
        if let Some(pid) = self.transport.pid() {
            return Ok(StartOutcome::AlreadyRunning { pid });
        }

        let client = Arc::new(
            RpcClient::with_diagnostics(self.transport.clone(), Arc::clone(&self.diagnostics))
                .with_id_source(Arc::clone(&self.ids)),
        );
        let observer = Arc::new(SessionObserver {
            client: Arc::clone(&client),
            diagnostics: Arc::clone(&self.diagnostics),
        });

        let pid = match self.transport.start(&self.config.launch, observer) {
            Ok(pid) => pid,
            Err(TransportError::AlreadyRunning { pid }) => {
                return Ok(StartOutcome::AlreadyRunning { pid })
            }
            Err(err) => return Err(err.into()),
        };

        *state = SessionState {
            client: Some(Arc::clone(&client)),
            ..SessionState::default()
        };

        let result = match handshake(&client, &self.config.handshake) {
            Ok(result) => result,
            Err(err) => {
                warn!(pid, error = %err, "handshake failed; stopping tool server");
                self.transport.stop();
                return Err(err);
            }
        };

        #[cfg(feature = "schema")]
        {
            let schemas = match build_schemas(&result.tools, self.config.schema) {
                Ok(schemas) => schemas,
                Err(err) => {
                    warn!(pid, error = %err, "unusable tool list; stopping tool server");
                    self.transport.stop();
                    return Err(err);
                }
            };
            state.schemas = Some(Arc::new(schemas));
        }
        state.handshake = Some(result);

        Ok(StartOutcome::Started { pid })
    }

    /// Start the tool server unless it is already running.
    pub fn ensure_started(&self) -> Result<StartOutcome> {
        match self.transport.pid() {
            Some(pid) => Ok(StartOutcome::AlreadyRunning { pid }),
            None => self.start(),
        }
    }

    /// Stop the tool server. Returns `false` when none was running.
    ///
    /// Outstanding calls are rejected with [`RpcError::ChildExit`] once the
    /// child has been reaped.
    pub fn stop(&self) -> bool {
        let stopped = self.transport.stop();
        if stopped {
            info!("tool server session stopped");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.transport.is_running()
    }

    pub fn pid(&self) -> Option<u32> {
        self.transport.pid()
    }

    /// Send a request without waiting for the reply.
    pub fn send(&self, method: &str, params: Value) -> Result<PendingReply> {
        self.client()?.call(method, params)
    }

    /// Send a request and wait for the reply, bounded by the configured
    /// call timeout.
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        let reply = self.send(method, params)?;
        match self.config.call_timeout {
            Some(timeout) => reply.wait_timeout(timeout),
            None => reply.wait(),
        }
    }

    /// Call a tool and return its result envelope.
    pub fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let reply = self.client()?.call_tool(name, arguments)?;
        let value = match self.config.call_timeout {
            Some(timeout) => reply.wait_timeout(timeout)?,
            None => reply.wait()?,
        };
        ToolResult::from_value(name, value)
    }

    /// Call a tool with typed arguments.
    pub fn call_tool_with<A: Serialize>(&self, name: &str, arguments: &A) -> Result<ToolResult> {
        self.call_tool(name, serde_json::to_value(arguments)?)
    }

    /// Call a tool after checking the arguments against its advertised
    /// input schema.
    #[cfg(feature = "schema")]
    pub fn call_tool_checked(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let schemas = self.lock().schemas.clone();
        if let Some(schemas) = schemas {
            schemas.validate(name, &arguments)?;
        }
        self.call_tool(name, arguments)
    }

    /// Call a tool. Without the `schema` feature no validation happens.
    #[cfg(not(feature = "schema"))]
    pub fn call_tool_checked(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        self.call_tool(name, arguments)
    }

    /// Tools advertised in the last successful handshake.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.lock()
            .handshake
            .as_ref()
            .map(|result| result.tools.clone())
            .unwrap_or_default()
    }

    /// Result of the last successful handshake.
    pub fn handshake_result(&self) -> Option<HandshakeResult> {
        self.lock().handshake.clone()
    }

    /// Diagnostics channel shared by every client this session creates.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn client(&self) -> Result<Arc<RpcClient>> {
        let client = self.lock().client.clone().ok_or(RpcError::NotRunning)?;
        if !client.is_running() {
            return Err(RpcError::NotRunning);
        }
        Ok(client)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.transport.stop();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("command", &self.config.launch.display_command())
            .field("pid", &self.transport.pid())
            .finish()
    }
}

struct SessionObserver {
    client: Arc<RpcClient>,
    diagnostics: Arc<Diagnostics>,
}

impl ChildObserver for SessionObserver {
    fn on_stdout_line(&self, line: &[u8]) {
        self.client.dispatch_line(line);
    }

    fn on_stderr_line(&self, line: &[u8]) {
        self.diagnostics.emit(Diagnostic::ServerStderr {
            line: String::from_utf8_lossy(line).into_owned(),
        });
    }

    fn on_exit(&self, exit: &ExitInfo) {
        self.client.fail_all_pending(exit.code);
    }
}

#[cfg(feature = "schema")]
fn build_schemas(
    tools: &[ToolDescriptor],
    config: vbamcp_schema::RegistryConfig,
) -> Result<vbamcp_schema::ToolSchemaRegistry> {
    let list = serde_json::to_value(tools)?;
    Ok(vbamcp_schema::ToolSchemaRegistry::from_tool_list(&list, config)?)
}
