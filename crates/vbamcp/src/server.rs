use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tracing::debug;
use vbamcp_rpc::{Session, SessionConfig};
use vbamcp_transport::LaunchConfig;

use crate::exit::{rpc_error, CliError, CliResult};

/// Where the tool server lives and how to launch it.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Tool server program to launch.
    #[arg(long, value_name = "PROGRAM", env = "VBAMCP_SERVER", global = true)]
    pub server: Option<String>,

    /// Argument for the tool server (repeatable).
    #[arg(
        long = "server-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        global = true
    )]
    pub server_args: Vec<String>,

    /// Working directory for the tool server.
    #[arg(long, value_name = "DIR", global = true)]
    pub server_dir: Option<PathBuf>,

    /// Macro listing script, passed to the server as MCP_PS_LIST.
    #[arg(long, value_name = "PATH", env = "MCP_PS_LIST", global = true)]
    pub ps_list: Option<PathBuf>,

    /// Macro runner script, passed to the server as MCP_PS_RUN.
    #[arg(long, value_name = "PATH", env = "MCP_PS_RUN", global = true)]
    pub ps_run: Option<PathBuf>,

    /// Root of exported VBA sources, passed to the server as MCP_VBA_ROOT.
    #[arg(long, value_name = "DIR", env = "MCP_VBA_ROOT", global = true)]
    pub vba_root: Option<PathBuf>,

    /// Time to wait for each tool reply (e.g. 30s, 500ms, none).
    #[arg(long, value_name = "DURATION", default_value = "60s", global = true)]
    pub timeout: String,

    /// Time allowed for the initialize handshake.
    #[arg(long, value_name = "DURATION", default_value = "20s", global = true)]
    pub handshake_timeout: String,
}

impl ServerArgs {
    pub fn launch_config(&self) -> CliResult<LaunchConfig> {
        let program = self.server.as_deref().ok_or_else(|| {
            CliError::usage("no tool server configured (use --server or VBAMCP_SERVER)")
        })?;

        let mut launch = LaunchConfig::new(program).args(&self.server_args);
        if let Some(dir) = &self.server_dir {
            launch = launch.current_dir(dir);
        }
        for (key, value) in [
            ("MCP_PS_LIST", &self.ps_list),
            ("MCP_PS_RUN", &self.ps_run),
            ("MCP_VBA_ROOT", &self.vba_root),
        ] {
            if let Some(value) = value {
                launch = launch.env(key, value);
            }
        }
        Ok(launch)
    }

    pub fn session_config(&self) -> CliResult<SessionConfig> {
        let mut config = SessionConfig::new(self.launch_config()?);
        config.call_timeout = parse_timeout(&self.timeout)?;
        if let Some(handshake) = parse_timeout(&self.handshake_timeout)? {
            config.handshake.timeout = handshake;
        }
        Ok(config)
    }

    /// Launch the tool server and complete the handshake.
    pub fn connect(&self) -> CliResult<Session> {
        let config = self.session_config()?;
        debug!(command = %config.launch.display_command(), "launching tool server");
        let session = Session::new(config);
        session
            .start()
            .map_err(|err| rpc_error("failed to start tool server", err))?;
        Ok(session)
    }
}

/// `none` disables the timeout.
pub fn parse_timeout(input: &str) -> CliResult<Option<Duration>> {
    if input.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_duration(input).map(Some)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
