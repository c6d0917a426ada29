use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use vbamcp_frame::FrameConfig;

/// How to launch the tool server child process.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Program to execute.
    pub program: OsString,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Environment overlay applied on top of the inherited environment.
    pub env: Vec<(OsString, OsString)>,
    /// Working directory for the child. Default: inherit.
    pub current_dir: Option<PathBuf>,
    /// Line framing limits for the child's output streams.
    pub frame: FrameConfig,
    /// How long `stop()` waits after asking the child to terminate before
    /// killing it outright.
    pub stop_grace: Duration,
}

impl LaunchConfig {
    /// Launch `program` with no arguments and no environment overlay.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            frame: FrameConfig::default(),
            stop_grace: Duration::from_secs(2),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment variable to the overlay. Later entries win.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the child's working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Program name for diagnostics.
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Full command line for diagnostics.
    pub fn display_command(&self) -> String {
        let mut out = self.program_name();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_args_and_env() {
        let config = LaunchConfig::new("node")
            .arg("dist-server/server.js")
            .args(["--stdio", "--quiet"])
            .env("MCP_VBA_ROOT", "/work")
            .current_dir("/tmp");

        assert_eq!(config.args.len(), 3);
        assert_eq!(config.env, vec![("MCP_VBA_ROOT".into(), "/work".into())]);
        assert_eq!(config.current_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(
            config.display_command(),
            "node dist-server/server.js --stdio --quiet"
        );
    }

    #[test]
    fn defaults() {
        let config = LaunchConfig::new("server");
        assert!(config.args.is_empty());
        assert!(config.env.is_empty());
        assert_eq!(config.stop_grace, Duration::from_secs(2));
        assert_eq!(
            config.frame.max_line_len,
            vbamcp_frame::DEFAULT_MAX_LINE_LEN
        );
    }
}
