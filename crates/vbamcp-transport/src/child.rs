use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use vbamcp_frame::{FrameConfig, FrameError, LineReader, LineWriter};

use crate::config::LaunchConfig;
use crate::error::{Result, TransportError};
use crate::observer::{ChildObserver, ExitInfo, LineSink};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const STDOUT_DRAIN: Duration = Duration::from_millis(250);

/// Launches and owns one tool server child process at a time.
///
/// Two states: stopped (no handle) and running. `start` moves to running,
/// `stop` or the child exiting on its own moves back to stopped. Exit is
/// observed by a per-start watcher thread, not by stdout closing. Each start
/// bumps a generation counter so a late exit from an earlier child never
/// clears a newer one.
pub struct ChildTransport {
    state: Arc<Mutex<TransportState>>,
}

#[derive(Default)]
struct TransportState {
    running: Option<RunningChild>,
    generation: u64,
}

struct RunningChild {
    generation: u64,
    pid: u32,
    program: String,
    child: Arc<Mutex<Child>>,
    stdin: Arc<Mutex<LineWriter<ChildStdin>>>,
    stop_grace: Duration,
}

impl ChildTransport {
    /// Create a stopped transport.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::default())),
        }
    }

    /// Spawn the child and start pumping its output to `observer`.
    ///
    /// Fails with [`TransportError::AlreadyRunning`] if a child is active.
    /// Returns the child's pid.
    pub fn start(&self, config: &LaunchConfig, observer: Arc<dyn ChildObserver>) -> Result<u32> {
        let mut state = lock(&self.state);
        if let Some(running) = &state.running {
            return Err(TransportError::AlreadyRunning { pid: running.pid });
        }

        let program = config.program_name();
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &config.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let (stdin, stdout, stderr) = match take_pipes(&mut child) {
            Ok(pipes) => pipes,
            Err(err) => {
                abort_child(&mut child);
                return Err(err);
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let child = Arc::new(Mutex::new(child));

        let pumps = spawn_pumps(
            Arc::clone(&self.state),
            Arc::clone(&child),
            stdout,
            stderr,
            config.frame.clone(),
            generation,
            observer,
        );
        if let Err(err) = pumps {
            abort_child(&mut lock(&child));
            return Err(err);
        }

        info!(pid, generation, command = %config.display_command(), "tool server started");

        state.running = Some(RunningChild {
            generation,
            pid,
            program,
            child,
            stdin: Arc::new(Mutex::new(LineWriter::with_config(
                stdin,
                config.frame.clone(),
            ))),
            stop_grace: config.stop_grace,
        });

        Ok(pid)
    }

    /// Stop the child if one is running.
    ///
    /// Closes its stdin, asks it to terminate, and kills it if it is still
    /// alive after the configured grace period. Returns `false` when there was
    /// nothing to stop. Safe to call any number of times.
    pub fn stop(&self) -> bool {
        let running = lock(&self.state).running.take();
        let Some(running) = running else {
            return false;
        };

        info!(
            pid = running.pid,
            program = %running.program,
            generation = running.generation,
            "stopping tool server"
        );
        drop(running.stdin);
        terminate(&running.child, running.pid, running.stop_grace);
        true
    }

    /// Whether a child is currently running.
    pub fn is_running(&self) -> bool {
        lock(&self.state).running.is_some()
    }

    /// Pid of the running child.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.state).running.as_ref().map(|r| r.pid)
    }

    /// Generation of the most recent start (0 before the first start).
    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    /// Write one payload as a line to the child's stdin.
    pub fn send_line(&self, payload: &[u8]) -> Result<()> {
        let stdin = {
            let state = lock(&self.state);
            let running = state.running.as_ref().ok_or(TransportError::NotRunning)?;
            Arc::clone(&running.stdin)
        };
        let mut writer = lock(&stdin);
        writer.send(payload)?;
        Ok(())
    }
}

impl Default for ChildTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChildTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LineSink for ChildTransport {
    fn is_running(&self) -> bool {
        ChildTransport::is_running(self)
    }

    fn send_line(&self, payload: &[u8]) -> Result<()> {
        ChildTransport::send_line(self, payload)
    }
}

impl std::fmt::Debug for ChildTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ChildTransport")
            .field("pid", &state.running.as_ref().map(|r| r.pid))
            .field("generation", &state.generation)
            .finish()
    }
}

fn take_pipes(child: &mut Child) -> Result<(ChildStdin, ChildStdout, ChildStderr)> {
    let stdin = child
        .stdin
        .take()
        .ok_or(TransportError::MissingPipe("stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or(TransportError::MissingPipe("stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or(TransportError::MissingPipe("stderr"))?;
    Ok((stdin, stdout, stderr))
}

fn spawn_pumps(
    state: Arc<Mutex<TransportState>>,
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    stderr: ChildStderr,
    frame: FrameConfig,
    generation: u64,
    observer: Arc<dyn ChildObserver>,
) -> Result<()> {
    let stderr_observer = Arc::clone(&observer);
    let stderr_frame = frame.clone();
    thread::Builder::new()
        .name(format!("vbamcp-stderr-{generation}"))
        .spawn(move || pump_stderr(stderr, stderr_frame, stderr_observer))?;

    // Dropped by the stdout pump when it finishes, which the watcher sees as
    // a disconnect.
    let (stdout_done, stdout_closed) = mpsc::channel::<()>();
    let stdout_observer = Arc::clone(&observer);
    let stdout_child = Arc::clone(&child);
    thread::Builder::new()
        .name(format!("vbamcp-stdout-{generation}"))
        .spawn(move || {
            pump_stdout(stdout_child, stdout, frame, generation, stdout_observer);
            drop(stdout_done);
        })?;

    thread::Builder::new()
        .name(format!("vbamcp-exit-{generation}"))
        .spawn(move || watch_exit(state, child, stdout_closed, generation, observer))?;

    Ok(())
}

fn pump_stdout(
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    frame: FrameConfig,
    generation: u64,
    observer: Arc<dyn ChildObserver>,
) {
    let mut reader = LineReader::with_config(stdout, frame);
    loop {
        match reader.read_line() {
            Ok(line) => {
                debug!(
                    target: "vbamcp::server",
                    generation,
                    line = %String::from_utf8_lossy(&line),
                    "stdout"
                );
                observer.on_stdout_line(&line);
            }
            Err(FrameError::ConnectionClosed) => break,
            Err(err @ FrameError::LineTooLong { .. }) => {
                warn!(generation, error = %err, "dropping oversized stdout line");
            }
            Err(err) => {
                warn!(generation, error = %err, "stdout read failed; killing tool server");
                let _ = lock(&child).kill();
                break;
            }
        }
    }
}

/// Waits for the child process itself to exit, independent of its stdout.
///
/// A descendant can keep stdout open after the child is gone, so the pump
/// only gets `STDOUT_DRAIN` to deliver lines already written before the exit
/// is reported.
fn watch_exit(
    state: Arc<Mutex<TransportState>>,
    child: Arc<Mutex<Child>>,
    stdout_closed: Receiver<()>,
    generation: u64,
    observer: Arc<dyn ChildObserver>,
) {
    let status = wait_for_exit(&child);

    if let Err(RecvTimeoutError::Timeout) = stdout_closed.recv_timeout(STDOUT_DRAIN) {
        debug!(generation, "stdout still held open after exit");
    }

    let requested = {
        let mut state = lock(&state);
        match &state.running {
            Some(running) if running.generation == generation => {
                state.running = None;
                false
            }
            _ => true,
        }
    };

    let exit = exit_info(generation, status, requested);
    if requested {
        info!(generation, status = %exit, "tool server stopped");
    } else {
        info!(generation, status = %exit, "tool server exited");
    }
    observer.on_exit(&exit);
}

fn pump_stderr(stderr: ChildStderr, frame: FrameConfig, observer: Arc<dyn ChildObserver>) {
    for line in LineReader::with_config(stderr, frame) {
        match line {
            Ok(line) => {
                info!(
                    target: "vbamcp::server",
                    "stderr: {}",
                    String::from_utf8_lossy(&line)
                );
                observer.on_stderr_line(&line);
            }
            Err(FrameError::LineTooLong { size, .. }) => {
                debug!(size, "dropping oversized stderr line");
            }
            Err(err) => {
                debug!(error = %err, "stderr read failed");
                break;
            }
        }
    }
}

fn wait_for_exit(child: &Mutex<Child>) -> Option<ExitStatus> {
    loop {
        match lock(child).try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "failed to reap tool server");
                return None;
            }
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

fn terminate(child: &Mutex<Child>, pid: u32, grace: Duration) {
    request_terminate(child, pid);

    let deadline = Instant::now() + grace;
    loop {
        match lock(child).try_wait() {
            Ok(Some(_)) | Err(_) => return,
            Ok(None) => {}
        }
        if Instant::now() >= deadline {
            warn!(pid, ?grace, "tool server ignored termination request; killing");
            abort_child(&mut lock(child));
            return;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn request_terminate(child: &Mutex<Child>, pid: u32) {
    // Hold the lock across the liveness check so the exit watcher cannot reap
    // the child (and free its pid) before the signal is sent.
    let mut guard = lock(child);
    if !matches!(guard.try_wait(), Ok(None)) {
        return;
    }
    let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
        let _ = guard.kill();
        return;
    };

    // SAFETY: `raw_pid` names an unreaped child of this process (checked above
    // under the lock), so SIGTERM cannot reach an unrelated process.
    let rc = unsafe { libc::kill(raw_pid, libc::SIGTERM) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_terminate(child: &Mutex<Child>, _pid: u32) {
    let _ = lock(child).kill();
}

fn abort_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn exit_info(generation: u64, status: Option<ExitStatus>, requested: bool) -> ExitInfo {
    use std::os::unix::process::ExitStatusExt;
    ExitInfo {
        generation,
        code: status.and_then(|s| s.code()),
        signal: status.and_then(|s| s.signal()),
        requested,
    }
}

#[cfg(not(unix))]
fn exit_info(generation: u64, status: Option<ExitStatus>, requested: bool) -> ExitInfo {
    ExitInfo {
        generation,
        code: status.and_then(|s| s.code()),
        signal: None,
        requested,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::mpsc::{self, Receiver, Sender};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug, PartialEq)]
    enum Event {
        Stdout(String),
        Stderr(String),
        Exit(ExitInfo),
    }

    struct Recorder {
        tx: Sender<Event>,
    }

    impl ChildObserver for Recorder {
        fn on_stdout_line(&self, line: &[u8]) {
            let _ = self
                .tx
                .send(Event::Stdout(String::from_utf8_lossy(line).into_owned()));
        }

        fn on_stderr_line(&self, line: &[u8]) {
            let _ = self
                .tx
                .send(Event::Stderr(String::from_utf8_lossy(line).into_owned()));
        }

        fn on_exit(&self, exit: &ExitInfo) {
            let _ = self.tx.send(Event::Exit(*exit));
        }
    }

    fn recorder() -> (Arc<Recorder>, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Recorder { tx }), rx)
    }

    fn sh(script: &str) -> LaunchConfig {
        LaunchConfig::new("/bin/sh").arg("-c").arg(script)
    }

    fn next_exit(rx: &Receiver<Event>) -> ExitInfo {
        loop {
            match rx.recv_timeout(WAIT).expect("child should exit") {
                Event::Exit(exit) => return exit,
                _ => continue,
            }
        }
    }

    #[test]
    fn stdout_lines_then_exit_clears_handle() {
        let transport = ChildTransport::new();
        let (observer, rx) = recorder();

        transport
            .start(&sh("printf 'one\\ntwo\\n'; exit 3"), observer)
            .unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Event::Stdout("one".into()));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Event::Stdout("two".into()));
        let exit = next_exit(&rx);
        assert_eq!(exit.code, Some(3));
        assert_eq!(exit.generation, 1);
        assert!(!exit.requested);
        assert!(!transport.is_running());
        assert!(matches!(
            transport.send_line(b"{}"),
            Err(TransportError::NotRunning)
        ));
    }

    #[test]
    fn exit_is_reported_while_descendant_holds_stdout() {
        let transport = ChildTransport::new();
        let (observer, rx) = recorder();

        transport
            .start(&sh("echo ready; sleep 10 & exit 7"), observer)
            .unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Event::Stdout("ready".into()));
        let exit = next_exit(&rx);
        assert_eq!(exit.code, Some(7));
        assert!(!exit.requested);
        assert!(!transport.is_running());
        assert_eq!(transport.pid(), None);
    }

    #[test]
    fn stderr_is_reported_separately() {
        let transport = ChildTransport::new();
        let (observer, rx) = recorder();

        transport
            .start(&sh("echo 'boot log' 1>&2; exit 0"), observer)
            .unwrap();

        let mut stderr = None;
        let mut exit = None;
        while stderr.is_none() || exit.is_none() {
            match rx.recv_timeout(WAIT).unwrap() {
                Event::Stderr(line) => stderr = Some(line),
                Event::Stdout(line) => panic!("unexpected stdout line: {line}"),
                Event::Exit(info) => exit = Some(info),
            }
        }
        assert_eq!(stderr.as_deref(), Some("boot log"));
        assert_eq!(exit.map(|e| e.code), Some(Some(0)));
    }

    #[test]
    fn second_start_is_already_running_and_stop_is_idempotent() {
        let transport = ChildTransport::new();
        let (observer, rx) = recorder();

        let pid = transport.start(&LaunchConfig::new("cat"), observer.clone()).unwrap();
        assert_eq!(transport.pid(), Some(pid));

        let second = transport.start(&LaunchConfig::new("cat"), observer);
        assert!(matches!(
            second,
            Err(TransportError::AlreadyRunning { pid: p }) if p == pid
        ));

        assert!(transport.stop());
        assert!(!transport.stop());
        assert!(!transport.is_running());

        let exit = next_exit(&rx);
        assert!(exit.requested);
    }

    #[test]
    fn send_line_reaches_child_stdin() {
        let transport = ChildTransport::new();
        let (observer, rx) = recorder();

        transport.start(&LaunchConfig::new("cat"), observer).unwrap();
        transport.send_line(br#"{"jsonrpc":"2.0","id":1}"#).unwrap();

        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Event::Stdout(r#"{"jsonrpc":"2.0","id":1}"#.into())
        );
        transport.stop();
    }

    #[test]
    fn send_line_rejects_embedded_newline() {
        let transport = ChildTransport::new();
        let (observer, _rx) = recorder();

        transport.start(&LaunchConfig::new("cat"), observer).unwrap();
        let err = transport.send_line(b"a\nb").unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::EmbeddedNewline { .. })
        ));
        transport.stop();
    }

    #[test]
    fn send_line_when_stopped_is_not_running() {
        let transport = ChildTransport::new();
        assert!(matches!(
            transport.send_line(b"{}"),
            Err(TransportError::NotRunning)
        ));
    }

    #[test]
    fn env_overlay_reaches_child() {
        let transport = ChildTransport::new();
        let (observer, rx) = recorder();

        let config = sh("echo \"$MCP_VBA_ROOT\"").env("MCP_VBA_ROOT", "/work/vba");
        transport.start(&config, observer).unwrap();

        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Event::Stdout("/work/vba".into())
        );
    }

    #[test]
    fn spawn_failure_is_reported() {
        let transport = ChildTransport::new();
        let (observer, _rx) = recorder();

        let result = transport.start(
            &LaunchConfig::new("/nonexistent/vbamcp-no-such-server"),
            observer,
        );
        assert!(matches!(result, Err(TransportError::Spawn { .. })));
        assert!(!transport.is_running());
        assert_eq!(transport.generation(), 0);
    }

    #[test]
    fn stop_kills_child_that_ignores_sigterm() {
        let transport = ChildTransport::new();
        let (observer, rx) = recorder();

        let mut config = sh("trap '' TERM; echo ready; while :; do sleep 1; done");
        config.stop_grace = Duration::from_millis(100);
        transport.start(&config, observer).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Event::Stdout("ready".into()));

        assert!(transport.stop());
        let exit = next_exit(&rx);
        assert!(exit.requested);
        assert_eq!(exit.signal, Some(libc::SIGKILL));
    }

    #[test]
    fn restart_after_exit_uses_new_generation() {
        let transport = ChildTransport::new();
        let (observer, rx) = recorder();

        transport.start(&sh("exit 0"), observer.clone()).unwrap();
        assert_eq!(next_exit(&rx).generation, 1);

        transport.start(&LaunchConfig::new("cat"), observer).unwrap();
        assert_eq!(transport.generation(), 2);
        assert!(transport.is_running());
        transport.stop();
        assert_eq!(next_exit(&rx).generation, 2);
    }
}
