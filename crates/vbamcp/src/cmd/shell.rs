use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};
use vbamcp_rpc::{RpcError, Session};

use crate::cmd::call::parse_arguments;
use crate::cmd::ShellArgs;
use crate::exit::{io_error, rpc_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_json, print_raw, OutputFormat};
use crate::server::ServerArgs;

#[derive(Debug, PartialEq)]
enum ShellLine {
    Skip,
    Quit,
    Call { tool: String, arguments: Value },
}

impl ShellLine {
    /// `tool {json}`; blank lines and `#` comments are skipped.
    fn parse(line: &str) -> CliResult<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(ShellLine::Skip);
        }
        let (tool, rest) = match line.split_once(char::is_whitespace) {
            Some((tool, rest)) => (tool, rest.trim()),
            None => (line, ""),
        };
        if matches!(tool, "quit" | "exit") && rest.is_empty() {
            return Ok(ShellLine::Quit);
        }
        let arguments = if rest.is_empty() {
            json!({})
        } else {
            parse_arguments(rest)?
        };
        Ok(ShellLine::Call {
            tool: tool.to_string(),
            arguments,
        })
    }
}

pub fn run(args: ShellArgs, server: &ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let session = Arc::new(server.connect()?);
    let interrupted = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&session), Arc::clone(&interrupted))?;

    let mut failures = 0usize;
    for (index, line) in io::stdin().lock().lines().enumerate() {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        let line = line.map_err(|err| io_error("read stdin", err))?;
        let line_no = index + 1;

        let (tool, arguments) = match ShellLine::parse(&line) {
            Ok(ShellLine::Skip) => continue,
            Ok(ShellLine::Quit) => break,
            Ok(ShellLine::Call { tool, arguments }) => (tool, arguments),
            Err(err) => {
                eprintln!("line {line_no}: {err}");
                failures += 1;
                if args.fail_fast {
                    break;
                }
                continue;
            }
        };

        match session.call_tool_checked(&tool, arguments) {
            Ok(result) => {
                match format {
                    OutputFormat::Json => print_json(&json!({ "tool": tool, "result": result })),
                    _ => print_raw(&result.text()),
                }
                if result.is_error {
                    failures += 1;
                }
            }
            Err(_) if interrupted.load(Ordering::SeqCst) => break,
            Err(err @ (RpcError::ChildExit { .. } | RpcError::NotRunning)) => {
                return Err(rpc_error(&format!("line {line_no}: {tool}"), err));
            }
            Err(err) => {
                warn!(line = line_no, tool = %tool, error = %err, "call failed");
                eprintln!("line {line_no}: {tool}: {err}");
                failures += 1;
            }
        }

        if failures > 0 && args.fail_fast {
            break;
        }
    }

    session.stop();
    info!(failures, "shell finished");
    Ok(if failures > 0 { FAILURE } else { SUCCESS })
}

fn install_ctrlc_handler(session: Arc<Session>, interrupted: Arc<AtomicBool>) -> CliResult<()> {
    // The main thread may be blocked reading stdin, so the handler ends the
    // process itself once the server is down.
    ctrlc::set_handler(move || {
        interrupted.store(true, Ordering::SeqCst);
        session.stop();
        std::process::exit(SUCCESS);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
