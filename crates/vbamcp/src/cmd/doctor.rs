use std::env;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use vbamcp_rpc::tools::{KNOWN_TOOLS, PING};
use vbamcp_rpc::Session;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, OutputFormat};
use crate::server::ServerArgs;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
            CheckStatus::Info => "INFO",
            CheckStatus::Skip => "SKIP",
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    schema_id: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: DoctorArgs, server: &ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let mut checks = vec![server_configured_check(server), server_resolvable_check(server)];
    checks.push(script_check("ps_list", "MCP_PS_LIST", server.ps_list.as_deref()));
    checks.push(script_check("ps_run", "MCP_PS_RUN", server.ps_run.as_deref()));
    checks.push(vba_root_check(server.vba_root.as_deref()));

    let launchable = !checks
        .iter()
        .any(|c| c.name.starts_with("server_") && c.status == CheckStatus::Fail);
    if args.offline {
        checks.push(CheckResult::new("handshake", CheckStatus::Skip, "--offline"));
    } else if !launchable {
        checks.push(CheckResult::new(
            "handshake",
            CheckStatus::Skip,
            "tool server is not launchable",
        ));
    } else {
        checks.extend(live_checks(server));
    }
    checks.push(compiled_features_check());

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        schema_id: "https://schemas.3leaps.dev/vbamcp/cli/v1/doctor-report.schema.json",
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };
    print_doctor(&output, format);

    Ok(if has_fail { HEALTH_CHECK_FAILED } else { SUCCESS })
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("vbamcp doctor\n");
            for check in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    check.status.label(),
                    check.name,
                    check.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn server_configured_check(server: &ServerArgs) -> CheckResult {
    match server.launch_config() {
        Ok(launch) => CheckResult::new(
            "server_configured",
            CheckStatus::Pass,
            launch.display_command(),
        ),
        Err(err) => CheckResult::new("server_configured", CheckStatus::Fail, err.message),
    }
}

fn server_resolvable_check(server: &ServerArgs) -> CheckResult {
    let Some(program) = server.server.as_deref() else {
        return CheckResult::new("server_resolvable", CheckStatus::Skip, "no server configured");
    };
    match resolve_program(program) {
        Some(path) => CheckResult::new(
            "server_resolvable",
            CheckStatus::Pass,
            path.display().to_string(),
        ),
        None => CheckResult::new(
            "server_resolvable",
            CheckStatus::Fail,
            format!("{program} not found"),
        ),
    }
}

/// Locate `program` the way the OS would when spawning it.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = env::var_os("PATH")?;
    env::split_paths(&search).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

fn script_check(name: &'static str, var: &str, path: Option<&Path>) -> CheckResult {
    match path {
        None => CheckResult::new(name, CheckStatus::Info, format!("{var} not set")),
        Some(path) if path.is_file() => {
            CheckResult::new(name, CheckStatus::Pass, path.display().to_string())
        }
        Some(path) => CheckResult::new(
            name,
            CheckStatus::Warn,
            format!("{var}={} does not exist", path.display()),
        ),
    }
}

fn vba_root_check(path: Option<&Path>) -> CheckResult {
    match path {
        None => CheckResult::new("vba_root", CheckStatus::Info, "MCP_VBA_ROOT not set"),
        Some(path) if path.is_dir() => {
            CheckResult::new("vba_root", CheckStatus::Pass, path.display().to_string())
        }
        Some(path) => CheckResult::new(
            "vba_root",
            CheckStatus::Warn,
            format!("{} is not a directory", path.display()),
        ),
    }
}

fn live_checks(server: &ServerArgs) -> Vec<CheckResult> {
    let session = match server.connect() {
        Ok(session) => session,
        Err(err) => {
            return vec![CheckResult::new("handshake", CheckStatus::Fail, err.message)];
        }
    };

    let mut checks = vec![handshake_check(&session), ping_check(&session)];
    checks.push(tool_coverage_check(&session));
    session.stop();
    checks
}

fn handshake_check(session: &Session) -> CheckResult {
    let Some(result) = session.handshake_result() else {
        return CheckResult::new("handshake", CheckStatus::Fail, "no handshake result");
    };
    let status = match result.protocol_version.as_deref() {
        Some(version) if version == vbamcp_rpc::PROTOCOL_VERSION => CheckStatus::Pass,
        _ => CheckStatus::Warn,
    };
    CheckResult::new(
        "handshake",
        status,
        format!(
            "{} {} (protocol {}, {} tools)",
            result.server_name().unwrap_or("unknown"),
            result.server_version().unwrap_or("?"),
            result.protocol_version.as_deref().unwrap_or("unknown"),
            result.tools.len()
        ),
    )
}

fn ping_check(session: &Session) -> CheckResult {
    match session.call_tool(PING, json!({})) {
        Ok(result) if result.first_text().map(str::trim) == Some("pong") => {
            CheckResult::new("ping", CheckStatus::Pass, "pong")
        }
        Ok(result) => CheckResult::new(
            "ping",
            CheckStatus::Warn,
            format!("unexpected answer: {}", result.text()),
        ),
        Err(err) => CheckResult::new("ping", CheckStatus::Fail, err.to_string()),
    }
}

fn tool_coverage_check(session: &Session) -> CheckResult {
    let advertised = session.tools();
    let missing: Vec<&str> = KNOWN_TOOLS
        .iter()
        .copied()
        .filter(|name| !advertised.iter().any(|tool| tool.name == *name))
        .collect();
    if missing.is_empty() {
        CheckResult::new(
            "tool_coverage",
            CheckStatus::Pass,
            format!("{} known tools advertised", KNOWN_TOOLS.len()),
        )
    } else {
        CheckResult::new(
            "tool_coverage",
            CheckStatus::Warn,
            format!("missing: {}", missing.join(", ")),
        )
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = vec!["rpc"];
    if cfg!(feature = "schema") {
        features.push("schema");
    }
    features.push("cli");
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_script_is_a_warning() {
        let check = script_check("ps_list", "MCP_PS_LIST", Some(Path::new("/nonexistent/list.ps1")));
        assert_eq!(check.status, CheckStatus::Warn);
        assert_eq!(script_check("ps_run", "MCP_PS_RUN", None).status, CheckStatus::Info);
    }

    #[cfg(unix)]
    #[test]
    fn resolves_programs_on_path_and_by_path() {
        assert!(resolve_program("sh").is_some());
        assert_eq!(resolve_program("/bin/sh"), Some(PathBuf::from("/bin/sh")));
        assert!(resolve_program("vbamcp-definitely-not-installed").is_none());
        assert!(resolve_program("./missing/server").is_none());
    }
}
