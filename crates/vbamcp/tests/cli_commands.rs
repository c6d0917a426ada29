#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use serde_json::Value;

const MOCK: &str = env!("CARGO_BIN_EXE_vbamcp-mock-server");

fn vbamcp() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_vbamcp"));
    for var in ["VBAMCP_SERVER", "MCP_PS_LIST", "MCP_PS_RUN", "MCP_VBA_ROOT"] {
        command.env_remove(var);
    }
    command.args(["--log-level", "error", "--server", MOCK, "--timeout", "10s"]);
    command
}

fn run(args: &[&str]) -> Output {
    vbamcp().args(args).output().expect("vbamcp should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn json_stdout(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "vbamcp-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

#[test]
fn tools_lists_advertised_tools() {
    let output = run(&["--format", "json", "tools", "--require-known"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));

    let tools = json_stdout(&output);
    let names: Vec<&str> = tools
        .as_array()
        .expect("tool array")
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert!(names.contains(&"vba_search_code"));
    assert!(names.contains(&"excel_run_macro"));
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);
}

#[test]
fn call_ping_prints_pong() {
    let output = run(&["--format", "raw", "call", "ping"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "pong");
}

#[test]
fn call_with_invalid_arguments_is_data_invalid() {
    let output = run(&[
        "call",
        "excel_get_module_code",
        "--json",
        r#"{"workbook": 1}"#,
    ]);
    assert_eq!(output.status.code(), Some(60));
    assert!(stderr(&output).contains("schema validation error"));
}

#[test]
fn unknown_tool_is_a_failure() {
    let output = run(&["call", "no_such_tool", "--no-validate"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Tool no_such_tool not found"));
}

#[test]
fn search_outputs_hits() {
    let output = run(&["--format", "json", "search", "Range", "--module", "Module1"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let payload = json_stdout(&output);
    assert_eq!(payload["count"], 2);

    let output = run(&["--format", "raw", "search", "Beep"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        stdout(&output).trim(),
        "'Book1.xlsm'!Sheet1.Worksheet_Change"
    );
}

#[test]
fn code_prints_and_writes_module_source() {
    let output = run(&["--format", "raw", "code", "Book1.xlsm", "Module1"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Public Sub Main()"));

    let dir = unique_temp_dir("code");
    let target = dir.join("Module1.bas");
    let output = run(&[
        "code",
        "Book1.xlsm",
        "Module1",
        "--output",
        target.to_str().expect("utf-8 temp path"),
    ]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let written = std::fs::read_to_string(&target).expect("module file");
    assert!(written.contains("Public Sub Report()"));
    let _ = std::fs::remove_dir_all(&dir);

    let output = run(&["code", "Missing.xlsm", "Module1"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("workbook_not_found"));
}

#[test]
fn macros_need_a_listing_script() {
    let output = run(&["macros", "Module1"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("MCP_PS_LIST not set"));

    let output = run(&["--ps-list", MOCK, "--format", "json", "macros", "Module2"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let entries = json_stdout(&output);
    assert_eq!(entries.as_array().map(Vec::len), Some(1));
    assert_eq!(entries[0]["Proc"], "Solo");
}

#[test]
fn run_reports_success_and_failure() {
    let output = run(&["--ps-run", MOCK, "--format", "pretty", "run", "'Book1.xlsm'!Module1.Main"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "ran 'Book1.xlsm'!Module1.Main");

    let output = run(&["--ps-run", MOCK, "run", "--module", "Module1", "--proc", "Fails"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("1004"));

    let output = run(&["run", "--module", "Module1"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn shell_runs_each_line_against_one_server() {
    let mut child = vbamcp()
        .args(["--format", "json", "shell"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("shell should start");
    child
        .stdin
        .take()
        .expect("stdin piped")
        .write_all(
            b"# smoke\nping\nexcel_get_module_code {\"workbook\":\"Book1.xlsm\",\"module\":\"Module2\"}\nping [1]\nquit\nping\n",
        )
        .expect("stdin writable");
    let output = child.wait_with_output().expect("shell should finish");

    // One bad line makes the run a failure, but later lines still ran.
    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr(&output));
    let lines: Vec<Value> = stdout(&output)
        .lines()
        .map(|line| serde_json::from_str(line).expect("JSON line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["tool"], "ping");
    assert_eq!(lines[0]["result"]["content"][0]["text"], "pong");
    assert_eq!(lines[1]["tool"], "excel_get_module_code");
    assert!(stderr(&output).contains("line 4"));
}

#[test]
fn missing_server_is_a_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_vbamcp"))
        .env_remove("VBAMCP_SERVER")
        .args(["--log-level", "error", "tools"])
        .output()
        .expect("vbamcp should run");
    assert_eq!(output.status.code(), Some(64));
    assert!(stderr(&output).contains("--server"));
}

#[test]
fn unlaunchable_server_is_a_transport_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_vbamcp"))
        .env_remove("VBAMCP_SERVER")
        .args([
            "--log-level",
            "error",
            "--server",
            "/nonexistent/vba-excel-mcp",
            "call",
            "ping",
        ])
        .output()
        .expect("vbamcp should run");
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("failed to start tool server"));
}

#[test]
fn doctor_passes_against_mock_server() {
    let output = run(&["--format", "json", "doctor"]);
    assert_eq!(output.status.code(), Some(0), "stdout: {}", stdout(&output));
    let report = json_stdout(&output);
    assert_eq!(report["overall"], "pass");
    let status = |name: &str| {
        report["checks"]
            .as_array()
            .and_then(|checks| checks.iter().find(|c| c["name"] == name))
            .map(|c| c["status"].clone())
    };
    assert_eq!(status("handshake"), Some(Value::from("pass")));
    assert_eq!(status("ping"), Some(Value::from("pass")));
    assert_eq!(status("tool_coverage"), Some(Value::from("pass")));
}

#[test]
fn doctor_fails_for_missing_server() {
    let output = Command::new(env!("CARGO_BIN_EXE_vbamcp"))
        .env_remove("VBAMCP_SERVER")
        .args(["--log-level", "error", "--format", "raw", "doctor"])
        .output()
        .expect("vbamcp should run");
    assert_eq!(output.status.code(), Some(30));
    assert_eq!(stdout(&output).trim(), "fail");
}

#[test]
fn version_prints_package_version() {
    let output = run(&["version"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        stdout(&output).trim(),
        format!("vbamcp {}", env!("CARGO_PKG_VERSION"))
    );
}
