//! Stand-in for the VBA/Excel tool server.
//!
//! Speaks line-delimited JSON-RPC on stdio and answers the same tools from a
//! fixed in-memory workbook, so the client and CLI can be exercised without
//! Excel. Like the real server it prints a banner on stdout before any
//! response and chats on stderr.
//!
//! Two extra tools exist for tests: `mock_sleep` replies after a delay on
//! its own thread, and `mock_exit` terminates the process without replying.
//! Regex searches match the pattern literally.

use std::io::{self, Stdout};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use vbamcp::frame::{FrameError, LineReader, LineWriter};

type Writer = Arc<Mutex<LineWriter<Stdout>>>;

const SERVER_NAME: &str = "vba-excel-mcp";
const SERVER_VERSION: &str = "0.1.0";
const WORKBOOK: &str = "Book1.xlsm";

struct Module {
    name: &'static str,
    comp_type: i64,
    code: &'static str,
}

static MODULES: [Module; 3] = [
    Module {
        name: "Module1",
        comp_type: 1,
        code: "Attribute VB_Name = \"Module1\"\r\n\
               Option Explicit\r\n\
               \r\n\
               Public Sub Main()\r\n\
               \x20   Range(\"A1\").Value = \"hello\"\r\n\
               \x20   Report\r\n\
               End Sub\r\n\
               \r\n\
               Public Sub Report()\r\n\
               \x20   Debug.Print Range(\"A1\").Value\r\n\
               End Sub\r\n\
               \r\n\
               Public Sub Fails()\r\n\
               \x20   Err.Raise 1004\r\n\
               End Sub\r\n",
    },
    Module {
        name: "Module2",
        comp_type: 1,
        code: "Attribute VB_Name = \"Module2\"\r\n\
               Public Function Solo() As Long\r\n\
               \x20   Solo = 42\r\n\
               End Function\r\n",
    },
    Module {
        name: "Sheet1",
        comp_type: 100,
        code: "Private Sub Worksheet_Change(ByVal Target As Range)\r\n\
               \x20   If Target.Address = \"$A$1\" Then Beep\r\n\
               End Sub\r\n",
    },
];

fn main() {
    let writer: Writer = Arc::new(Mutex::new(LineWriter::new(io::stdout())));
    if send_text(&writer, &format!("# {SERVER_NAME} server: booting...")).is_err() {
        return;
    }
    eprintln!("{SERVER_NAME}: ready on stdio");

    for line in LineReader::new(io::stdin()) {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                eprintln!("{SERVER_NAME}: read error: {err}");
                continue;
            }
        };
        let request: Value = match serde_json::from_slice(&line) {
            Ok(request) => request,
            Err(err) => {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": format!("Parse error: {err}") }
                });
                let _ = send(&writer, &reply);
                continue;
            }
        };
        // Notifications get no reply.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let outcome = match method {
            "initialize" => Ok(initialize(&params)),
            "tools/list" => Ok(Some(json!({ "tools": tool_list() }))),
            "tools/call" => call_tool(&writer, &id, &params),
            _ => Err(json!({ "code": -32601, "message": format!("Method not found: {method}") })),
        };
        let reply = match outcome {
            Ok(Some(result)) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Ok(None) => continue,
            Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        };
        if send(&writer, &reply).is_err() {
            break;
        }
    }
}

fn send(writer: &Writer, value: &Value) -> Result<(), FrameError> {
    writer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .send_json(value)
}

fn send_text(writer: &Writer, text: &str) -> Result<(), FrameError> {
    writer
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .send(text.as_bytes())
}

fn initialize(params: &Value) -> Option<Value> {
    let protocol = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or("2024-11-05");
    Some(json!({
        "protocolVersion": protocol,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION }
    }))
}

fn tool_list() -> Value {
    json!([
        {
            "name": "ping",
            "description": "Health check",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "excel_get_module_code",
            "description": "Get the source of a VBA module in an open workbook",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "workbook": { "type": "string" },
                    "module": { "type": "string" }
                },
                "required": ["workbook", "module"]
            }
        },
        {
            "name": "excel_list_macros",
            "description": "List public macros of a module",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "moduleName": { "type": "string" },
                    "basPath": { "type": "string" }
                },
                "required": ["moduleName"]
            }
        },
        {
            "name": "excel_run_macro",
            "description": "Run a macro in the open workbook",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "qualified": { "type": "string" },
                    "moduleName": { "type": "string" },
                    "procName": { "type": "string" },
                    "workbookName": { "type": "string" },
                    "basPath": { "type": "string" },
                    "ActivateExcel": { "type": "boolean" },
                    "ShowStatus": { "type": "boolean" }
                }
            }
        },
        {
            "name": "vba_search_code",
            "description": "Search VBA code across open workbooks",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "moduleFilter": { "type": "string" },
                    "workbookFilter": { "type": "string" },
                    "useRegex": { "type": "boolean" }
                },
                "required": ["query"]
            }
        },
        {
            "name": "mock_sleep",
            "description": "Reply after a delay",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "ms": { "type": "integer", "minimum": 0 },
                    "tag": { "type": "string" }
                },
                "required": ["ms"]
            }
        },
        {
            "name": "mock_exit",
            "description": "Exit without replying",
            "inputSchema": {
                "type": "object",
                "properties": { "code": { "type": "integer" } }
            }
        }
    ])
}

/// `Ok(None)` means the reply is sent elsewhere (or never).
fn call_tool(writer: &Writer, id: &Value, params: &Value) -> Result<Option<Value>, Value> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    check_required(name, &args)?;
    let text = |s: String| Ok(Some(json!({ "content": [{ "type": "text", "text": s }] })));

    match name {
        "ping" => text("pong".to_string()),
        "excel_get_module_code" => text(module_code(&args).to_string()),
        "excel_list_macros" => text(list_macros(&args)),
        "excel_run_macro" => text(run_macro(&args).to_string()),
        "vba_search_code" => text(search_code(&args)),
        "mock_sleep" => {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
            let tag = args.get("tag").cloned().unwrap_or(Value::Null);
            let writer = Arc::clone(writer);
            let id = id.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(ms));
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "content": [{ "type": "text", "text": json!({ "slept": ms, "tag": tag }).to_string() }] }
                });
                let _ = send(&writer, &reply);
            });
            Ok(None)
        }
        "mock_exit" => {
            let code = args.get("code").and_then(Value::as_i64).unwrap_or(0);
            eprintln!("{SERVER_NAME}: exiting with {code}");
            std::process::exit(i32::try_from(code).unwrap_or(1));
        }
        _ => Err(json!({ "code": -32602, "message": format!("Tool {name} not found") })),
    }
}

fn check_required(name: &str, args: &Value) -> Result<(), Value> {
    let required: &[&str] = match name {
        "excel_get_module_code" => &["workbook", "module"],
        "excel_list_macros" => &["moduleName"],
        "vba_search_code" => &["query"],
        _ => &[],
    };
    match required.iter().find(|key| !args.get(**key).is_some_and(Value::is_string)) {
        Some(key) => Err(json!({
            "code": -32602,
            "message": format!("Invalid arguments for tool {name}: {key} is required")
        })),
        None => Ok(()),
    }
}

fn find_module(name: &str) -> Option<&'static Module> {
    MODULES.iter().find(|module| module.name.eq_ignore_ascii_case(name))
}

fn module_code(args: &Value) -> Value {
    let workbook = args["workbook"].as_str().unwrap_or("");
    let module = args["module"].as_str().unwrap_or("");
    if !workbook.eq_ignore_ascii_case(WORKBOOK) {
        return json!({ "ok": false, "error": "workbook_not_found", "workbook": workbook });
    }
    match find_module(module) {
        Some(found) => json!({
            "ok": true,
            "workbook": WORKBOOK,
            "module": found.name,
            "lines": found.code.lines().count(),
            "code": found.code
        }),
        None => json!({ "ok": false, "error": "module_not_found", "module": module }),
    }
}

/// Public procedures as `(name, line)`.
fn public_procs(module: &Module) -> Vec<(&'static str, usize)> {
    module
        .code
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let rest = line.trim().strip_prefix("Public ")?;
            let rest = rest
                .strip_prefix("Sub ")
                .or_else(|| rest.strip_prefix("Function "))?;
            let name = rest.split('(').next()?.trim();
            Some((name, index + 1))
        })
        .collect()
}

/// Procedure enclosing `line_no`, by the last declaration above it.
fn enclosing_proc(module: &Module, line_no: usize) -> Option<&'static str> {
    module
        .code
        .lines()
        .take(line_no)
        .filter_map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix("Public ")
                .or_else(|| line.strip_prefix("Private "))
                .unwrap_or(line);
            let rest = line
                .strip_prefix("Sub ")
                .or_else(|| line.strip_prefix("Function "))?;
            rest.split('(').next().map(str::trim)
        })
        .last()
}

fn list_macros(args: &Value) -> String {
    let Some(script) = std::env::var_os("MCP_PS_LIST") else {
        return json!({ "error": "MCP_PS_LIST not set" }).to_string();
    };
    if !Path::new(&script).exists() {
        return json!({ "error": format!("ps1 not found: {}", Path::new(&script).display()) })
            .to_string();
    }

    let name = args["moduleName"].as_str().unwrap_or("");
    let Some(module) = find_module(name) else {
        return json!({ "error": "module not found", "detail": name }).to_string();
    };
    let mut entries: Vec<Value> = public_procs(module)
        .into_iter()
        .map(|(proc_name, _)| {
            json!({
                "Proc": proc_name,
                "Module": module.name,
                "WorkbookName": WORKBOOK,
                "Qualified": format!("'{WORKBOOK}'!{}.{proc_name}", module.name)
            })
        })
        .collect();
    // ConvertTo-Json collapses a one-element array into the element.
    if entries.len() == 1 {
        return entries.remove(0).to_string();
    }
    Value::Array(entries).to_string()
}

fn run_macro(args: &Value) -> Value {
    let script = std::env::var_os("MCP_PS_RUN").or_else(|| std::env::var_os("MCP_PS_LIST"));
    let Some(script) = script else {
        return json!({ "error": "MCP_PS_RUN/MCP_PS_LIST not set" });
    };
    if !Path::new(&script).exists() {
        return json!({ "error": format!("ps1 not found: {}", Path::new(&script).display()) });
    }

    let text = |key: &str| {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let (module, proc_name) = match text("qualified") {
        Some(qualified) => {
            let target = qualified.rsplit('!').next().unwrap_or(qualified);
            match target.split_once('.') {
                Some((module, proc_name)) => (module.to_string(), proc_name.to_string()),
                None => return json!({ "ok": false, "error": format!("bad qualified name: {qualified}") }),
            }
        }
        None => match (text("moduleName"), text("procName")) {
            (Some(module), Some(proc_name)) => (module.to_string(), proc_name.to_string()),
            _ => return json!({ "error": "moduleName/procName or qualified required" }),
        },
    };

    let known = find_module(&module)
        .is_some_and(|found| public_procs(found).iter().any(|(name, _)| *name == proc_name));
    let ran = format!("'{WORKBOOK}'!{module}.{proc_name}");
    if !known {
        return json!({ "ok": false, "lastError": { "error": format!("macro not found: {ran}") } });
    }
    if proc_name == "Fails" {
        return json!({
            "ok": false,
            "ran": ran,
            "lastError": { "error": "Run-time error '1004': Application-defined or object-defined error" }
        });
    }
    json!({ "ok": true, "ran": ran })
}

fn search_code(args: &Value) -> String {
    let query = args["query"].as_str().unwrap_or("");
    let needle = query.to_lowercase();
    let module_filter = args.get("moduleFilter").and_then(Value::as_str);
    let workbook_filter = args.get("workbookFilter").and_then(Value::as_str);
    let contains = |haystack: &str, filter: Option<&str>| {
        filter.is_none_or(|filter| haystack.to_lowercase().contains(&filter.to_lowercase()))
    };

    let mut hits = Vec::new();
    if contains(WORKBOOK, workbook_filter) {
        for module in MODULES.iter().filter(|m| contains(m.name, module_filter)) {
            for (index, line) in module.code.lines().enumerate() {
                if !line.to_lowercase().contains(&needle) {
                    continue;
                }
                let line_no = index + 1;
                let proc_name = enclosing_proc(module, line_no);
                hits.push(json!({
                    "workbook": WORKBOOK,
                    "module": module.name,
                    "proc": proc_name,
                    "line": line_no,
                    "snippet": line.trim(),
                    "qualified": match proc_name {
                        Some(p) => format!("'{WORKBOOK}'!{}.{p}", module.name),
                        None => format!("'{WORKBOOK}'!{}", module.name),
                    },
                    "compType": module.comp_type,
                    "exportExt": if module.comp_type == 1 { ".bas" } else { ".cls" }
                }));
            }
        }
    }

    let count = hits.len();
    let hits = if count == 1 {
        hits.remove(0)
    } else {
        Value::Array(hits)
    };
    let payload = json!({ "ok": true, "query": query, "hits": hits, "count": count });
    // PowerShell warnings land ahead of the JSON document.
    format!("WARNING: VBProject access is simulated\r\n{payload}")
}
