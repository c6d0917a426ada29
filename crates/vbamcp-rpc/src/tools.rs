//! Argument and result shapes of the VBA tool server's tools.
//!
//! Tool results arrive as a content envelope whose first text item usually
//! holds a JSON document, sometimes behind a prefix the server printed
//! first. Decoding that document is the caller's job; these types and
//! helpers do it in one place.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RpcError};

/// Liveness check; answers `pong`.
pub const PING: &str = "ping";
/// Fetch the source of one VBA module.
pub const GET_MODULE_CODE: &str = "excel_get_module_code";
/// List the public procedures of a module.
pub const LIST_MACROS: &str = "excel_list_macros";
/// Run a macro in the open workbook.
pub const RUN_MACRO: &str = "excel_run_macro";
/// Search VBA source across open workbooks.
pub const SEARCH_CODE: &str = "vba_search_code";

/// Every tool name this crate has a contract for.
pub const KNOWN_TOOLS: [&str; 5] = [PING, GET_MODULE_CODE, LIST_MACROS, RUN_MACRO, SEARCH_CODE];

/// Arguments for `excel_get_module_code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleCodeArgs {
    pub workbook: String,
    pub module: String,
}

/// Arguments for `vba_search_code`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCodeArgs {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workbook_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_regex: Option<bool>,
}

impl SearchCodeArgs {
    /// Arguments for a parsed query, without filters.
    pub fn from_query(query: &SearchQuery) -> Self {
        Self {
            query: query.pattern.clone(),
            use_regex: Some(query.regex),
            ..Self::default()
        }
    }
}

/// A search query as typed by a user: `/pattern/` means regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub pattern: String,
    pub regex: bool,
}

impl SearchQuery {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(pattern) if !pattern.is_empty() => Self {
                pattern: pattern.to_string(),
                regex: true,
            },
            _ => Self {
                pattern: trimmed.to_string(),
                regex: false,
            },
        }
    }
}

/// Arguments for `excel_list_macros`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMacrosArgs {
    #[serde(rename = "moduleName")]
    pub module_name: String,
    #[serde(rename = "basPath", default, skip_serializing_if = "Option::is_none")]
    pub bas_path: Option<String>,
}

/// Arguments for `excel_run_macro`.
///
/// The server prefers `qualified` and falls back to module and procedure
/// names when it is absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunMacroArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified: Option<String>,
    #[serde(rename = "moduleName", default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(rename = "procName", default, skip_serializing_if = "Option::is_none")]
    pub proc_name: Option<String>,
    #[serde(rename = "workbookName", default, skip_serializing_if = "Option::is_none")]
    pub workbook_name: Option<String>,
    #[serde(rename = "basPath", default, skip_serializing_if = "Option::is_none")]
    pub bas_path: Option<String>,
    #[serde(rename = "ActivateExcel", default, skip_serializing_if = "Option::is_none")]
    pub activate_excel: Option<bool>,
    #[serde(rename = "ShowStatus", default, skip_serializing_if = "Option::is_none")]
    pub show_status: Option<bool>,
}

impl RunMacroArgs {
    /// Run a fully qualified macro (`'Book1.xlsm'!Module1.Proc`).
    pub fn qualified(name: impl Into<String>) -> Self {
        Self {
            qualified: Some(name.into()),
            activate_excel: Some(true),
            show_status: Some(true),
            ..Self::default()
        }
    }

    /// Run an entry picked from a macro list.
    ///
    /// Sends the qualified name plus the parts it was built from, and brings
    /// Excel to the front with status display on.
    pub fn from_macro(entry: &MacroEntry, bas_path: Option<String>) -> Self {
        Self {
            qualified: entry.qualified.clone(),
            module_name: Some(entry.module.clone()),
            proc_name: Some(entry.proc_name.clone()),
            workbook_name: entry.workbook_name.clone(),
            bas_path,
            activate_excel: Some(true),
            show_status: Some(true),
        }
    }

    /// Whether the server has enough to locate the macro.
    pub fn is_complete(&self) -> bool {
        let has = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.trim().is_empty());
        has(&self.qualified) || (has(&self.module_name) && has(&self.proc_name))
    }
}

/// One content item of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Result envelope of `tools/call`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    /// Decode the `result` of a `tools/call` response.
    pub fn from_value(tool: &str, value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|err| RpcError::tool_payload(tool, err.to_string()))
    }

    /// Text of the first content item, if it has any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.first()?.text.as_deref()
    }

    /// All text content joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| item.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Decode the JSON document in the first text item.
    pub fn payload<T: DeserializeOwned>(&self, tool: &str) -> Result<T> {
        let text = self
            .first_text()
            .ok_or_else(|| RpcError::tool_payload(tool, "result has no text content"))?;
        decode_payload(tool, text)
    }
}

/// Slice `text` from the first `{` or `[`, dropping any prefix before it.
pub fn extract_json_payload(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    Some(text[start..].trim_end())
}

/// Decode the first JSON document in `text`, ignoring any prefix and
/// anything after the document.
pub fn decode_payload<T: DeserializeOwned>(tool: &str, text: &str) -> Result<T> {
    let payload = extract_json_payload(text)
        .ok_or_else(|| RpcError::tool_payload(tool, format!("no JSON in {:?}", clip(text))))?;
    let mut documents = serde_json::Deserializer::from_str(payload).into_iter::<T>();
    match documents.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => Err(RpcError::tool_payload(tool, err.to_string())),
        None => Err(RpcError::tool_payload(tool, "empty payload")),
    }
}

/// Payload of `excel_get_module_code`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ModuleCode {
    #[serde(default)]
    pub ok: bool,
    pub workbook: Option<String>,
    pub module: Option<String>,
    pub lines: Option<u64>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub detail: Option<String>,
}

impl ModuleCode {
    /// The module source, or the server's reason for not sending it.
    pub fn into_code(self) -> std::result::Result<String, String> {
        match (self.ok, self.code) {
            (true, Some(code)) => Ok(code),
            _ => Err(self.error.unwrap_or_else(|| "unknown".to_string())),
        }
    }
}

/// Payload of `vba_search_code`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub ok: bool,
    pub query: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub hits: Vec<SearchHit>,
    pub count: Option<u64>,
    pub error: Option<String>,
}

impl SearchResult {
    /// Reported hit count, falling back to the number of hits received.
    pub fn total(&self) -> u64 {
        self.count.unwrap_or(self.hits.len() as u64)
    }
}

/// One search match.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub workbook: Option<String>,
    #[serde(default, deserialize_with = "module_name")]
    pub module: Option<String>,
    #[serde(default)]
    pub proc: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(rename = "matchLine", default)]
    pub match_line: Option<u64>,
    #[serde(rename = "startLine", default)]
    pub start_line: Option<u64>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub qualified: Option<String>,
    #[serde(rename = "compType", default)]
    pub comp_type: Option<i64>,
    #[serde(rename = "exportExt", default)]
    pub export_ext: Option<String>,
}

impl SearchHit {
    /// Qualified macro name for running this hit.
    ///
    /// Unescapes a literal `\u0027` left by the server's JSON encoder. Without
    /// a `qualified` field, builds `'workbook'!module.proc` when all three
    /// parts are known.
    pub fn qualified_name(&self) -> Option<String> {
        if let Some(qualified) = &self.qualified {
            return Some(replace_escaped_quote(qualified));
        }
        match (&self.workbook, &self.module, &self.proc) {
            (Some(wb), Some(module), Some(proc)) => Some(format!("'{wb}'!{module}.{proc}")),
            _ => None,
        }
    }

    /// Whether the hit names something the run tool can execute.
    pub fn is_runnable(&self) -> bool {
        self.qualified_name()
            .is_some_and(|name| name.contains('!') && name.contains('.'))
    }

    /// Line to jump to: the match line, else the procedure start, else 1.
    pub fn jump_line(&self) -> u64 {
        self.match_line
            .or(self.start_line)
            .or(self.line)
            .unwrap_or(1)
    }

    /// File extension the module exports to.
    pub fn export_extension(&self) -> &str {
        if let Some(ext) = &self.export_ext {
            return ext.trim_start_matches('.');
        }
        match self.comp_type {
            Some(1) => "bas",
            Some(3) => "frm",
            _ => "cls",
        }
    }
}

fn replace_escaped_quote(text: &str) -> String {
    const ESCAPED: &str = "\\u0027";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = find_ascii_case_insensitive(rest, ESCAPED) {
        out.push_str(&rest[..pos]);
        out.push('\'');
        rest = &rest[pos + ESCAPED.len()..];
    }
    out.push_str(rest);
    out
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

/// One entry of `excel_list_macros`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroEntry {
    #[serde(rename = "Proc")]
    pub proc_name: String,
    #[serde(rename = "Module")]
    pub module: String,
    #[serde(rename = "WorkbookName", default)]
    pub workbook_name: Option<String>,
    #[serde(rename = "Qualified", default)]
    pub qualified: Option<String>,
}

/// Decode an `excel_list_macros` payload.
///
/// Accepts an array, a single bare entry, or an `{"error": ...}` object,
/// which becomes [`RpcError::ToolPayload`].
pub fn decode_macro_list(text: &str) -> Result<Vec<MacroEntry>> {
    let value: Value = decode_payload(LIST_MACROS, text)?;
    if let Some(error) = value.get("error") {
        let message = match value.get("detail").and_then(Value::as_str) {
            Some(detail) => format!("{}: {detail}", plain(error)),
            None => plain(error),
        };
        return Err(RpcError::tool_payload(LIST_MACROS, message));
    }
    let entries: OneOrMany<MacroEntry> = serde_json::from_value(value)
        .map_err(|err| RpcError::tool_payload(LIST_MACROS, err.to_string()))?;
    Ok(entries.into_vec())
}

/// Payload of `excel_run_macro`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RunOutcome {
    #[serde(default)]
    pub ok: bool,
    pub ran: Option<String>,
    #[serde(rename = "lastError")]
    pub last_error: Option<RunError>,
    pub error: Option<String>,
}

/// `lastError` member of a run outcome.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RunError {
    pub error: Option<String>,
}

impl RunOutcome {
    /// Best available failure message.
    pub fn error_message(&self) -> &str {
        self.last_error
            .as_ref()
            .and_then(|last| last.error.as_deref())
            .or(self.error.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

// PowerShell's ConvertTo-Json collapses a one-element array into the element.
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<OneOrMany<T>>::deserialize(deserializer)?
        .map(OneOrMany::into_vec)
        .unwrap_or_default())
}

fn module_name<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name),
        Some(Value::Object(map)) => match map.get("name") {
            Some(Value::String(name)) => Some(name.clone()),
            _ => Some(Value::Object(map).to_string()),
        },
        Some(other) => Some(other.to_string()),
    })
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn clip(text: &str) -> &str {
    match text.char_indices().nth(80) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
