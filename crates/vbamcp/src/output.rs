use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;
use vbamcp_rpc::tools::{MacroEntry, SearchHit, SearchResult};
use vbamcp_rpc::ToolDescriptor;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
    );
}

pub fn print_raw(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    if !text.ends_with('\n') {
        let _ = stdout.write_all(b"\n");
    }
    let _ = stdout.flush();
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_tools(tools: &[ToolDescriptor], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(tools),
        OutputFormat::Table => {
            let mut table = new_table(vec!["TOOL", "ARGUMENTS", "DESCRIPTION"]);
            for tool in tools {
                table.add_row(vec![
                    tool.name.clone(),
                    argument_summary(tool.input_schema.as_ref()),
                    tool.description.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for tool in tools {
                println!(
                    "{}({}) {}",
                    tool.name,
                    argument_summary(tool.input_schema.as_ref()),
                    tool.description.as_deref().unwrap_or("")
                );
            }
        }
        OutputFormat::Raw => {
            for tool in tools {
                println!("{}", tool.name);
            }
        }
    }
}

/// `a*, b` from an object schema; `*` marks required properties.
pub fn argument_summary(schema: Option<&Value>) -> String {
    let Some(schema) = schema else {
        return String::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return String::new();
    };
    properties
        .keys()
        .map(|name| {
            if required.contains(&name.as_str()) {
                format!("{name}*")
            } else {
                name.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn print_search(payload: &Value, result: &SearchResult, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(payload),
        OutputFormat::Table => {
            let mut table = new_table(vec!["LOCATION", "LINE", "SNIPPET", "RUN AS"]);
            for hit in &result.hits {
                table.add_row(vec![
                    hit_location(hit),
                    hit.jump_line().to_string(),
                    hit.snippet.clone().unwrap_or_default().trim().to_string(),
                    if hit.is_runnable() {
                        hit.qualified_name().unwrap_or_default()
                    } else {
                        String::new()
                    },
                ]);
            }
            println!("{table}");
            println!("{} hit(s)", result.total());
        }
        OutputFormat::Pretty => {
            for hit in &result.hits {
                println!(
                    "{}:{}  {}",
                    hit_location(hit),
                    hit.jump_line(),
                    hit.snippet.as_deref().unwrap_or("").trim()
                );
            }
        }
        OutputFormat::Raw => {
            for hit in result.hits.iter().filter(|hit| hit.is_runnable()) {
                if let Some(name) = hit.qualified_name() {
                    println!("{name}");
                }
            }
        }
    }
}

fn hit_location(hit: &SearchHit) -> String {
    let mut out = String::new();
    if let Some(workbook) = &hit.workbook {
        out.push_str(workbook);
        out.push('/');
    }
    if let Some(module) = &hit.module {
        out.push_str(module);
        out.push('.');
        out.push_str(hit.export_extension());
    }
    if let Some(proc_name) = &hit.proc {
        out.push_str("::");
        out.push_str(proc_name);
    }
    out
}

pub fn print_macros(entries: &[MacroEntry], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(entries),
        OutputFormat::Table => {
            let mut table = new_table(vec!["PROC", "MODULE", "WORKBOOK", "QUALIFIED"]);
            for entry in entries {
                table.add_row(vec![
                    entry.proc_name.clone(),
                    entry.module.clone(),
                    entry.workbook_name.clone().unwrap_or_default(),
                    entry.qualified.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for entry in entries {
                println!("{}.{}", entry.module, entry.proc_name);
            }
        }
        OutputFormat::Raw => {
            for entry in entries {
                let name = entry
                    .qualified
                    .clone()
                    .unwrap_or_else(|| format!("{}.{}", entry.module, entry.proc_name));
                println!("{name}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn argument_summary_marks_required() {
        let schema = json!({
            "type": "object",
            "properties": { "workbook": {}, "module": {}, "basPath": {} },
            "required": ["workbook", "module"]
        });
        let summary = argument_summary(Some(&schema));
        assert!(summary.contains("workbook*"));
        assert!(summary.contains("module*"));
        assert!(summary.contains("basPath"));
        assert!(!summary.contains("basPath*"));
    }

    #[test]
    fn argument_summary_without_schema_is_empty() {
        assert_eq!(argument_summary(None), "");
        assert_eq!(argument_summary(Some(&json!({"type": "object"}))), "");
    }

    #[test]
    fn hit_location_includes_export_extension() {
        let hit = SearchHit {
            workbook: Some("Book1.xlsm".into()),
            module: Some("Sheet1".into()),
            proc: Some("Worksheet_Change".into()),
            comp_type: Some(100),
            ..Default::default()
        };
        assert_eq!(hit_location(&hit), "Book1.xlsm/Sheet1.cls::Worksheet_Change");
    }
}
