use std::fs;

use serde_json::Value;

use crate::cmd::CallArgs;
use crate::exit::{io_error, rpc_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{print_json, print_raw, OutputFormat};
use crate::server::ServerArgs;

pub fn run(args: CallArgs, server: &ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let arguments = resolve_arguments(&args)?;
    let session = server.connect()?;

    let result = if args.no_validate {
        session.call_tool(&args.tool, arguments)
    } else {
        session.call_tool_checked(&args.tool, arguments)
    }
    .map_err(|err| rpc_error(&format!("{} failed", args.tool), err))?;

    match format {
        OutputFormat::Json => print_json(&result),
        _ => print_raw(&result.text()),
    }

    Ok(if result.is_error { FAILURE } else { SUCCESS })
}

fn resolve_arguments(args: &CallArgs) -> CliResult<Value> {
    let text = match (&args.json, &args.file) {
        (Some(json), _) => json.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .map_err(|err| io_error(&format!("read {}", path.display()), err))?,
        (None, None) => return Ok(Value::Object(Default::default())),
    };
    parse_arguments(&text)
}

/// Parse a tool arguments object. Tools take named arguments only.
pub fn parse_arguments(text: &str) -> CliResult<Value> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid JSON arguments: {err}")))?;
    if !value.is_object() {
        return Err(CliError::new(
            DATA_INVALID,
            "tool arguments must be a JSON object",
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_to_empty_object() {
        let args = CallArgs {
            tool: "ping".into(),
            json: None,
            file: None,
            no_validate: false,
        };
        assert_eq!(resolve_arguments(&args).unwrap(), json!({}));
    }

    #[test]
    fn parses_object_arguments() {
        let value = parse_arguments(r#"{"workbook":"Book1.xlsm","module":"Module1"}"#).unwrap();
        assert_eq!(value["module"], "Module1");
    }

    #[test]
    fn rejects_non_object_arguments() {
        assert_eq!(parse_arguments("[1,2]").unwrap_err().code, DATA_INVALID);
        assert_eq!(parse_arguments("{oops").unwrap_err().code, DATA_INVALID);
    }
}
