use std::fs;

use serde_json::Value;
use tracing::info;
use vbamcp_rpc::tools::{ModuleCode, ModuleCodeArgs, GET_MODULE_CODE};

use crate::cmd::CodeArgs;
use crate::exit::{io_error, rpc_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{print_json, print_raw, OutputFormat};
use crate::server::ServerArgs;

pub fn run(args: CodeArgs, server: &ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let session = server.connect()?;
    let request = ModuleCodeArgs {
        workbook: args.workbook.clone(),
        module: args.module.clone(),
    };

    let result = session
        .call_tool_with(GET_MODULE_CODE, &request)
        .map_err(|err| rpc_error("fetching module failed", err))?;
    if result.is_error {
        return Err(CliError::new(
            FAILURE,
            format!("fetching module failed: {}", result.text()),
        ));
    }

    let payload: Value = result
        .payload(GET_MODULE_CODE)
        .map_err(|err| rpc_error("fetching module failed", err))?;
    let module: ModuleCode = serde_json::from_value(payload.clone())
        .map_err(|err| CliError::new(DATA_INVALID, format!("unexpected module payload: {err}")))?;
    if format == OutputFormat::Json && args.output.is_none() {
        print_json(&payload);
    }
    let code = module.into_code().map_err(|reason| {
        CliError::new(
            FAILURE,
            format!("{}/{}: {reason}", args.workbook, args.module),
        )
    })?;

    match &args.output {
        Some(path) => {
            fs::write(path, &code)
                .map_err(|err| io_error(&format!("write {}", path.display()), err))?;
            info!(path = %path.display(), bytes = code.len(), "module source written");
        }
        None if format == OutputFormat::Json => {}
        None => print_raw(&code),
    }
    Ok(SUCCESS)
}
