use serde_json::Value;
use vbamcp_rpc::tools::{decode_payload, RunMacroArgs, RunOutcome, RUN_MACRO};

use crate::cmd::RunArgs;
use crate::exit::{rpc_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, print_raw, OutputFormat};
use crate::server::ServerArgs;

pub fn run(args: RunArgs, server: &ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let request = run_request(&args)?;
    let session = server.connect()?;

    let result = session
        .call_tool_with(RUN_MACRO, &request)
        .map_err(|err| rpc_error("run failed", err))?;
    let text = result.text();
    if result.is_error {
        return Err(CliError::new(FAILURE, format!("run failed: {text}")));
    }

    // Some runner scripts print plain text instead of a JSON outcome.
    let Ok(payload) = decode_payload::<Value>(RUN_MACRO, &text) else {
        print_raw(&text);
        return Ok(SUCCESS);
    };
    let outcome: RunOutcome = serde_json::from_value(payload.clone()).unwrap_or_default();

    match format {
        OutputFormat::Json => print_json(&payload),
        _ if outcome.ok => {
            let ran = outcome
                .ran
                .as_deref()
                .or(request.qualified.as_deref())
                .unwrap_or("macro");
            println!("ran {ran}");
        }
        _ => {}
    }

    if outcome.ok {
        Ok(SUCCESS)
    } else {
        Err(CliError::new(
            FAILURE,
            format!("run failed: {}", outcome.error_message()),
        ))
    }
}

fn run_request(args: &RunArgs) -> CliResult<RunMacroArgs> {
    let mut request = match &args.qualified {
        Some(qualified) => RunMacroArgs::qualified(qualified.trim()),
        None => RunMacroArgs {
            module_name: args.module.clone(),
            proc_name: args.proc_name.clone(),
            activate_excel: Some(true),
            show_status: Some(true),
            ..RunMacroArgs::default()
        },
    };
    request.workbook_name = args.workbook.clone();
    request.bas_path = args.bas_path.clone();
    if args.no_activate {
        request.activate_excel = Some(false);
    }

    if !request.is_complete() {
        return Err(CliError::usage(
            "give a qualified macro name or both --module and --proc",
        ));
    }
    Ok(request)
}
