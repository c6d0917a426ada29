use vbamcp_rpc::tools::{decode_macro_list, ListMacrosArgs, LIST_MACROS};
use vbamcp_rpc::RpcError;

use crate::cmd::MacrosArgs;
use crate::exit::{rpc_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_macros, OutputFormat};
use crate::server::ServerArgs;

pub fn run(args: MacrosArgs, server: &ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let session = server.connect()?;
    let request = ListMacrosArgs {
        module_name: args.module.clone(),
        bas_path: args.bas_path.clone(),
    };

    let result = session
        .call_tool_with(LIST_MACROS, &request)
        .map_err(|err| rpc_error("listing macros failed", err))?;
    let text = result.text();
    if result.is_error {
        return Err(CliError::new(
            FAILURE,
            format!("listing macros failed: {text}"),
        ));
    }

    // An `{"error": ...}` payload is the server declining, not garbage.
    let entries = decode_macro_list(&text).map_err(|err| match err {
        RpcError::ToolPayload { message, .. } => {
            CliError::new(FAILURE, format!("listing macros failed: {message}"))
        }
        other => rpc_error("listing macros failed", other),
    })?;

    print_macros(&entries, format);
    Ok(SUCCESS)
}
