use vbamcp_rpc::tools::KNOWN_TOOLS;

use crate::cmd::ToolsArgs;
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_tools, OutputFormat};
use crate::server::ServerArgs;

pub fn run(args: ToolsArgs, server: &ServerArgs, format: OutputFormat) -> CliResult<i32> {
    let session = server.connect()?;
    let mut tools = session.tools();
    tools.sort_by(|a, b| a.name.cmp(&b.name));
    print_tools(&tools, format);

    if args.require_known {
        let missing: Vec<&str> = KNOWN_TOOLS
            .iter()
            .copied()
            .filter(|name| !tools.iter().any(|tool| tool.name == *name))
            .collect();
        if !missing.is_empty() {
            return Err(CliError::new(
                FAILURE,
                format!("server does not advertise: {}", missing.join(", ")),
            ));
        }
    }

    Ok(SUCCESS)
}
