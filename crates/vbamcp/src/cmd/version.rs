use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
    protocol_version: &'static str,
    target: &'static str,
    profile: &'static str,
    os: &'static str,
    arch: &'static str,
    schema_validation: bool,
}

fn version_info() -> VersionInfo {
    VersionInfo {
        name: "vbamcp",
        version: env!("CARGO_PKG_VERSION"),
        protocol_version: vbamcp_rpc::PROTOCOL_VERSION,
        target: option_env!("VBAMCP_BUILD_TARGET").unwrap_or("unknown"),
        profile: option_env!("VBAMCP_BUILD_PROFILE").unwrap_or("unknown"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        schema_validation: cfg!(feature = "schema"),
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let info = version_info();
    if !args.extended {
        println!("{} {}", info.name, info.version);
        return Ok(SUCCESS);
    }

    if format == OutputFormat::Json {
        print_json(&info);
        return Ok(SUCCESS);
    }

    println!("name: {}", info.name);
    println!("version: {}", info.version);
    println!("protocol: {}", info.protocol_version);
    println!("target: {}", info.target);
    println!("profile: {}", info.profile);
    println!("os: {} ({})", info.os, info.arch);
    println!("schema_validation: {}", info.schema_validation);
    Ok(SUCCESS)
}
