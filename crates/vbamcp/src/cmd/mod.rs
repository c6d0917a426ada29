use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;
use crate::server::ServerArgs;

pub mod call;
pub mod code;
pub mod doctor;
pub mod macros;
pub mod run;
pub mod search;
pub mod shell;
pub mod tools;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the tools the server advertises.
    Tools(ToolsArgs),
    /// Call any tool with JSON arguments and print its result.
    Call(CallArgs),
    /// Search VBA source across open workbooks.
    Search(SearchArgs),
    /// Print the source of one VBA module.
    Code(CodeArgs),
    /// List the public macros of a module.
    Macros(MacrosArgs),
    /// Run a macro.
    Run(RunArgs),
    /// Read `tool {json}` lines from stdin and call each against one server.
    Shell(ShellArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Check the local setup and the tool server handshake.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, server: &ServerArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Tools(args) => tools::run(args, server, format),
        Command::Call(args) => call::run(args, server, format),
        Command::Search(args) => search::run(args, server, format),
        Command::Code(args) => code::run(args, server, format),
        Command::Macros(args) => macros::run(args, server, format),
        Command::Run(args) => run::run(args, server, format),
        Command::Shell(args) => shell::run(args, server, format),
        Command::Version(args) => version::run(args, format),
        Command::Doctor(args) => doctor::run(args, server, format),
    }
}

#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Fail unless every tool vbamcp knows how to drive is advertised.
    #[arg(long)]
    pub require_known: bool,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Tool name.
    pub tool: String,
    /// Arguments as a JSON object.
    #[arg(long, conflicts_with = "file")]
    pub json: Option<String>,
    /// Read the arguments object from a file.
    #[arg(long, value_name = "PATH", conflicts_with = "json")]
    pub file: Option<PathBuf>,
    /// Skip checking the arguments against the tool's input schema.
    #[arg(long)]
    pub no_validate: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Text to find; `/pattern/` searches by regular expression.
    pub query: String,
    /// Treat the query as a regular expression.
    #[arg(long)]
    pub regex: bool,
    /// Only search modules whose name matches.
    #[arg(long, value_name = "NAME")]
    pub module: Option<String>,
    /// Only search workbooks whose name matches.
    #[arg(long, value_name = "NAME")]
    pub workbook: Option<String>,
}

#[derive(Args, Debug)]
pub struct CodeArgs {
    /// Workbook name, e.g. Book1.xlsm.
    pub workbook: String,
    /// Module name, e.g. Module1.
    pub module: String,
    /// Write the source to a file instead of stdout.
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct MacrosArgs {
    /// Module to list.
    pub module: String,
    /// Exported .bas file to read instead of the live module.
    #[arg(long, value_name = "PATH")]
    pub bas_path: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Qualified macro name, e.g. 'Book1.xlsm'!Module1.Main.
    pub qualified: Option<String>,
    /// Module holding the macro.
    #[arg(long, value_name = "NAME", conflicts_with = "qualified")]
    pub module: Option<String>,
    /// Procedure to run.
    #[arg(long = "proc", value_name = "NAME", conflicts_with = "qualified")]
    pub proc_name: Option<String>,
    /// Workbook holding the macro.
    #[arg(long, value_name = "NAME")]
    pub workbook: Option<String>,
    /// Exported .bas file the macro came from.
    #[arg(long, value_name = "PATH")]
    pub bas_path: Option<String>,
    /// Leave Excel in the background.
    #[arg(long)]
    pub no_activate: bool,
}

#[derive(Args, Debug)]
pub struct ShellArgs {
    /// Stop at the first failed call.
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    /// Only check local configuration; do not launch the server.
    #[arg(long)]
    pub offline: bool,
}
