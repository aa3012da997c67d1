//! Argument parsing and command dispatch.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::commands::check::handle_check;
use crate::commands::dump::handle_dump;
use crate::error::CliResult;

#[derive(Parser)]
#[command(name = "filedrop", about = "Operator tools for the filedrop poller")]
pub(crate) struct Cli {
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    pub(crate) output: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Render a state log, or the log inside a processing folder, as XML.
    Dump(DumpArgs),
    /// Validate a poller configuration file and list its folders.
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub(crate) struct DumpArgs {
    /// Log file or processing folder.
    pub(crate) path: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct CheckArgs {
    /// YAML or JSON poller configuration.
    #[arg(env = "FILEDROP_CONFIG")]
    pub(crate) config: PathBuf,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Parses process arguments, runs the command and returns the exit code.
#[must_use]
pub fn run() -> i32 {
    run_from(
        std::env::args_os(),
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    )
}

/// Runs the CLI against explicit arguments and output streams.
///
/// Exit codes: 0 on success, 2 for invalid input, 3 for operational failures.
pub fn run_from<I, T>(args: I, out: &mut impl Write, err: &mut impl Write) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(parse_error) => {
            let rendered = parse_error.render().to_string();
            let stream: &mut dyn Write = if parse_error.use_stderr() { err } else { out };
            let _ = write!(stream, "{rendered}");
            return parse_error.exit_code();
        }
    };

    match dispatch(&cli) {
        Ok(text) => {
            let _ = writeln!(out, "{}", text.trim_end());
            0
        }
        Err(error) => {
            let _ = writeln!(err, "error: {}", error.display_message());
            error.exit_code()
        }
    }
}

fn dispatch(cli: &Cli) -> CliResult<String> {
    match &cli.command {
        Command::Dump(args) => handle_dump(args),
        Command::Check(args) => handle_check(args, cli.output),
    }
}
