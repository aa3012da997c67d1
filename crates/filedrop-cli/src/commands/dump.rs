//! `dump`: render a state log as XML.

use anyhow::Context;
use filedrop_poller::dump_log;

use crate::cli::DumpArgs;
use crate::error::{CliError, CliResult};

pub(crate) fn handle_dump(args: &DumpArgs) -> CliResult<String> {
    if !args.path.exists() {
        return Err(CliError::validation(format!(
            "{} does not exist",
            args.path.display()
        )));
    }
    dump_log(&args.path)
        .with_context(|| format!("cannot dump {}", args.path.display()))
        .map_err(CliError::failure)
}
