#![forbid(unsafe_code)]

//! Binary entrypoint for the filedrop operator CLI.

use std::process;

fn main() {
    let exit_code = filedrop_cli::run();
    if exit_code != 0 {
        process::exit(exit_code);
    }
}
