//! Entry point for the `seqarray` job-array runner.
//!
//! One invocation of `seqarray run` handles one array index: it resolves the
//! index to a sample, checks the inputs and launches kneaddata or HUMAnN. The
//! remaining subcommands are the cohort-level helpers around those runs.

use clap::Parser;
use seqarray::cli::{exit_code_for, run_cli, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}
