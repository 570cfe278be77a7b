// Entrypoint for the CLI application.
// - Keeps `main` small: set up logging, parse arguments, hand off to `run`.
// - Errors are printed once as `Error: ...` and turn into a non-zero exit.

use std::process::ExitCode;

use clap::Parser;
use everywhere_cli::{cli::Cli, logger};
use tracing::{error, info};

fn main() -> ExitCode {
    if let Err(err) = logger::init() {
        eprintln!("Error: {err:#}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    match everywhere_cli::run(cli) {
        Ok(()) => {
            info!("command finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = ?err, "command failed");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
