// Library root
// -----------
// The `everywhere` binary is a thin wrapper around this crate.
//
// Module responsibilities:
// - `api`: blocking HTTP client for the sandbox API and its typed payloads.
// - `archive`: packs directories/files into temporary zips for upload.
// - `cli`: clap definitions of the command-line surface.
// - `config`: credential file plus environment overrides.
// - `error`: the error taxonomy every command reports through.
// - `logger`: tracing subscriber setup.
// - `ui`: per-command handlers, prompts and rendering.
pub mod api;
pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod ui;

use std::io;

use cli::Cli;
use config::Config;
use error::CliResult;

/// Load the local configuration and run one parsed command to completion.
pub fn run(cli: Cli) -> CliResult<()> {
    let mut config = Config::load()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    ui::dispatch(cli.command, &mut config, &mut out)
}
