// Diagnostics go to stderr through `tracing`, filtered by `EVERYWHERE_LOG`
// (same syntax as `RUST_LOG`). Quiet by default so command output stays clean.

use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "EVERYWHERE_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

pub fn init() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_target(false),
        )
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
