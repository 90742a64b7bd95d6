use std::{env::consts, io};

use eyre::Result;
use tracing_subscriber::EnvFilter;

pub mod cli;
pub mod config;
pub mod hardware;
pub mod server;

pub use cli::CliOpts;

const DEFAULT_FILTER: &str = "dome_vents=info";

/// Installs the error report handler and the stderr log subscriber.
/// `RUST_LOG` takes precedence over the default filter.
pub fn init() -> Result<()> {
    color_eyre::install()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    Ok(())
}

pub fn banner() {
    eprintln!(
        "{} v{} ({}-{})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        consts::ARCH,
        consts::OS,
    );
}

pub fn cli(opts: CliOpts) -> Result<()> {
    cli::execute_command(opts)
}
