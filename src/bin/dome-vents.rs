use clap::Parser;
use eyre::Result;

use dome_vents::CliOpts;

fn main() -> Result<()> {
    let opts = CliOpts::parse();

    dome_vents::init()?;
    dome_vents::banner();

    dome_vents::cli(opts)
}
