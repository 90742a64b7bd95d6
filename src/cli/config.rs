use eyre::{Context, Result};

use crate::config::Config;

pub fn print(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).wrap_err("Failed to serialise config")?;

    println!("{yaml}");
    Ok(())
}
