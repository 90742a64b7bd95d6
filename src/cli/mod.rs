use std::{net::IpAddr, path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};
use eyre::{Context, Result};

use crate::{
    config::Config,
    hardware::{Controller, Hardware},
};

mod config;
mod serve;
mod status;

#[derive(Parser)]
#[command(version, about)]
pub struct CliOpts {
    /// YAML configuration file, defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the vent control protocol until interrupted
    Serve(ServeOpts),

    /// Print the resolved configuration
    Config,

    /// Read the hardware once and print its state
    Status {
        #[arg(long)]
        simulate: bool,
    },
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Default)]
pub struct ServeOpts {
    #[arg(long)]
    host: Option<IpAddr>,
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    drive_host: Option<String>,
    #[arg(long)]
    drive_port: Option<u16>,
    #[arg(long)]
    drive_device_id: Option<u8>,
    #[arg(long)]
    max_frequency: Option<f64>,

    #[arg(long)]
    megaind_bus: Option<u8>,
    #[arg(long)]
    megaind_stack: Option<u8>,
    #[arg(long)]
    sixteen_bus: Option<u8>,
    #[arg(long)]
    sixteen_stack: Option<u8>,

    /// Use in-memory devices instead of the drive and I/O cards
    #[arg(long)]
    simulate: bool,
}

impl ServeOpts {
    fn apply(self, mut config: Config) -> Config {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        set(&mut config.server.host, self.host);
        set(&mut config.server.port, self.port);

        set(&mut config.drive.host, self.drive_host);
        set(&mut config.drive.port, self.drive_port);
        set(&mut config.drive.device_id, self.drive_device_id);
        set(&mut config.drive.max_frequency, self.max_frequency);

        set(&mut config.io.megaind_bus, self.megaind_bus);
        set(&mut config.io.megaind_stack, self.megaind_stack);
        set(&mut config.io.sixteen_bus, self.sixteen_bus);
        set(&mut config.io.sixteen_stack, self.sixteen_stack);

        config.simulate |= self.simulate;
        config
    }
}

#[tokio::main]
pub async fn execute_command(opts: CliOpts) -> Result<()> {
    let config = match &opts.config {
        Some(path) => Config::load(path).await?,
        None => Config::default(),
    };

    match opts.command {
        Command::Serve(overrides) => self::serve::run(overrides.apply(config)).await,
        Command::Config => self::config::print(&config),

        Command::Status { simulate } => {
            let config = Config {
                simulate: config.simulate || simulate,
                ..config
            };

            self::status::run(&config).await
        }
    }
}

/// Builds the hardware variant selected by the configuration and connects it.
pub async fn connect_hardware(config: &Config) -> Result<Arc<dyn Hardware>> {
    let hardware: Arc<dyn Hardware> = if config.simulate {
        tracing::info!("Using simulated hardware");
        Arc::new(Controller::simulated(config))
    } else {
        real_hardware(config)?
    };

    hardware
        .connect()
        .await
        .wrap_err_with(|| format!("Failed to connect to drive at {}:{}", config.drive.host, config.drive.port))?;

    Ok(hardware)
}

#[cfg(feature = "i2c")]
fn real_hardware(config: &Config) -> Result<Arc<dyn Hardware>> {
    let controller = Controller::real(config).wrap_err("Failed to open the I/O cards")?;
    Ok(Arc::new(controller))
}

#[cfg(not(feature = "i2c"))]
fn real_hardware(_config: &Config) -> Result<Arc<dyn Hardware>> {
    eyre::bail!("Built without I2C support, enable the `i2c` feature or pass --simulate")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_overrides() {
        let opts = CliOpts::parse_from([
            "dome-vents",
            "serve",
            "--port",
            "4000",
            "--drive-host",
            "10.0.0.5",
            "--max-frequency",
            "40",
            "--sixteen-stack",
            "3",
            "--simulate",
        ]);

        let Command::Serve(overrides) = opts.command else {
            panic!("expected the serve command");
        };

        let config = overrides.apply(Config::default());

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.drive.host, "10.0.0.5");
        assert_eq!(config.drive.port, 502);
        assert_eq!(config.drive.max_frequency, 40.0);
        assert_eq!(config.io.sixteen_stack, 3);
        assert!(config.simulate);
    }

    #[test]
    fn test_global_config_flag() {
        let opts = CliOpts::parse_from(["dome-vents", "status", "--config", "vents.yaml"]);

        assert_eq!(opts.config, Some(PathBuf::from("vents.yaml")));
        assert!(matches!(opts.command, Command::Status { simulate: false }));
    }

    #[tokio::test]
    async fn test_connect_simulated() {
        let config = Config {
            simulate: true,
            ..Default::default()
        };

        let hardware = connect_hardware(&config).await.unwrap();
        assert_eq!(hardware.max_frequency(), 50.0);
    }
}
