use std::{
    fmt,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::hardware::GATE_COUNT;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub drive: DriveConfig,
    pub io: IoConfig,
    pub gates: [GateConfig; GATE_COUNT],
    pub monitor: MonitorConfig,
    pub simulate: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

/// Modbus-TCP endpoint of the fan drive.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub host: String,
    pub port: u16,
    pub device_id: u8,
    pub max_frequency: f64,
    pub timeout_ms: u64,
}

/// I2C buses and stack levels of the two I/O cards.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub megaind_bus: u8,
    pub megaind_stack: u8,
    pub sixteen_bus: u8,
    pub sixteen_stack: u8,
}

/// Channels wired to one vent gate. A gate missing any channel is unconfigured.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub signal: Option<u8>,
    pub open_limit: Option<u8>,
    pub close_limit: Option<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_ms: u64,
    pub telemetry_interval: u32,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();

        let data = fs::read(path)
            .await
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;

        serde_yaml::from_slice(&data)
            .wrap_err_with(|| format!("Failed to parse config file {}", path.display()))
    }
}

impl GateConfig {
    pub fn new(signal: u8, open_limit: u8, close_limit: u8) -> Self {
        Self {
            signal: Some(signal),
            open_limit: Some(open_limit),
            close_limit: Some(close_limit),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.signal.is_some() && self.open_limit.is_some() && self.close_limit.is_some()
    }
}

impl MonitorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/* == Defaults == */

impl Default for Config {
    fn default() -> Self {
        let mut gates = [GateConfig::default(); GATE_COUNT];
        gates[0] = GateConfig::new(4, 1, 2);

        Self {
            server: ServerConfig::default(),
            drive: DriveConfig::default(),
            io: IoConfig::default(),
            gates,
            monitor: MonitorConfig::default(),
            simulate: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 23,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 502,
            device_id: 1,
            max_frequency: 50.0,
            timeout_ms: 1000,
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            megaind_bus: 1,
            megaind_stack: 1,
            sixteen_bus: 2,
            sixteen_stack: 1,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            telemetry_interval: 100,
        }
    }
}

/* == Display == */

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let configured = self.gates.iter().filter(|g| g.is_configured()).count();

        write!(
            f,
            "Drive at {}:{} (device {}), {configured}/{GATE_COUNT} gates configured{}",
            self.drive.host,
            self.drive.port,
            self.drive.device_id,
            if self.simulate { ", simulated" } else { "" },
        )
    }
}
