use std::io;

use async_trait::async_trait;
use thiserror::Error;

pub mod controller;
pub mod defs;
pub mod drive;
pub mod io_card;
pub mod simulator;

pub use controller::Controller;
pub use defs::{FanDriveState, Fault, GATE_COUNT, VentGateState};

/// Operations the dispatcher and the status monitor need from the enclosure hardware.
///
/// Implementations serialise their own bus access, a single handle may be shared
/// between the request loop and the monitor task.
#[async_trait]
pub trait Hardware: Send + Sync {
    async fn connect(&self) -> Result<(), HardwareError>;
    async fn disconnect(&self) -> Result<(), HardwareError>;

    async fn open_gate(&self, index: usize) -> Result<(), HardwareError>;
    async fn close_gate(&self, index: usize) -> Result<(), HardwareError>;
    async fn gate_state(&self, index: usize) -> Result<VentGateState, HardwareError>;

    async fn get_manual_control(&self) -> Result<bool, HardwareError>;
    async fn set_manual_control(&self, manual: bool) -> Result<(), HardwareError>;

    async fn start_fan(&self) -> Result<(), HardwareError>;
    async fn stop_fan(&self) -> Result<(), HardwareError>;
    async fn get_fan_frequency(&self) -> Result<f64, HardwareError>;
    async fn set_fan_frequency(&self, frequency: f64) -> Result<(), HardwareError>;
    fn max_frequency(&self) -> f64;

    async fn fault_reset(&self) -> Result<(), HardwareError>;
    async fn last_8_faults(&self) -> Result<Vec<Fault>, HardwareError>;
    async fn drive_state(&self) -> Result<FanDriveState, HardwareError>;
    async fn bus_voltage(&self) -> Result<f64, HardwareError>;
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Invalid vent {0}, must be between 0 and 3")]
    InvalidGate(usize),

    #[error("Vent {0} is not configured")]
    GateNotConfigured(usize),

    #[error("Frequency must be between 0 and {max} Hz, got {requested}")]
    FrequencyOutOfRange { requested: f64, max: f64 },

    #[error("Invalid settings in drive: {0:?}")]
    InvalidDriveState(Vec<u16>),

    #[error("Bus communication failed")]
    Bus(#[from] BusError),
}

/// Failure of the underlying transport, either the drive link or the I/O cards.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Device did not answer within {0} ms")]
    Timeout(u64),

    #[error("Invalid channel {0}")]
    InvalidChannel(u8),

    #[error("Modbus error: {0}")]
    Modbus(String),

    #[error("I2C error: {0}")]
    I2c(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
