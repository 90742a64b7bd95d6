use async_trait::async_trait;

use super::BusError;

pub mod defs;
pub mod modbus;

pub use modbus::ModbusDrive;

/// Register-level access to the variable frequency drive.
#[async_trait]
pub trait DriveBus: Send {
    async fn connect(&mut self) -> Result<(), BusError>;
    async fn disconnect(&mut self) -> Result<(), BusError>;

    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError>;
    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BusError>;

    async fn read_register(&mut self, address: u16) -> Result<u16, BusError> {
        self.read_registers(address, 1)
            .await?
            .first()
            .copied()
            .ok_or_else(|| BusError::Modbus(format!("Empty response reading register {address}")))
    }
}
