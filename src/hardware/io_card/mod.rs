use async_trait::async_trait;

use super::BusError;

pub mod sequent;

pub use sequent::SequentIo;

/// Digital inputs and outputs of the I/O cards. Channels are 1-based.
#[async_trait]
pub trait DigitalIo: Send {
    async fn read_input(&mut self, channel: u8) -> Result<bool, BusError>;
    async fn write_output(&mut self, channel: u8, value: bool) -> Result<(), BusError>;
}
