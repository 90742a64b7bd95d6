use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use embedded_hal::i2c::I2c;

use crate::{
    config::IoConfig,
    hardware::{BusError, io_card::DigitalIo},
};

/// Sequent Microsystems stack: a "megaind" card driving the gate signals and a
/// "16inpind" card reading the limit switches, each on its own I2C bus.
///
/// Bus transfers block, so they run on tokio's blocking pool.
pub struct SequentIo<B> {
    outputs: Arc<Mutex<B>>,
    inputs: Arc<Mutex<B>>,
    output_stack: u8,
    input_stack: u8,
}

impl<B: I2c + Send + 'static> SequentIo<B> {
    const OUTPUT_BASE_ADDRESS: u8 = 0x50;
    const OUTPUT_SET: u8 = 1;
    const OUTPUT_CLEAR: u8 = 2;
    const OUTPUT_CHANNELS: u8 = 4;

    const INPUT_BASE_ADDRESS: u8 = 0x20;
    const INPUT_PORT_REGISTER: u8 = 0;
    const INPUT_CHANNELS: u8 = 16;

    const MAX_STACK: u8 = 7;

    pub fn new(outputs: B, inputs: B, config: &IoConfig) -> Self {
        Self {
            outputs: Arc::new(Mutex::new(outputs)),
            inputs: Arc::new(Mutex::new(inputs)),
            output_stack: config.megaind_stack,
            input_stack: config.sixteen_stack,
        }
    }

    fn output_address(&self) -> Result<u8, BusError> {
        Self::check_stack(self.output_stack)?;
        Ok(Self::OUTPUT_BASE_ADDRESS + self.output_stack)
    }

    // The input card's address jumpers are inverted.
    fn input_address(&self) -> Result<u8, BusError> {
        Self::check_stack(self.input_stack)?;
        Ok(Self::INPUT_BASE_ADDRESS + (Self::MAX_STACK ^ self.input_stack))
    }

    fn check_stack(stack: u8) -> Result<(), BusError> {
        if stack > Self::MAX_STACK {
            return Err(BusError::I2c(format!("Invalid stack level {stack}")));
        }

        Ok(())
    }

    /// Inputs are active-low, channel 1 being the most significant bit.
    fn input_mask(channel: u8) -> u16 {
        0x8000 >> (channel - 1)
    }

    async fn transfer<T, F>(bus: &Arc<Mutex<B>>, operation: F) -> Result<T, BusError>
    where
        T: Send + 'static,
        F: FnOnce(&mut B) -> Result<T, B::Error> + Send + 'static,
    {
        let bus = bus.clone();

        tokio::task::spawn_blocking(move || {
            let mut bus = bus
                .lock()
                .map_err(|_| BusError::I2c("I2C bus lock poisoned".to_owned()))?;

            operation(&mut *bus).map_err(i2c_error)
        })
        .await
        .map_err(|e| BusError::I2c(format!("I2C transfer aborted: {e}")))?
    }
}

#[async_trait]
impl<B: I2c + Send + 'static> DigitalIo for SequentIo<B> {
    async fn read_input(&mut self, channel: u8) -> Result<bool, BusError> {
        if !(1..=Self::INPUT_CHANNELS).contains(&channel) {
            return Err(BusError::InvalidChannel(channel));
        }

        let address = self.input_address()?;

        let word = Self::transfer(&self.inputs, move |bus| {
            let mut word = [0; 2];
            bus.write_read(address, &[Self::INPUT_PORT_REGISTER], &mut word)?;
            Ok(word)
        })
        .await?;

        let value = u16::from_le_bytes(word);

        Ok(value & Self::input_mask(channel) == 0)
    }

    async fn write_output(&mut self, channel: u8, value: bool) -> Result<(), BusError> {
        if !(1..=Self::OUTPUT_CHANNELS).contains(&channel) {
            return Err(BusError::InvalidChannel(channel));
        }

        let address = self.output_address()?;
        let command = if value {
            Self::OUTPUT_SET
        } else {
            Self::OUTPUT_CLEAR
        };

        tracing::trace!("Writing {value} to output channel {channel}");

        Self::transfer(&self.outputs, move |bus| bus.write(address, &[command, channel])).await
    }
}

#[cfg(feature = "i2c")]
impl SequentIo<linux_embedded_hal::I2cdev> {
    pub fn open(config: &IoConfig) -> Result<Self, BusError> {
        let open = |bus: u8| {
            linux_embedded_hal::I2cdev::new(format!("/dev/i2c-{bus}"))
                .map_err(|e| BusError::I2c(format!("Failed to open I2C bus {bus}: {e}")))
        };

        Ok(Self::new(
            open(config.megaind_bus)?,
            open(config.sixteen_bus)?,
            config,
        ))
    }
}

fn i2c_error<E: embedded_hal::i2c::Error>(err: E) -> BusError {
    BusError::I2c(format!("{err:?}"))
}
