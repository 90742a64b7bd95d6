use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    config::{Config, GateConfig},
    hardware::{
        BusError, FanDriveState, Fault, GATE_COUNT, Hardware, HardwareError, VentGateState,
        drive::{
            DriveBus,
            defs::{
                AUTO_PROFILE, FAULT_HISTORY_LEN, FAULT_RESET_SEQUENCE, FREQUENCY_SCALE,
                MANUAL_PROFILE, PROFILE_REGISTERS, Registers, VOLTAGE_SCALE, drive_state,
                fault_description,
            },
        },
        io_card::DigitalIo,
        simulator::{SimulatedDrive, SimulatedIo},
    },
};

/// Enclosure controller combining the fan drive and the gate I/O cards.
///
/// Each bus sits behind its own lock, and multi-register sequences hold the
/// drive lock for their whole duration.
pub struct Controller<D, I> {
    max_frequency: f64,
    gates: [GateConfig; GATE_COUNT],
    drive: Mutex<D>,
    io: Mutex<I>,
}

/// Channels of a fully configured gate.
#[derive(Copy, Clone)]
struct GateChannels {
    signal: u8,
    open_limit: u8,
    close_limit: u8,
}

impl<D: DriveBus, I: DigitalIo> Controller<D, I> {
    pub fn new(config: &Config, drive: D, io: I) -> Self {
        Self {
            max_frequency: config.drive.max_frequency,
            gates: config.gates,
            drive: Mutex::new(drive),
            io: Mutex::new(io),
        }
    }

    fn channels(&self, index: usize) -> Result<GateChannels, HardwareError> {
        let gate = self
            .gates
            .get(index)
            .ok_or(HardwareError::InvalidGate(index))?;

        match *gate {
            GateConfig {
                signal: Some(signal),
                open_limit: Some(open_limit),
                close_limit: Some(close_limit),
            } => Ok(GateChannels {
                signal,
                open_limit,
                close_limit,
            }),
            _ => Err(HardwareError::GateNotConfigured(index)),
        }
    }

    async fn set_gate_signal(&self, index: usize, value: bool) -> Result<(), HardwareError> {
        let channels = self.channels(index)?;

        tracing::debug!("Driving gate {index} signal {}", if value { "high" } else { "low" });

        self.io
            .lock()
            .await
            .write_output(channels.signal, value)
            .await?;

        Ok(())
    }

    async fn write_sequence(&self, writes: &[(u16, u16)]) -> Result<(), HardwareError> {
        let mut drive = self.drive.lock().await;

        for &(address, value) in writes {
            drive.write_register(address, value).await?;
        }

        Ok(())
    }

    async fn read_scaled(&self, address: u16, scale: f64) -> Result<f64, HardwareError> {
        let raw = self.drive.lock().await.read_register(address).await?;
        Ok(f64::from(raw) * scale)
    }
}

impl Controller<SimulatedDrive, SimulatedIo> {
    /// Builds a controller over in-memory devices wired to the configured gates.
    pub fn simulated(config: &Config) -> Self {
        Self::new(config, SimulatedDrive::new(), SimulatedIo::new(config.gates))
    }
}

#[cfg(feature = "i2c")]
impl
    Controller<
        crate::hardware::drive::ModbusDrive,
        crate::hardware::io_card::SequentIo<linux_embedded_hal::I2cdev>,
    >
{
    /// Opens the I2C buses and prepares the Modbus link. The drive itself is
    /// only contacted by [`Hardware::connect`].
    pub fn real(config: &Config) -> Result<Self, BusError> {
        let drive = crate::hardware::drive::ModbusDrive::new(&config.drive);
        let io = crate::hardware::io_card::SequentIo::open(&config.io)?;

        Ok(Self::new(config, drive, io))
    }
}

#[async_trait]
impl<D: DriveBus, I: DigitalIo> Hardware for Controller<D, I> {
    async fn connect(&self) -> Result<(), HardwareError> {
        self.drive.lock().await.connect().await?;
        tracing::info!("Connected to drive");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), HardwareError> {
        self.drive.lock().await.disconnect().await?;
        tracing::info!("Disconnected from drive");
        Ok(())
    }

    /* == Gates == */

    async fn open_gate(&self, index: usize) -> Result<(), HardwareError> {
        self.set_gate_signal(index, true).await
    }

    async fn close_gate(&self, index: usize) -> Result<(), HardwareError> {
        self.set_gate_signal(index, false).await
    }

    async fn gate_state(&self, index: usize) -> Result<VentGateState, HardwareError> {
        let channels = self.channels(index)?;

        let mut io = self.io.lock().await;
        let open = io.read_input(channels.open_limit).await?;
        let close = io.read_input(channels.close_limit).await?;

        Ok(VentGateState::from_limits(open, close))
    }

    /* == Drive configuration == */

    async fn get_manual_control(&self) -> Result<bool, HardwareError> {
        let mut drive = self.drive.lock().await;
        let mut values = Vec::with_capacity(PROFILE_REGISTERS.len());

        for address in PROFILE_REGISTERS {
            values.push(drive.read_register(address).await?);
        }

        if values == MANUAL_PROFILE {
            Ok(true)
        } else if values == AUTO_PROFILE {
            Ok(false)
        } else {
            Err(HardwareError::InvalidDriveState(values))
        }
    }

    async fn set_manual_control(&self, manual: bool) -> Result<(), HardwareError> {
        let profile = if manual { MANUAL_PROFILE } else { AUTO_PROFILE };
        let writes: Vec<_> = PROFILE_REGISTERS.into_iter().zip(profile).collect();

        tracing::info!(
            "Switching drive to {} control",
            if manual { "manual" } else { "automatic" }
        );

        self.write_sequence(&writes).await
    }

    /* == Fan == */

    async fn start_fan(&self) -> Result<(), HardwareError> {
        self.set_fan_frequency(self.max_frequency).await
    }

    async fn stop_fan(&self) -> Result<(), HardwareError> {
        self.set_fan_frequency(0.0).await
    }

    async fn get_fan_frequency(&self) -> Result<f64, HardwareError> {
        let mut drive = self.drive.lock().await;

        if drive.read_register(Registers::CMD).await? == 0 {
            return Ok(0.0);
        }

        let raw = drive.read_register(Registers::LFR).await?;
        Ok(f64::from(raw) * FREQUENCY_SCALE)
    }

    async fn set_fan_frequency(&self, frequency: f64) -> Result<(), HardwareError> {
        if !(0.0..=self.max_frequency).contains(&frequency) {
            return Err(HardwareError::FrequencyOutOfRange {
                requested: frequency,
                max: self.max_frequency,
            });
        }

        let command = u16::from(frequency != 0.0);
        let reference = (frequency / FREQUENCY_SCALE).round() as u16;

        tracing::debug!("Setting fan frequency to {frequency} Hz");

        self.write_sequence(&[(Registers::CMD, command), (Registers::LFR, reference)])
            .await
    }

    fn max_frequency(&self) -> f64 {
        self.max_frequency
    }

    /* == Diagnostics == */

    async fn fault_reset(&self) -> Result<(), HardwareError> {
        tracing::info!("Resetting drive faults");
        self.write_sequence(&FAULT_RESET_SEQUENCE).await
    }

    async fn last_8_faults(&self) -> Result<Vec<Fault>, HardwareError> {
        let codes = self
            .drive
            .lock()
            .await
            .read_registers(Registers::FAULT, FAULT_HISTORY_LEN)
            .await?;

        if codes.len() != usize::from(FAULT_HISTORY_LEN) {
            let message = format!("Expected {FAULT_HISTORY_LEN} fault registers, got {}", codes.len());
            return Err(BusError::Modbus(message).into());
        }

        Ok(codes
            .into_iter()
            .map(|code| Fault {
                code,
                description: fault_description(code),
            })
            .collect())
    }

    async fn drive_state(&self) -> Result<FanDriveState, HardwareError> {
        let status = self
            .drive
            .lock()
            .await
            .read_register(Registers::STATUS)
            .await?;

        Ok(drive_state(status))
    }

    async fn bus_voltage(&self) -> Result<f64, HardwareError> {
        self.read_scaled(Registers::BUS_VOLTAGE, VOLTAGE_SCALE).await
    }
}
