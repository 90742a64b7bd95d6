use std::{collections::HashMap, io, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    config::GateConfig,
    hardware::{
        BusError, GATE_COUNT,
        drive::{
            DriveBus,
            defs::{FAULT_HISTORY_LEN, MANUAL_PROFILE, PROFILE_REGISTERS, Registers, Status},
        },
        io_card::DigitalIo,
    },
};

/* === Drive === */

/// In-memory stand-in for the fan drive's holding registers.
///
/// Clones share the same register map, so a test can keep a handle to inject
/// faults after passing the drive to a controller.
#[derive(Clone, Default)]
pub struct SimulatedDrive {
    inner: Arc<Mutex<DriveState>>,
}

#[derive(Default)]
struct DriveState {
    registers: HashMap<u16, u16>,
    offline: bool,
    faulted: bool,
    reset_armed: bool,
}

impl SimulatedDrive {
    const INITIAL_FAULT: u16 = 22;
    const INITIAL_VOLTAGE: u16 = 4000;

    pub fn new() -> Self {
        let mut registers = HashMap::new();

        for (address, value) in PROFILE_REGISTERS.into_iter().zip(MANUAL_PROFILE) {
            registers.insert(address, value);
        }

        for offset in 0..FAULT_HISTORY_LEN {
            registers.insert(Registers::FAULT + offset, Self::INITIAL_FAULT);
        }

        registers.insert(Registers::CMD, 0);
        registers.insert(Registers::LFR, 0);
        registers.insert(Registers::STATUS, Status::READY);
        registers.insert(Registers::BUS_VOLTAGE, Self::INITIAL_VOLTAGE);

        let state = DriveState {
            registers,
            ..Default::default()
        };

        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Records a new fault as the most recent history entry and trips the drive.
    pub async fn inject_fault(&self, code: u16) {
        let mut state = self.inner.lock().await;

        for offset in (1..FAULT_HISTORY_LEN).rev() {
            let previous = state.register(Registers::FAULT + offset - 1);
            state.registers.insert(Registers::FAULT + offset, previous);
        }

        state.registers.insert(Registers::FAULT, code);
        state.faulted = true;
        state.update_status();
    }

    /// Makes every register access fail as if the link were down.
    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    pub async fn set_register(&self, address: u16, value: u16) {
        let mut state = self.inner.lock().await;
        state.registers.insert(address, value);
        state.update_status();
    }

    pub async fn register(&self, address: u16) -> u16 {
        self.inner.lock().await.register(address)
    }
}

impl DriveState {
    fn register(&self, address: u16) -> u16 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    fn check_online(&self) -> Result<(), BusError> {
        if self.offline {
            let error = io::Error::new(io::ErrorKind::NotConnected, "Simulated drive offline");
            return Err(BusError::Io(error));
        }

        Ok(())
    }

    fn update_status(&mut self) {
        let status = if self.faulted {
            Status::FAULT
        } else if self.register(Registers::CMD) == 1 && self.register(Registers::LFR) > 0 {
            Status::OPERATIONAL
        } else {
            Status::READY
        };

        self.registers.insert(Registers::STATUS, status);
    }

    // A fault is cleared by the reset command followed by a return to zero.
    fn track_reset(&mut self, address: u16, value: u16) {
        if address != Registers::CMD {
            return;
        }

        match value {
            4 => self.reset_armed = true,
            0 if self.reset_armed => {
                self.reset_armed = false;
                self.faulted = false;
            }
            _ => self.reset_armed = false,
        }
    }
}

#[async_trait]
impl DriveBus for SimulatedDrive {
    async fn connect(&mut self) -> Result<(), BusError> {
        self.inner.lock().await.check_online()
    }

    async fn disconnect(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError> {
        let state = self.inner.lock().await;
        state.check_online()?;

        Ok((0..count)
            .map(|offset| state.register(address + offset))
            .collect())
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        let mut state = self.inner.lock().await;
        state.check_online()?;

        state.registers.insert(address, value);
        state.track_reset(address, value);
        state.update_status();

        Ok(())
    }
}

/* === I/O cards === */

pub const INPUT_CHANNELS: usize = 16;
const OUTPUT_CHANNELS: u8 = 4;

/// Simulated I/O stack wired to the gates described by the configuration.
///
/// Driving a gate's signal output moves its limit switches instantly.
#[derive(Clone)]
pub struct SimulatedIo {
    gates: [GateConfig; GATE_COUNT],
    inputs: Arc<Mutex<[bool; INPUT_CHANNELS]>>,
}

impl SimulatedIo {
    /// Configured gates start closed.
    pub fn new(gates: [GateConfig; GATE_COUNT]) -> Self {
        let mut inputs = [false; INPUT_CHANNELS];

        for gate in &gates {
            if let (Some(_), Some(channel)) = (gate.open_limit, gate.close_limit) {
                if let Ok(index) = Self::input_index(channel) {
                    inputs[index] = true;
                }
            }
        }

        Self {
            gates,
            inputs: Arc::new(Mutex::new(inputs)),
        }
    }

    /// Overwrites every limit switch input, channel 1 first.
    pub async fn set_inputs(&self, inputs: [bool; INPUT_CHANNELS]) {
        *self.inputs.lock().await = inputs;
    }

    fn input_index(channel: u8) -> Result<usize, BusError> {
        let index = usize::from(channel);

        if !(1..=INPUT_CHANNELS).contains(&index) {
            return Err(BusError::InvalidChannel(channel));
        }

        Ok(index - 1)
    }
}

#[async_trait]
impl DigitalIo for SimulatedIo {
    async fn read_input(&mut self, channel: u8) -> Result<bool, BusError> {
        let index = Self::input_index(channel)?;
        Ok(self.inputs.lock().await[index])
    }

    async fn write_output(&mut self, channel: u8, value: bool) -> Result<(), BusError> {
        if !(1..=OUTPUT_CHANNELS).contains(&channel) {
            return Err(BusError::InvalidChannel(channel));
        }

        let gate = self.gates.iter().find(|gate| gate.signal == Some(channel));

        if let Some(&GateConfig {
            open_limit: Some(open),
            close_limit: Some(close),
            ..
        }) = gate
        {
            let mut inputs = self.inputs.lock().await;
            inputs[Self::input_index(open)?] = value;
            inputs[Self::input_index(close)?] = !value;
        }

        Ok(())
    }
}
