use serde::{Serialize, Serializer};
use strum::Display;

pub const GATE_COUNT: usize = 4;

/// Position of a vent gate, derived from its two limit switches.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VentGateState {
    Closed,
    PartiallyOpen,
    Open,
    Fault,
}

/// Coarse operating state of the fan drive.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FanDriveState {
    Stopped,
    Operating,
    Fault,
}

/// One entry of the drive's fault history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Fault {
    pub code: u16,
    pub description: &'static str,
}

impl VentGateState {
    pub fn from_limits(open_limit: bool, close_limit: bool) -> Self {
        match (open_limit, close_limit) {
            (true, false) => VentGateState::Open,
            (false, false) => VentGateState::PartiallyOpen,
            (false, true) => VentGateState::Closed,
            (true, true) => VentGateState::Fault,
        }
    }

    pub fn code(self) -> i8 {
        match self {
            VentGateState::Closed => 0,
            VentGateState::PartiallyOpen => 1,
            VentGateState::Open => 2,
            VentGateState::Fault => -1,
        }
    }
}

impl FanDriveState {
    pub fn code(self) -> u8 {
        match self {
            FanDriveState::Stopped => 0,
            FanDriveState::Operating => 1,
            FanDriveState::Fault => 2,
        }
    }
}

impl Serialize for VentGateState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.code())
    }
}

impl Serialize for FanDriveState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}
