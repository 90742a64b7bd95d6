use crate::hardware::FanDriveState;

/* == Registers == */

pub struct Registers;

impl Registers {
    pub const SLL: u16 = 7010;
    pub const RSF: u16 = 7124;
    pub const FAULT: u16 = 7201;
    pub const CHCF: u16 = 8401;
    pub const FR1: u16 = 8413;
    pub const CD1: u16 = 8423;
    pub const CMD: u16 = 8501;
    pub const LFR: u16 = 8502;
    pub const LFRD: u16 = 8602;

    pub const BUS_VOLTAGE: u16 = 3207;
    pub const STATUS: u16 = 3240;
}

pub const FAULT_HISTORY_LEN: u16 = 8;

/// Frequency registers are expressed in tenths of a hertz.
pub const FREQUENCY_SCALE: f64 = 0.1;

/// Bus voltage is expressed in tenths of a volt.
pub const VOLTAGE_SCALE: f64 = 0.1;

/* == Control profiles == */

// FR1     CHCF    CD1      RSF       SLL
// 1 = A1  1 = SIN 1 = TER  0 = NO    1 = YES
// 164 =   3 = IO  10 =     162 =     0 = NO
// modbus          modbus   CD02
pub const PROFILE_REGISTERS: [u16; 5] = [
    Registers::FR1,
    Registers::CHCF,
    Registers::CD1,
    Registers::RSF,
    Registers::SLL,
];

pub const MANUAL_PROFILE: [u16; 5] = [1, 1, 1, 0, 1];
pub const AUTO_PROFILE: [u16; 5] = [164, 3, 10, 162, 0];

pub const FAULT_RESET_SEQUENCE: [(u16, u16); 6] = [
    (Registers::CMD, 0),
    (Registers::LFRD, 0),
    (Registers::CMD, 4),
    (Registers::LFRD, 0),
    (Registers::CMD, 0),
    (Registers::LFRD, 0),
];

/* == Status == */

pub struct Status;

impl Status {
    pub const INIT: u16 = 0;
    pub const IDLE: u16 = 1;
    pub const CONFIG: u16 = 2;
    pub const READY: u16 = 3;
    pub const OPERATIONAL: u16 = 4;
    pub const FAULT: u16 = 5;
    pub const UNCONFIGURED: u16 = 0xFFFF;
}

pub fn drive_state(status: u16) -> FanDriveState {
    match status {
        Status::INIT | Status::IDLE | Status::CONFIG | Status::READY | Status::UNCONFIGURED => {
            FanDriveState::Stopped
        }
        Status::OPERATIONAL => FanDriveState::Operating,
        _ => FanDriveState::Fault,
    }
}

/* == Faults == */

pub fn fault_description(code: u16) -> &'static str {
    match code {
        0 => "No fault saved",
        2 => "EEprom control fault",
        3 => "Incorrect configuration",
        4 => "Invalid config parameters",
        5 => "Modbus coms fault",
        6 => "Com Internal link fault",
        7 => "Network fault",
        8 => "External fault logic input",
        9 => "Overcurrent fault",
        10 => "Precharge",
        11 => "Speed feedback loss",
        12 => "Output speed <> ref",
        16 => "Drive overheating fault",
        17 => "Motor overload fault",
        18 => "DC bus overvoltage fault",
        19 => "Supply overvoltage fault",
        20 => "1 motor phase loss fault",
        21 => "Supply phase loss fault",
        22 => "Supply undervolt fault",
        23 => "Motor short circuit",
        24 => "Motor overspeed fault",
        25 => "Auto-tuning fault",
        26 => "Rating error",
        27 => "Incompatible control card",
        28 => "Internal coms link fault",
        29 => "Internal manu zone fault",
        30 => "EEprom power fault",
        32 => "Ground short circuit",
        33 => "3 motor phase loss fault",
        34 => "Comms fault CANopen",
        35 => "Brake control fault",
        38 => "External fault comms",
        41 => "Brake feedback fault",
        42 => "PC coms fault",
        44 => "Torque/current limit fault",
        45 => "HMI coms fault",
        49 => "LI6=PTC failed",
        50 => "LI6=PTC overheat fault",
        51 => "Internal I measure fault",
        52 => "Internal i/p volt circuit flt",
        53 => "Internal temperature fault",
        54 => "IGBT overheat fault",
        55 => "IGBT short circuit fault",
        56 => "Motor short circuit",
        58 => "Output cont close fault",
        59 => "Output cont open fault",
        64 => "Input contactor",
        67 => "IGBT desaturation",
        68 => "Internal option fault",
        69 => "Internal CPU fault",
        71 => "AI3 4-20mA loss",
        73 => "Cards pairing",
        76 => "Dynamic load fault",
        77 => "Interrupted config.",
        99 => "Channel switching fault",
        100 => "Process underload fault",
        101 => "Process overload fault",
        105 => "Angle error",
        107 => "Safety fault",
        108 => "FB fault",
        109 => "FB stop fault",
        _ => "Unknown fault",
    }
}
