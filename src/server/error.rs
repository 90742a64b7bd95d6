use std::error::Error as _;

use strum::Display;
use thiserror::Error;

use crate::{
    hardware::HardwareError,
    server::registry::{CommandName, ParamKind},
};

/// Failure classes reported to the client, displayed as their wire name.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum ErrorKind {
    UnknownCommand,
    ArityMismatch,
    TypeCoercionError,
    ValidationError,
    HardwareCommunicationError,
    InvalidDriveState,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No such command \"{0}\"")]
    UnknownCommand(String),

    #[error("Command {command} expects {expected} argument(s), got {received}")]
    ArityMismatch {
        command: CommandName,
        expected: usize,
        received: usize,
    },

    #[error("Expected {kind} value but got \"{token}\"")]
    TypeCoercion { kind: ParamKind, token: String },

    #[error("Invalid vent ({0}) must be between 0 and 3")]
    InvalidGateSlot(i64),

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            CommandError::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            CommandError::TypeCoercion { .. } => ErrorKind::TypeCoercionError,
            CommandError::InvalidGateSlot(_) => ErrorKind::ValidationError,

            CommandError::Hardware(error) => match error {
                HardwareError::InvalidGate(_)
                | HardwareError::GateNotConfigured(_)
                | HardwareError::FrequencyOutOfRange { .. } => ErrorKind::ValidationError,
                HardwareError::InvalidDriveState(_) => ErrorKind::InvalidDriveState,
                HardwareError::Bus(_) => ErrorKind::HardwareCommunicationError,
            },
        }
    }

    /// Message followed by every underlying cause, `: ` separated.
    pub fn describe(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();

        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        message
    }
}
