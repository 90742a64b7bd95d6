use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{hardware::GATE_COUNT, server::error::CommandError};

/// Commands accepted on the wire, keyed by their snake_case name.
#[derive(Copy, Clone, Debug, Display, EnumIter, EnumString, IntoStaticStr, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum CommandName {
    CloseVentGate,
    OpenVentGate,
    GetFanDriveMaxFrequency,
    ResetExtractionFanDrive,
    SetExtractionFanDriveFreq,
    SetExtractionFanManualControlMode,
    StartExtractionFan,
    StopExtractionFan,
    Ping,
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum ParamKind {
    #[strum(to_string = "integer")]
    Int,
    #[strum(to_string = "floating-point")]
    Float,
    #[strum(to_string = "boolean")]
    Bool,
    #[strum(to_string = "string")]
    Str,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// A request whose arguments have been checked and coerced.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    CloseVentGate([i64; GATE_COUNT]),
    OpenVentGate([i64; GATE_COUNT]),
    GetFanDriveMaxFrequency,
    ResetExtractionFanDrive,
    SetExtractionFanDriveFreq(f64),
    SetExtractionFanManualControlMode(bool),
    StartExtractionFan,
    StopExtractionFan,
    Ping,
}

impl CommandName {
    pub fn params(self) -> &'static [ParamKind] {
        use ParamKind::*;

        match self {
            CommandName::CloseVentGate | CommandName::OpenVentGate => &[Int, Int, Int, Int],
            CommandName::SetExtractionFanDriveFreq => &[Float],
            CommandName::SetExtractionFanManualControlMode => &[Bool],

            CommandName::GetFanDriveMaxFrequency
            | CommandName::ResetExtractionFanDrive
            | CommandName::StartExtractionFan
            | CommandName::StopExtractionFan
            | CommandName::Ping => &[],
        }
    }
}

impl ParamKind {
    pub fn coerce(self, token: &str) -> Result<Arg, CommandError> {
        let invalid = || CommandError::TypeCoercion {
            kind: self,
            token: token.to_owned(),
        };

        match self {
            ParamKind::Int => token.parse().map(Arg::Int).map_err(|_| invalid()),
            ParamKind::Float => token.parse().map(Arg::Float).map_err(|_| invalid()),
            ParamKind::Bool => match token.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Arg::Bool(true)),
                "false" | "f" | "0" => Ok(Arg::Bool(false)),
                _ => Err(invalid()),
            },
            ParamKind::Str => Ok(Arg::Str(token.to_owned())),
        }
    }
}

impl Command {
    /// Looks up `name`, checks the argument count and coerces every token.
    pub fn parse(name: &str, tokens: &[&str]) -> Result<Self, CommandError> {
        let command: CommandName = name
            .parse()
            .map_err(|_| CommandError::UnknownCommand(name.to_owned()))?;

        let params = command.params();

        if tokens.len() != params.len() {
            return Err(CommandError::ArityMismatch {
                command,
                expected: params.len(),
                received: tokens.len(),
            });
        }

        let args = params
            .iter()
            .zip(tokens)
            .map(|(kind, token)| kind.coerce(token))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_args(command, &args)
    }

    fn from_args(command: CommandName, args: &[Arg]) -> Result<Self, CommandError> {
        use Arg::*;

        let parsed = match (command, args) {
            (CommandName::CloseVentGate, &[Int(a), Int(b), Int(c), Int(d)]) => {
                Command::CloseVentGate([a, b, c, d])
            }
            (CommandName::OpenVentGate, &[Int(a), Int(b), Int(c), Int(d)]) => {
                Command::OpenVentGate([a, b, c, d])
            }
            (CommandName::SetExtractionFanDriveFreq, &[Float(frequency)]) => {
                Command::SetExtractionFanDriveFreq(frequency)
            }
            (CommandName::SetExtractionFanManualControlMode, &[Bool(manual)]) => {
                Command::SetExtractionFanManualControlMode(manual)
            }
            (CommandName::GetFanDriveMaxFrequency, []) => Command::GetFanDriveMaxFrequency,
            (CommandName::ResetExtractionFanDrive, []) => Command::ResetExtractionFanDrive,
            (CommandName::StartExtractionFan, []) => Command::StartExtractionFan,
            (CommandName::StopExtractionFan, []) => Command::StopExtractionFan,
            (CommandName::Ping, []) => Command::Ping,

            _ => {
                return Err(CommandError::ArityMismatch {
                    command,
                    expected: command.params().len(),
                    received: args.len(),
                });
            }
        };

        Ok(parsed)
    }

    pub fn name(&self) -> CommandName {
        match self {
            Command::CloseVentGate(_) => CommandName::CloseVentGate,
            Command::OpenVentGate(_) => CommandName::OpenVentGate,
            Command::GetFanDriveMaxFrequency => CommandName::GetFanDriveMaxFrequency,
            Command::ResetExtractionFanDrive => CommandName::ResetExtractionFanDrive,
            Command::SetExtractionFanDriveFreq(_) => CommandName::SetExtractionFanDriveFreq,
            Command::SetExtractionFanManualControlMode(_) => {
                CommandName::SetExtractionFanManualControlMode
            }
            Command::StartExtractionFan => CommandName::StartExtractionFan,
            Command::StopExtractionFan => CommandName::StopExtractionFan,
            Command::Ping => CommandName::Ping,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use crate::server::error::ErrorKind;

    use super::*;

    fn parse(line: &str) -> Result<Command, CommandError> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().unwrap();
        Command::parse(name, &tokens.collect::<Vec<_>>())
    }

    fn kind(line: &str) -> ErrorKind {
        parse(line).unwrap_err().kind()
    }

    #[test]
    fn test_wire_names() {
        let names: Vec<&'static str> = CommandName::iter().map(Into::into).collect();

        assert_eq!(
            names,
            [
                "close_vent_gate",
                "open_vent_gate",
                "get_fan_drive_max_frequency",
                "reset_extraction_fan_drive",
                "set_extraction_fan_drive_freq",
                "set_extraction_fan_manual_control_mode",
                "start_extraction_fan",
                "stop_extraction_fan",
                "ping",
            ]
        );
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse("open_vent_gate 0 -1 -1 -1").unwrap(),
            Command::OpenVentGate([0, -1, -1, -1])
        );
        assert_eq!(
            parse("set_extraction_fan_drive_freq 22.5").unwrap(),
            Command::SetExtractionFanDriveFreq(22.5)
        );
        assert_eq!(parse("ping").unwrap().name(), CommandName::Ping);
    }

    #[test]
    fn test_bool_coercion() {
        for token in ["true", "T", "1", "TRUE"] {
            assert_eq!(ParamKind::Bool.coerce(token).unwrap(), Arg::Bool(true));
        }

        for token in ["false", "f", "0", "False"] {
            assert_eq!(ParamKind::Bool.coerce(token).unwrap(), Arg::Bool(false));
        }

        for token in ["yes", "2", "", "on"] {
            assert!(ParamKind::Bool.coerce(token).is_err());
        }
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(ParamKind::Int.coerce("-1").unwrap(), Arg::Int(-1));
        assert_eq!(ParamKind::Float.coerce("3").unwrap(), Arg::Float(3.0));
        assert_eq!(
            ParamKind::Str.coerce("anything").unwrap(),
            Arg::Str("anything".into())
        );

        assert!(ParamKind::Int.coerce("0.5").is_err());
        assert!(ParamKind::Float.coerce("fast").is_err());
    }

    #[test]
    fn test_errors() {
        assert_eq!(kind("close_vent_gate"), ErrorKind::ArityMismatch);
        assert_eq!(kind("close_vent_gate 0.5 -1 -1 -1"), ErrorKind::TypeCoercionError);
        assert_eq!(kind("ping now"), ErrorKind::ArityMismatch);
        assert_eq!(kind("set_extraction_fan_manual_control_mode maybe"), ErrorKind::TypeCoercionError);

        match parse("do_a_barrel_roll 1") {
            Err(CommandError::UnknownCommand(name)) => assert_eq!(name, "do_a_barrel_roll"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
