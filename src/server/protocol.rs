use std::io;

use bytes::{Buf, BytesMut};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::{
    hardware::{FanDriveState, GATE_COUNT, VentGateState},
    server::error::CommandError,
};

/* === Envelope === */

/// One protocol message, either a reply to a request or an unsolicited event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    pub error: u8,
    pub exception_name: String,
    pub message: String,
    pub traceback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub const EVT_VENT_GATE_STATE: &str = "evt_vent_gate_state";
    pub const EVT_FAULT_CODE: &str = "evt_extraction_fan_drive_fault_code";
    pub const EVT_DRIVE_STATE: &str = "evt_extraction_fan_drive_state";
    pub const TELEMETRY: &str = "telemetry";

    pub fn success(command: &str, return_value: Value) -> Self {
        Self {
            command: command.to_owned(),
            return_value: Some(return_value),
            error: 0,
            exception_name: String::new(),
            message: String::new(),
            traceback: String::new(),
            data: None,
        }
    }

    pub fn failure(command: &str, error: &CommandError) -> Self {
        Self {
            command: command.to_owned(),
            return_value: None,
            error: 1,
            exception_name: error.kind().to_string(),
            message: error.to_string(),
            traceback: error.describe(),
            data: None,
        }
    }

    fn event(command: &str, data: Value) -> Self {
        Self {
            command: command.to_owned(),
            return_value: None,
            error: 0,
            exception_name: String::new(),
            message: String::new(),
            traceback: String::new(),
            data: Some(data),
        }
    }

    pub fn gate_states(states: &[VentGateState; GATE_COUNT]) -> Self {
        let codes: Vec<Value> = states.iter().map(|s| Value::from(s.code())).collect();
        Self::event(Self::EVT_VENT_GATE_STATE, Value::Array(codes))
    }

    pub fn fault_code(code: u16) -> Self {
        Self::event(Self::EVT_FAULT_CODE, Value::from(code))
    }

    pub fn drive_state(state: FanDriveState) -> Self {
        Self::event(Self::EVT_DRIVE_STATE, Value::from(state.code()))
    }

    pub fn telemetry(fan_frequency: f64, drive_voltage: f64) -> Self {
        let data = json!({
            "tel_extraction_fan": fan_frequency,
            "tel_drive_voltage": drive_voltage,
        });

        Self::event(Self::TELEMETRY, data)
    }

    pub fn is_unsolicited(&self) -> bool {
        self.command.starts_with("evt_") || self.command == Self::TELEMETRY
    }
}

/* === Transport === */

/// Splits the incoming byte stream into lines terminated by `\r` or `\n`.
pub struct LineReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub const MAX_LINE_LEN: usize = 4096;

    const READ_CHUNK: usize = 1024;

    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(Self::READ_CHUNK),
        }
    }

    /// Returns the next line without its terminator, or `None` once the peer
    /// has closed the stream.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(end) = self.buffer.iter().position(|&b| b == b'\r' || b == b'\n') {
                let line = self.buffer.split_to(end);
                self.buffer.advance(1);
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.buffer.len() > Self::MAX_LINE_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Line exceeds {} bytes", Self::MAX_LINE_LEN),
                ));
            }

            self.buffer.reserve(Self::READ_CHUNK);

            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }

                let rest = self.buffer.split();
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
        }
    }
}

/// Write half of the connection, shared by the request loop and the monitor.
///
/// Each envelope is written and flushed as a whole under the lock, so replies
/// and events never interleave on the wire.
pub struct Outbound<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> Outbound<W> {
    const TERMINATOR: &str = "\r\n";

    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub async fn send(&self, envelope: &Envelope) -> io::Result<()> {
        let mut line = serde_json::to_string(envelope)?;
        line.push_str(Self::TERMINATOR);

        if envelope.is_unsolicited() {
            tracing::trace!("Pushing {}", envelope.command);
        } else {
            tracing::debug!("Replying to {} (error {})", envelope.command, envelope.error);
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }

    pub async fn shutdown(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}
