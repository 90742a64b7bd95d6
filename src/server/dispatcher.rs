use std::{io, sync::Arc};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, split};

use crate::{
    config::MonitorConfig,
    hardware::{GATE_COUNT, Hardware},
    server::{
        error::CommandError,
        monitor::Monitor,
        protocol::{Envelope, LineReader, Outbound},
        registry::Command,
    },
};

/// Serves one client connection: replies to requests in order while a
/// [`Monitor`] pushes events on the same stream.
pub struct Dispatcher {
    hardware: Arc<dyn Hardware>,
    monitor: MonitorConfig,
}

impl Dispatcher {
    const NO_GATE: i64 = -1;

    pub fn new(hardware: Arc<dyn Hardware>, monitor: MonitorConfig) -> Self {
        Self { hardware, monitor }
    }

    /// Runs the session until the peer closes the stream or a transport error
    /// occurs. The monitor is stopped before returning.
    pub async fn serve<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = split(stream);
        let outbound = Arc::new(Outbound::new(writer));

        let monitor = Monitor::new(self.hardware.clone(), outbound.clone(), &self.monitor).spawn();

        let result = self.read_loop(reader, &outbound).await;

        monitor.stop().await;

        if let Err(e) = outbound.shutdown().await {
            tracing::debug!("Failed to close client stream: {e}");
        }

        result
    }

    async fn read_loop<R, W>(&self, reader: R, outbound: &Outbound<W>) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send,
    {
        let mut lines = LineReader::new(reader);

        while let Some(line) = lines.next_line().await? {
            if let Some(envelope) = self.handle_line(&line).await {
                outbound.send(&envelope).await?;
            }
        }

        Ok(())
    }

    /// Parses and executes one request line. Blank lines produce no reply.
    pub async fn handle_line(&self, line: &str) -> Option<Envelope> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next()?;
        let args: Vec<&str> = tokens.collect();

        tracing::debug!("Received command: {line:?}");

        let result = match Command::parse(name, &args) {
            Ok(command) => self.execute(command).await,
            Err(e) => Err(e),
        };

        let envelope = match result {
            Ok(value) => Envelope::success(name, value),
            Err(e) => {
                tracing::warn!("Command {name} failed: {}", e.describe());
                Envelope::failure(name, &e)
            }
        };

        Some(envelope)
    }

    async fn execute(&self, command: Command) -> Result<Value, CommandError> {
        let hardware = self.hardware.as_ref();

        match command {
            Command::CloseVentGate(slots) => {
                for index in Self::gate_indices(slots)? {
                    hardware.close_gate(index).await?;
                }
            }

            Command::OpenVentGate(slots) => {
                for index in Self::gate_indices(slots)? {
                    hardware.open_gate(index).await?;
                }
            }

            Command::GetFanDriveMaxFrequency => return Ok(Value::from(hardware.max_frequency())),
            Command::ResetExtractionFanDrive => hardware.fault_reset().await?,
            Command::SetExtractionFanDriveFreq(frequency) => {
                hardware.set_fan_frequency(frequency).await?
            }
            Command::SetExtractionFanManualControlMode(manual) => {
                hardware.set_manual_control(manual).await?
            }
            Command::StartExtractionFan => hardware.start_fan().await?,
            Command::StopExtractionFan => hardware.stop_fan().await?,
            Command::Ping => {}
        }

        Ok(Value::Null)
    }

    /// Checks every slot before any gate is touched. `-1` skips a slot.
    fn gate_indices(slots: [i64; GATE_COUNT]) -> Result<Vec<usize>, CommandError> {
        let mut indices = Vec::with_capacity(GATE_COUNT);

        for slot in slots {
            if slot == Self::NO_GATE {
                continue;
            }

            match usize::try_from(slot) {
                Ok(index) if index < GATE_COUNT => indices.push(index),
                _ => return Err(CommandError::InvalidGateSlot(slot)),
            }
        }

        Ok(indices)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream, duplex};

    use crate::{
        config::Config,
        hardware::{
            Controller, FanDriveState, Fault, HardwareError, VentGateState,
            simulator::{SimulatedDrive, SimulatedIo},
        },
    };

    use super::*;

    struct Fixture {
        dispatcher: Dispatcher,
        hardware: Arc<Controller<SimulatedDrive, SimulatedIo>>,
        drive: SimulatedDrive,
    }

    fn fixture() -> Fixture {
        let config = Config::default();
        let drive = SimulatedDrive::new();
        let io = SimulatedIo::new(config.gates);
        let hardware = Arc::new(Controller::new(&config, drive.clone(), io));

        Fixture {
            dispatcher: Dispatcher::new(hardware.clone(), config.monitor),
            hardware,
            drive,
        }
    }

    async fn reply(dispatcher: &Dispatcher, line: &str) -> Envelope {
        dispatcher.handle_line(line).await.unwrap()
    }

    #[tokio::test]
    async fn test_blank_lines_are_ignored() {
        let Fixture { dispatcher, .. } = fixture();

        assert!(dispatcher.handle_line("").await.is_none());
        assert!(dispatcher.handle_line("  \t ").await.is_none());
    }

    #[tokio::test]
    async fn test_ping() {
        let Fixture { dispatcher, .. } = fixture();

        let envelope = reply(&dispatcher, "ping").await;
        assert_eq!(envelope, Envelope::success("ping", Value::Null));

        let envelope = reply(&dispatcher, "ping 1").await;
        assert_eq!(envelope.exception_name, "ArityMismatch");
    }

    #[tokio::test]
    async fn test_open_and_close_gates() {
        let Fixture {
            dispatcher,
            hardware,
            ..
        } = fixture();

        for _ in 0..2 {
            let envelope = reply(&dispatcher, "open_vent_gate 0 -1 -1 -1").await;
            assert_eq!(envelope.error, 0);
            assert_eq!(hardware.gate_state(0).await.unwrap(), VentGateState::Open);
        }

        let envelope = reply(&dispatcher, "close_vent_gate -1 -1 0 -1").await;
        assert_eq!(envelope.error, 0);
        assert_eq!(hardware.gate_state(0).await.unwrap(), VentGateState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_gate_slot_has_no_side_effect() {
        let Fixture {
            dispatcher,
            hardware,
            ..
        } = fixture();

        let envelope = reply(&dispatcher, "open_vent_gate 0 4 -1 -1").await;

        assert_eq!(envelope.exception_name, "ValidationError");
        assert_eq!(envelope.message, "Invalid vent (4) must be between 0 and 3");
        assert_eq!(hardware.gate_state(0).await.unwrap(), VentGateState::Closed);
    }

    #[tokio::test]
    async fn test_unconfigured_gate() {
        let Fixture { dispatcher, .. } = fixture();

        let envelope = reply(&dispatcher, "open_vent_gate 2 -1 -1 -1").await;
        assert_eq!(envelope.exception_name, "ValidationError");
    }

    #[tokio::test]
    async fn test_argument_errors() {
        let Fixture { dispatcher, .. } = fixture();

        let cases = [
            ("close_vent_gate", "ArityMismatch"),
            ("close_vent_gate 0.5 -1 -1 -1", "TypeCoercionError"),
            ("set_extraction_fan_manual_control_mode yes", "TypeCoercionError"),
            ("fly_away", "UnknownCommand"),
        ];

        for (line, kind) in cases {
            let envelope = reply(&dispatcher, line).await;
            assert_eq!(envelope.error, 1, "{line}");
            assert_eq!(envelope.exception_name, kind, "{line}");
        }

        let envelope = reply(&dispatcher, "fly_away").await;
        assert_eq!(envelope.command, "fly_away");
        assert!(envelope.message.contains("fly_away"));
    }

    #[tokio::test]
    async fn test_fan_frequency() {
        let Fixture {
            dispatcher,
            hardware,
            ..
        } = fixture();

        let envelope = reply(&dispatcher, "set_extraction_fan_drive_freq 60").await;
        assert_eq!(envelope.exception_name, "ValidationError");

        let envelope = reply(&dispatcher, "set_extraction_fan_drive_freq 17.26").await;
        assert_eq!(envelope.error, 0);
        assert!((hardware.get_fan_frequency().await.unwrap() - 17.3).abs() < 0.05);

        let envelope = reply(&dispatcher, "get_fan_drive_max_frequency").await;
        assert_eq!(envelope.return_value, Some(json!(50.0)));

        reply(&dispatcher, "stop_extraction_fan").await;
        assert_eq!(hardware.get_fan_frequency().await.unwrap(), 0.0);

        reply(&dispatcher, "start_extraction_fan").await;
        assert!((hardware.get_fan_frequency().await.unwrap() - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_hardware_errors() {
        let Fixture {
            dispatcher, drive, ..
        } = fixture();

        drive.set_register(8413, 99).await;
        let envelope = reply(&dispatcher, "set_extraction_fan_manual_control_mode t").await;
        assert_eq!(envelope.error, 0);

        drive.set_offline(true).await;
        let envelope = reply(&dispatcher, "reset_extraction_fan_drive").await;
        assert_eq!(envelope.exception_name, "HardwareCommunicationError");
        assert!(envelope.traceback.contains("Simulated drive offline"));

        drive.set_offline(false).await;
        let envelope = reply(&dispatcher, "ping").await;
        assert_eq!(envelope.error, 0);
    }

    /* == Full session == */

    async fn read_envelope(lines: &mut LineReader<DuplexStream>) -> Value {
        loop {
            let line = lines.next_line().await.unwrap().unwrap();

            if !line.is_empty() {
                return serde_json::from_str(&line).unwrap();
            }
        }
    }

    async fn read_reply(lines: &mut LineReader<DuplexStream>) -> Value {
        loop {
            let envelope = read_envelope(lines).await;
            let command = envelope["command"].as_str().unwrap();

            if !command.starts_with("evt_") && command != Envelope::TELEMETRY {
                return envelope;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_replies_and_events() {
        let Fixture {
            dispatcher,
            hardware,
            ..
        } = fixture();

        let (mut client, server) = duplex(4096);
        let session = tokio::spawn(async move { dispatcher.serve(server).await });

        client.write_all(b"ping\r\n\r\nopen_vent_gate 0 -1 -1 -1\n").await.unwrap();

        let mut lines = LineReader::new(client);

        let first = read_reply(&mut lines).await;
        assert_eq!(first["command"], "ping");
        assert_eq!(first["error"], 0);

        let second = read_reply(&mut lines).await;
        assert_eq!(second["command"], "open_vent_gate");

        assert_eq!(hardware.gate_state(0).await.unwrap(), VentGateState::Open);

        let mut gate_events = Vec::new();
        while gate_events.last() != Some(&json!([2, 0, 0, 0])) {
            let envelope = read_envelope(&mut lines).await;

            if envelope["command"] == Envelope::EVT_VENT_GATE_STATE {
                gate_events.push(envelope["data"].clone());
            }
        }

        assert!(gate_events.len() <= 2);

        drop(lines);
        tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    /* == Disconnect == */

    /// Idle enclosure that counts every hardware read.
    #[derive(Default)]
    struct CountingHardware {
        reads: AtomicUsize,
    }

    impl CountingHardware {
        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        fn read(&self) {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Hardware for CountingHardware {
        async fn connect(&self) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn open_gate(&self, _index: usize) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn close_gate(&self, _index: usize) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn gate_state(&self, _index: usize) -> Result<VentGateState, HardwareError> {
            self.read();
            Ok(VentGateState::Closed)
        }

        async fn get_manual_control(&self) -> Result<bool, HardwareError> {
            self.read();
            Ok(false)
        }

        async fn set_manual_control(&self, _manual: bool) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn start_fan(&self) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn stop_fan(&self) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn get_fan_frequency(&self) -> Result<f64, HardwareError> {
            self.read();
            Ok(0.0)
        }

        async fn set_fan_frequency(&self, _frequency: f64) -> Result<(), HardwareError> {
            Ok(())
        }

        fn max_frequency(&self) -> f64 {
            50.0
        }

        async fn fault_reset(&self) -> Result<(), HardwareError> {
            Ok(())
        }

        async fn last_8_faults(&self) -> Result<Vec<Fault>, HardwareError> {
            self.read();
            Ok(Vec::new())
        }

        async fn drive_state(&self) -> Result<FanDriveState, HardwareError> {
            self.read();
            Ok(FanDriveState::Stopped)
        }

        async fn bus_voltage(&self) -> Result<f64, HardwareError> {
            self.read();
            Ok(400.0)
        }
    }

    #[tokio::test]
    async fn test_disconnect_stops_polling_at_once() {
        let hardware = Arc::new(CountingHardware::default());
        let monitor = MonitorConfig {
            tick_ms: 60_000,
            ..MonitorConfig::default()
        };
        let dispatcher = Dispatcher::new(hardware.clone(), monitor);

        let (client, server) = duplex(4096);
        let session = tokio::spawn(async move { dispatcher.serve(server).await });

        // The first tick fires immediately and reports the initial state
        let mut lines = LineReader::new(client);
        let first = read_envelope(&mut lines).await;
        assert_eq!(first["command"], Envelope::EVT_VENT_GATE_STATE);

        let started = Instant::now();
        drop(lines);

        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));

        let reads = hardware.reads();
        assert!(reads > 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hardware.reads(), reads);
    }
}
