use std::{io, sync::Arc, time::Duration};

use tokio::{
    io::AsyncWrite,
    select,
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use crate::{
    config::MonitorConfig,
    hardware::{FanDriveState, GATE_COUNT, Hardware, HardwareError, VentGateState},
    server::protocol::{Envelope, Outbound},
};

/* === Change detection === */

/// Hardware readings gathered by one monitor tick.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub gates: [VentGateState; GATE_COUNT],
    pub last_fault: u16,
    pub drive_state: FanDriveState,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Telemetry {
    pub fan_frequency: f64,
    pub drive_voltage: f64,
}

/// Last values reported to the connected client.
///
/// Starts empty, so the first observation of every value is reported.
#[derive(Debug)]
pub struct SessionState {
    gates: Option<[VentGateState; GATE_COUNT]>,
    last_fault: Option<u16>,
    drive_state: Option<FanDriveState>,
    telemetry: Option<Telemetry>,
    countdown: u32,
    telemetry_interval: u32,
}

impl SessionState {
    pub fn new(telemetry_interval: u32) -> Self {
        Self {
            gates: None,
            last_fault: None,
            drive_state: None,
            telemetry: None,
            countdown: 0,
            telemetry_interval,
        }
    }

    pub fn gates(&self) -> Option<[VentGateState; GATE_COUNT]> {
        self.gates
    }

    /// Returns the events for every value that differs from the last report,
    /// gate states first, then the fault code, then the drive state.
    pub fn observe(&mut self, snapshot: Snapshot) -> Vec<Envelope> {
        let mut events = Vec::new();

        if self.gates != Some(snapshot.gates) {
            tracing::info!("Vent state changed: {:?} -> {:?}", self.gates, snapshot.gates);
            events.push(Envelope::gate_states(&snapshot.gates));
            self.gates = Some(snapshot.gates);
        }

        if self.last_fault != Some(snapshot.last_fault) {
            tracing::info!("Last fault changed: {:?} -> {}", self.last_fault, snapshot.last_fault);
            events.push(Envelope::fault_code(snapshot.last_fault));
            self.last_fault = Some(snapshot.last_fault);
        }

        if self.drive_state != Some(snapshot.drive_state) {
            tracing::info!(
                "Fan drive state changed: {:?} -> {}",
                self.drive_state,
                snapshot.drive_state
            );
            events.push(Envelope::drive_state(snapshot.drive_state));
            self.drive_state = Some(snapshot.drive_state);
        }

        events
    }

    /// Counts down one tick and returns a telemetry envelope when the countdown
    /// expires or a value changed.
    pub fn observe_telemetry(&mut self, telemetry: Telemetry) -> Option<Envelope> {
        self.countdown = self.countdown.saturating_sub(1);

        if self.countdown > 0 && self.telemetry == Some(telemetry) {
            return None;
        }

        self.countdown = self.telemetry_interval;
        self.telemetry = Some(telemetry);

        Some(Envelope::telemetry(
            telemetry.fan_frequency,
            telemetry.drive_voltage,
        ))
    }
}

/// Tracks a run of failed reads, so that only its start and end are logged loudly.
#[derive(Debug, Default)]
struct Outage {
    active: bool,
}

impl Outage {
    /// Records a failure, returns `true` if it starts a new outage.
    fn fail(&mut self) -> bool {
        !std::mem::replace(&mut self.active, true)
    }

    /// Records a success, returns `true` if it ends an outage.
    fn recover(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }
}

/* === Background task === */

/// Periodic poll of the hardware, pushing events to the connected client.
pub struct Monitor<W> {
    hardware: Arc<dyn Hardware>,
    outbound: Arc<Outbound<W>>,
    session: SessionState,
    tick: Duration,
    status_outage: Outage,
    telemetry_outage: Outage,
}

/// Owner of a running monitor. Dropping it aborts the task.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> Monitor<W> {
    const MIN_TICK: Duration = Duration::from_millis(1);

    pub fn new(hardware: Arc<dyn Hardware>, outbound: Arc<Outbound<W>>, config: &MonitorConfig) -> Self {
        Self {
            hardware,
            outbound,
            session: SessionState::new(config.telemetry_interval),
            tick: config.tick(),
            status_outage: Outage::default(),
            telemetry_outage: Outage::default(),
        }
    }

    pub fn spawn(self) -> MonitorHandle {
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(self.run(signal));

        MonitorHandle {
            shutdown,
            task: Some(task),
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.tick.max(Self::MIN_TICK));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // Only the wait is cancelled, a tick in progress always completes
            select! {
                _ = timer.tick() => {}
                _ = shutdown.changed() => break,
            }

            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.poll().await {
                tracing::debug!("Stopping monitor, client unreachable: {e}");
                break;
            }
        }

        tracing::debug!("Monitor stopped");
    }

    async fn poll(&mut self) -> io::Result<()> {
        match self.snapshot().await {
            Ok(snapshot) => {
                if self.status_outage.recover() {
                    tracing::info!("Hardware status readable again");
                }

                for event in self.session.observe(snapshot) {
                    self.outbound.send(&event).await?;
                }
            }
            Err(e) if self.status_outage.fail() => {
                tracing::error!("Failed to read hardware status: {e}")
            }
            Err(e) => tracing::debug!("Hardware status still unreadable: {e}"),
        }

        match self.telemetry().await {
            Ok(telemetry) => {
                if self.telemetry_outage.recover() {
                    tracing::info!("Telemetry readable again");
                }

                if let Some(envelope) = self.session.observe_telemetry(telemetry) {
                    self.outbound.send(&envelope).await?;
                }
            }
            Err(e) if self.telemetry_outage.fail() => {
                tracing::error!("Failed to read telemetry: {e}")
            }
            Err(e) => tracing::debug!("Telemetry still unreadable: {e}"),
        }

        Ok(())
    }

    async fn snapshot(&self) -> Result<Snapshot, HardwareError> {
        let previous = self.session.gates();
        let mut gates = [VentGateState::Closed; GATE_COUNT];

        for (index, gate) in gates.iter_mut().enumerate() {
            *gate = match self.hardware.gate_state(index).await {
                Ok(state) => state,
                Err(HardwareError::GateNotConfigured(_)) => VentGateState::Closed,
                Err(e) => {
                    tracing::warn!("Failed to read vent {index}: {e}");
                    previous.map_or(VentGateState::Closed, |states| states[index])
                }
            };
        }

        let faults = self.hardware.last_8_faults().await?;
        let last_fault = faults.first().map_or(0, |fault| fault.code);
        let drive_state = self.hardware.drive_state().await?;

        Ok(Snapshot {
            gates,
            last_fault,
            drive_state,
        })
    }

    async fn telemetry(&self) -> Result<Telemetry, HardwareError> {
        Ok(Telemetry {
            fan_frequency: self.hardware.get_fan_frequency().await?,
            drive_voltage: self.hardware.bus_voltage().await?,
        })
    }
}

impl MonitorHandle {
    /// Cancels the pending wait and waits for the task to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Monitor task failed: {e}");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
