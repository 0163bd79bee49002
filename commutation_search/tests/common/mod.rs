#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use commutation_search::{
    config::Config,
    connection::ConnectionManager,
    controller::{Connector, MotionController, ScopeReader},
    procedure::CalibrationDriver,
    sweep::{InterruptSource, Operator},
};
use ensemble::{
    AxisFault, AxisStatus, EnsembleClient, EnsembleError, ScopeDataReader, TraceDataset,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex},
    sync::mpsc,
    time::sleep,
};
use tracing::Span;

/// Behaviour and command log of the simulated controller.
#[derive(Debug, Default)]
pub struct SimState {
    pub connect_attempts: u32,
    /// Connection attempts to refuse before accepting.
    pub refusals: u32,
    /// Liveness checks that never answer.
    pub hung_healthchecks: u32,
    /// Liveness checks answered by a connection reset.
    pub reset_healthchecks: u32,
    /// Fault polls that still report a fault.
    pub fault_polls: u32,
    pub not_in_position: bool,
    /// Scope reads that fail with a connection reset.
    pub scope_failures: u32,
    /// Scope reads that never answer.
    pub hung_scope_reads: u32,
    /// Remaining injected `SETPARM` failures per offset.
    pub parameter_failures: HashMap<i32, u32>,
    /// Fires once when this offset is written.
    pub interrupt_at: Option<(i32, mpsc::UnboundedSender<()>)>,

    pub offset: Option<i32>,
    pub commands: Vec<String>,
}

impl SimState {
    pub fn parameter_writes(&self, offset: i32) -> usize {
        let command = format!("SETPARM @0, CommutationOffset, {offset}");
        self.count(&command)
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands.iter().filter(|c| *c == command).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sim {
    state: Arc<Mutex<SimState>>,
}

impl Sim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector { sim: self.clone() }
    }

    fn record(&self, command: impl Into<String>) {
        self.state().commands.push(command.into());
    }
}

/// Trace returned for `offset`: the feedback current encodes the offset.
pub fn trace_for(offset: i32) -> TraceDataset {
    let mut dataset = TraceDataset::default();
    for i in 0..3 {
        let position = 2200.0 + 20_000.0 * i as f64;
        dataset.push_row([i as f64, position, position, 0.0, offset as f64]);
    }
    dataset
}

#[derive(Debug)]
pub struct SimConnector {
    sim: Sim,
}

impl Connector for SimConnector {
    type Session = SimSession;
    type Scope = SimScope;

    fn target(&self) -> String {
        "sim:8000".to_string()
    }

    async fn open_session(&self) -> ensemble::Result<SimSession> {
        let mut state = self.sim.state();
        state.connect_attempts += 1;

        if state.refusals > 0 {
            state.refusals -= 1;
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }

        Ok(SimSession {
            sim: self.sim.clone(),
        })
    }

    async fn open_scope(&self) -> ensemble::Result<SimScope> {
        Ok(SimScope {
            sim: self.sim.clone(),
        })
    }
}

#[derive(Debug)]
pub struct SimSession {
    sim: Sim,
}

impl MotionController for SimSession {
    async fn program_status(&mut self) -> ensemble::Result<u32> {
        let hang = {
            let mut state = self.sim.state();
            state.commands.push("TASKSTATE(1)".to_string());
            if state.reset_healthchecks > 0 {
                state.reset_healthchecks -= 1;
                return Err(io::Error::from(io::ErrorKind::ConnectionReset).into());
            }
            if state.hung_healthchecks > 0 {
                state.hung_healthchecks -= 1;
                true
            } else {
                false
            }
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(1)
    }

    async fn axis_status(&mut self, axis: &str) -> ensemble::Result<AxisStatus> {
        let mut state = self.sim.state();
        state.commands.push(format!("AXISSTATUS({axis})"));

        if state.not_in_position {
            Ok(AxisStatus::ENABLED)
        } else {
            Ok(AxisStatus::ENABLED | AxisStatus::IN_POSITION)
        }
    }

    async fn axis_fault(&mut self, axis: &str) -> ensemble::Result<AxisFault> {
        let mut state = self.sim.state();
        state.commands.push(format!("AXISFAULT({axis})"));

        if state.fault_polls > 0 {
            state.fault_polls -= 1;
            Ok(AxisFault::OVER_CURRENT)
        } else {
            Ok(AxisFault::empty())
        }
    }

    async fn disable(&mut self, axis: &str) -> ensemble::Result<()> {
        self.sim.record(format!("DISABLE {axis}"));
        Ok(())
    }

    async fn set_parameter(
        &mut self,
        axis: &str,
        parameter: &str,
        value: f64,
    ) -> ensemble::Result<()> {
        let command = format!("SETPARM {axis}, {parameter}, {value}");
        let offset = value as i32;
        let mut state = self.sim.state();
        state.commands.push(command.clone());

        if let Some(remaining) = state.parameter_failures.get_mut(&offset) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(EnsembleError::Fault { command });
            }
        }

        if state
            .interrupt_at
            .as_ref()
            .is_some_and(|(at, _)| *at == offset)
        {
            if let Some((_, interrupt)) = state.interrupt_at.take() {
                let _ = interrupt.send(());
            }
        }

        state.offset = Some(offset);
        Ok(())
    }

    async fn commit_parameters(&mut self) -> ensemble::Result<()> {
        self.sim.record("COMMITPARAMETERS");
        Err(EnsembleError::TimeoutResponse {
            command: "COMMITPARAMETERS".to_string(),
        })
    }

    async fn reset(&mut self) -> ensemble::Result<()> {
        self.sim.record("RESET");
        Err(io::Error::from(io::ErrorKind::ConnectionReset).into())
    }

    async fn move_and_wait(
        &mut self,
        axis: &str,
        position: f64,
        speed: f64,
        _poll_period: Duration,
    ) -> ensemble::Result<()> {
        self.sim
            .record(format!("MOVEABS {axis} {position} {axis}F {speed}"));
        Ok(())
    }

    async fn wait_axis_status(
        &mut self,
        axis: &str,
        flags: AxisStatus,
        _poll_period: Duration,
        _timeout: Duration,
        _check_enabled: bool,
    ) -> ensemble::Result<bool> {
        let status = self.axis_status(axis).await?;
        Ok(status.contains(flags))
    }

    async fn scope_start(&mut self, data_points: u32, period_ms: u32) -> ensemble::Result<()> {
        self.sim
            .record(format!("SCOPEBUFFER {data_points} @ {period_ms}ms"));
        Ok(())
    }

    async fn scope_stop(&mut self) -> ensemble::Result<()> {
        self.sim.record("SCOPETRIG STOP");
        Ok(())
    }

    async fn scope_wait(&mut self, _poll_period: Duration) -> ensemble::Result<()> {
        self.sim.record("SCOPESTATUS(0)");
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimScope {
    sim: Sim,
}

impl ScopeReader for SimScope {
    async fn read_data(&mut self, points: u32) -> ensemble::Result<TraceDataset> {
        let hang = {
            let mut state = self.sim.state();
            state.commands.push(format!("SCOPEDATA {points}"));

            if state.scope_failures > 0 {
                state.scope_failures -= 1;
                return Err(io::Error::from(io::ErrorKind::ConnectionReset).into());
            }
            if state.hung_scope_reads > 0 {
                state.hung_scope_reads -= 1;
                true
            } else {
                false
            }
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let state = self.sim.state();
        let offset = state.offset.ok_or_else(|| EnsembleError::InvalidResponse {
            command: format!("SCOPEDATA {points}"),
            response: "no capture".to_string(),
        })?;
        Ok(trace_for(offset))
    }
}

/// Interrupts delivered through a channel.
pub struct ChannelInterrupts {
    receiver: mpsc::UnboundedReceiver<()>,
}

impl InterruptSource for ChannelInterrupts {
    async fn interrupted(&mut self) {
        if self.receiver.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn interrupt_channel() -> (mpsc::UnboundedSender<()>, ChannelInterrupts) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (sender, ChannelInterrupts { receiver })
}

/// Answers the continue prompt from a script; aborts once it runs dry.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    pub answers: VecDeque<bool>,
    pub prompts: Arc<Mutex<u32>>,
}

impl ScriptedOperator {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            prompts: Arc::default(),
        }
    }
}

impl Operator for ScriptedOperator {
    async fn confirm_continue(&mut self) -> bool {
        *self.prompts.lock().unwrap() += 1;
        self.answers.pop_front().unwrap_or(false)
    }
}

/// Rows served for every `SCOPEDATA` request by [`AsciiConnector`].
pub const ASCII_SCOPE_ROWS: &str = "0,2200,2200,0,0.5\n1,42000,42000,0,0.5\n%\n";

/// Speaks the ASCII protocol over in-memory pipes. Axis status queries are
/// answered after `status_delay`; the axis reports in position once it has
/// been moved.
#[derive(Debug, Clone)]
pub struct AsciiConnector {
    status_delay: Duration,
    moved: Arc<Mutex<bool>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl AsciiConnector {
    pub fn new(status_delay: Duration) -> Self {
        Self {
            status_delay,
            moved: Arc::default(),
            commands: Arc::default(),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn reply(&self, command: &str) -> &'static str {
        if command.starts_with("AXISSTATUS") {
            if *self.moved.lock().unwrap() {
                "%5"
            } else {
                "%1"
            }
        } else if command.starts_with("TASKSTATE") {
            "%1"
        } else if command.starts_with("AXISFAULT") || command.starts_with("SCOPESTATUS") {
            "%0"
        } else {
            if command.starts_with("MOVEABS") {
                *self.moved.lock().unwrap() = true;
            }
            "%"
        }
    }

    async fn serve_commands(self, stream: DuplexStream) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            self.commands.lock().unwrap().push(line.clone());

            if line.starts_with("AXISSTATUS") {
                sleep(self.status_delay).await;
            }
            let reply = format!("{}\n", self.reply(&line));

            // the controller drops the session after a reset
            if write.write_all(reply.as_bytes()).await.is_err() || line == "RESET" {
                break;
            }
        }
    }

    async fn serve_scope(stream: DuplexStream) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();

        if let Ok(Some(_request)) = lines.next_line().await {
            let _ = write.write_all(ASCII_SCOPE_ROWS.as_bytes()).await;
        }
    }
}

impl Connector for AsciiConnector {
    type Session = EnsembleClient<DuplexStream>;
    type Scope = ScopeDataReader<DuplexStream>;

    fn target(&self) -> String {
        "duplex".to_string()
    }

    async fn open_session(&self) -> ensemble::Result<Self::Session> {
        let (client_side, controller_side) = duplex(4096);
        tokio::spawn(self.clone().serve_commands(controller_side));
        Ok(EnsembleClient::new(client_side))
    }

    async fn open_scope(&self) -> ensemble::Result<Self::Scope> {
        let (reader_side, controller_side) = duplex(4096);
        tokio::spawn(Self::serve_scope(controller_side));
        Ok(ScopeDataReader::new(reader_side))
    }
}

pub fn connection_for<C: Connector>(connector: C, config: &Config) -> ConnectionManager<C> {
    ConnectionManager::new(
        connector,
        config.connection.clone(),
        config.retry.connect.clone(),
        config.retry.healthcheck.clone(),
        &Span::none(),
    )
}

pub fn driver_for<C: Connector>(connector: C, config: &Config) -> CalibrationDriver<C> {
    CalibrationDriver::new(
        connection_for(connector, config),
        config.procedure.clone(),
        config.retry.clone(),
        &Span::none(),
    )
}

pub fn connection(sim: &Sim, config: &Config) -> ConnectionManager<SimConnector> {
    connection_for(sim.connector(), config)
}

pub fn driver(sim: &Sim, config: &Config) -> CalibrationDriver<SimConnector> {
    driver_for(sim.connector(), config)
}
