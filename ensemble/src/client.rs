use std::{fmt::Display, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite, BufStream},
    net::{TcpStream, ToSocketAddrs},
    time::{Instant, sleep, timeout},
};
use tracing::trace;

use crate::{
    error::{EnsembleError, Result},
    protocol::{parse_response, read_line, write_line},
    status::{AxisFault, AxisStatus, parse_word},
};

/// Default command socket on Ensemble controllers.
pub const DEFAULT_COMMAND_PORT: u16 = 8000;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Command/response session on the controller's ASCII command socket.
pub struct EnsembleClient<S> {
    stream: BufStream<S>,
    response_timeout: Duration,
}

impl EnsembleClient<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> EnsembleClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    /// Sends one command and returns the payload of a successful reply.
    pub async fn write_read(&mut self, command: &str) -> Result<String> {
        trace!(command, "send");
        write_line(&mut self.stream, command).await?;

        let line = timeout(self.response_timeout, read_line(&mut self.stream))
            .await
            .map_err(|_| EnsembleError::Timeout(self.response_timeout))??;
        trace!(command, response = %line, "recv");

        parse_response(command, &line)
    }

    pub async fn program_status(&mut self) -> Result<u32> {
        let payload = self.write_read("TASKSTATE(1)").await?;
        parse_word("task state", &payload)
    }

    pub async fn axis_status(&mut self, axis: &str) -> Result<AxisStatus> {
        let payload = self.write_read(&format!("AXISSTATUS({axis})")).await?;
        AxisStatus::parse(&payload)
    }

    pub async fn axis_fault(&mut self, axis: &str) -> Result<AxisFault> {
        let payload = self.write_read(&format!("AXISFAULT({axis})")).await?;
        AxisFault::parse(&payload)
    }

    pub async fn disable(&mut self, axis: &str) -> Result<()> {
        self.write_read(&format!("DISABLE {axis}")).await.map(|_| ())
    }

    pub async fn set_parameter(
        &mut self,
        axis: &str,
        parameter: &str,
        value: impl Display,
    ) -> Result<()> {
        self.write_read(&format!("SETPARM {axis}, {parameter}, {value}"))
            .await
            .map(|_| ())
    }

    /// Stores the current parameters to flash. Slow; the controller may
    /// answer with its timeout character even though the commit went through.
    pub async fn commit_parameters(&mut self) -> Result<()> {
        self.write_read("COMMITPARAMETERS").await.map(|_| ())
    }

    /// Resets the controller. The connection is dropped by the controller
    /// shortly after, so callers must reconnect.
    pub async fn reset(&mut self) -> Result<()> {
        self.write_read("RESET").await.map(|_| ())
    }

    pub async fn move_absolute(&mut self, axis: &str, position: f64, speed: f64) -> Result<()> {
        self.write_read(&format!("MOVEABS {axis} {position} {axis}F {speed}"))
            .await
            .map(|_| ())
    }

    /// Polls the axis status until all `flags` are set.
    ///
    /// Returns `false` once `timeout` has passed, or, with `check_enabled`,
    /// as soon as the axis reports itself disabled. The deadline is only
    /// checked between polls so that no query is left without its reply.
    pub async fn wait_axis_status(
        &mut self,
        axis: &str,
        flags: AxisStatus,
        poll_period: Duration,
        timeout: Duration,
        check_enabled: bool,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            let status = self.axis_status(axis).await?;

            if status.contains(flags) {
                return Ok(true);
            }
            if check_enabled && !status.contains(AxisStatus::ENABLED) {
                return Ok(false);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }

            sleep(poll_period).await;
        }
    }

    pub async fn move_and_wait(
        &mut self,
        axis: &str,
        position: f64,
        speed: f64,
        poll_period: Duration,
    ) -> Result<()> {
        self.move_absolute(axis, position, speed).await?;

        loop {
            let status = self.axis_status(axis).await?;

            if status.contains(AxisStatus::IN_POSITION) && !status.contains(AxisStatus::MOVE_ACTIVE)
            {
                return Ok(());
            }
            if !status.contains(AxisStatus::ENABLED) {
                return Err(EnsembleError::Fault {
                    command: format!("MOVEABS {axis} {position}"),
                });
            }

            sleep(poll_period).await;
        }
    }

    /// Arms the scope for `data_points` samples every `period_ms`.
    pub async fn scope_start(&mut self, data_points: u32, period_ms: u32) -> Result<()> {
        self.write_read(&format!("SCOPEBUFFER {data_points}")).await?;
        self.write_read(&format!("SCOPETRIGPERIOD {period_ms}"))
            .await?;
        self.write_read("SCOPETRIG").await.map(|_| ())
    }

    pub async fn scope_stop(&mut self) -> Result<()> {
        self.write_read("SCOPETRIG STOP").await.map(|_| ())
    }

    /// Non-zero while the scope is still acquiring.
    pub async fn scope_status(&mut self) -> Result<u32> {
        let payload = self.write_read("SCOPESTATUS(0)").await?;
        parse_word("scope status", &payload)
    }

    pub async fn scope_wait(&mut self, poll_period: Duration) -> Result<()> {
        while self.scope_status().await? != 0 {
            sleep(poll_period).await;
        }

        Ok(())
    }
}
