#![allow(async_fn_in_trait)]

use std::time::Duration;

use ensemble::{
    AxisFault, AxisStatus, EnsembleClient, EnsembleError, ScopeDataReader, TraceDataset,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

/// Command session used by the calibration procedure.
pub trait MotionController {
    async fn program_status(&mut self) -> ensemble::Result<u32>;
    async fn axis_status(&mut self, axis: &str) -> ensemble::Result<AxisStatus>;
    async fn axis_fault(&mut self, axis: &str) -> ensemble::Result<AxisFault>;

    async fn disable(&mut self, axis: &str) -> ensemble::Result<()>;
    async fn set_parameter(
        &mut self,
        axis: &str,
        parameter: &str,
        value: f64,
    ) -> ensemble::Result<()>;
    async fn commit_parameters(&mut self) -> ensemble::Result<()>;
    async fn reset(&mut self) -> ensemble::Result<()>;

    async fn move_and_wait(
        &mut self,
        axis: &str,
        position: f64,
        speed: f64,
        poll_period: Duration,
    ) -> ensemble::Result<()>;
    async fn wait_axis_status(
        &mut self,
        axis: &str,
        flags: AxisStatus,
        poll_period: Duration,
        timeout: Duration,
        check_enabled: bool,
    ) -> ensemble::Result<bool>;

    async fn scope_start(&mut self, data_points: u32, period_ms: u32) -> ensemble::Result<()>;
    async fn scope_stop(&mut self) -> ensemble::Result<()>;
    async fn scope_wait(&mut self, poll_period: Duration) -> ensemble::Result<()>;
}

pub trait ScopeReader {
    async fn read_data(&mut self, points: u32) -> ensemble::Result<TraceDataset>;
}

/// Opens fresh channels to one controller.
pub trait Connector {
    type Session: MotionController;
    type Scope: ScopeReader;

    /// Human readable address, for logs.
    fn target(&self) -> String;

    async fn open_session(&self) -> ensemble::Result<Self::Session>;
    async fn open_scope(&self) -> ensemble::Result<Self::Scope>;
}

impl<S: AsyncRead + AsyncWrite + Unpin> MotionController for EnsembleClient<S> {
    async fn program_status(&mut self) -> ensemble::Result<u32> {
        EnsembleClient::program_status(self).await
    }

    async fn axis_status(&mut self, axis: &str) -> ensemble::Result<AxisStatus> {
        EnsembleClient::axis_status(self, axis).await
    }

    async fn axis_fault(&mut self, axis: &str) -> ensemble::Result<AxisFault> {
        EnsembleClient::axis_fault(self, axis).await
    }

    async fn disable(&mut self, axis: &str) -> ensemble::Result<()> {
        EnsembleClient::disable(self, axis).await
    }

    async fn set_parameter(
        &mut self,
        axis: &str,
        parameter: &str,
        value: f64,
    ) -> ensemble::Result<()> {
        EnsembleClient::set_parameter(self, axis, parameter, value).await
    }

    async fn commit_parameters(&mut self) -> ensemble::Result<()> {
        EnsembleClient::commit_parameters(self).await
    }

    async fn reset(&mut self) -> ensemble::Result<()> {
        EnsembleClient::reset(self).await
    }

    async fn move_and_wait(
        &mut self,
        axis: &str,
        position: f64,
        speed: f64,
        poll_period: Duration,
    ) -> ensemble::Result<()> {
        EnsembleClient::move_and_wait(self, axis, position, speed, poll_period).await
    }

    async fn wait_axis_status(
        &mut self,
        axis: &str,
        flags: AxisStatus,
        poll_period: Duration,
        timeout: Duration,
        check_enabled: bool,
    ) -> ensemble::Result<bool> {
        EnsembleClient::wait_axis_status(self, axis, flags, poll_period, timeout, check_enabled)
            .await
    }

    async fn scope_start(&mut self, data_points: u32, period_ms: u32) -> ensemble::Result<()> {
        EnsembleClient::scope_start(self, data_points, period_ms).await
    }

    async fn scope_stop(&mut self) -> ensemble::Result<()> {
        EnsembleClient::scope_stop(self).await
    }

    async fn scope_wait(&mut self, poll_period: Duration) -> ensemble::Result<()> {
        EnsembleClient::scope_wait(self, poll_period).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ScopeReader for ScopeDataReader<S> {
    async fn read_data(&mut self, points: u32) -> ensemble::Result<TraceDataset> {
        ScopeDataReader::read_data(self, points).await
    }
}

/// TCP connector for a real Ensemble controller.
#[derive(Debug, Clone)]
pub struct EnsembleConnector {
    pub host: String,
    pub comm_port: u16,
    pub scope_port: u16,
    pub response_timeout: Duration,
}

impl Connector for EnsembleConnector {
    type Session = EnsembleClient<TcpStream>;
    type Scope = ScopeDataReader<TcpStream>;

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.comm_port)
    }

    async fn open_session(&self) -> ensemble::Result<Self::Session> {
        let client = EnsembleClient::connect((self.host.as_str(), self.comm_port))
            .await
            .map_err(EnsembleError::from)?;

        Ok(client.with_response_timeout(self.response_timeout))
    }

    async fn open_scope(&self) -> ensemble::Result<Self::Scope> {
        let reader = ScopeDataReader::connect((self.host.as_str(), self.scope_port))
            .await
            .map_err(EnsembleError::from)?;

        Ok(reader.with_line_timeout(self.response_timeout))
    }
}
