use anyhow::{Context as _, bail};
use ensemble::{AxisStatus, EnsembleError, TraceDataset};
use tokio::time::{sleep, timeout};
use tracing::{Span, debug, info, info_span, instrument, warn};

use crate::{
    config::{NotInPositionAction, ProcedureConfig, RetryConfig},
    connection::ConnectionManager,
    controller::{Connector, MotionController, ScopeReader},
};

pub const COMMUTATION_OFFSET: &str = "CommutationOffset";

/// Runs the per-offset calibration procedure against one controller.
pub struct CalibrationDriver<C> {
    connection: ConnectionManager<C>,
    procedure: ProcedureConfig,
    retry: RetryConfig,
    span: Span,
}

impl<C: Connector> CalibrationDriver<C> {
    pub fn new(
        connection: ConnectionManager<C>,
        procedure: ProcedureConfig,
        retry: RetryConfig,
        parent: &Span,
    ) -> Self {
        let span = info_span!(parent: parent, "driver", axis = %procedure.axis);

        Self {
            connection,
            procedure,
            retry,
            span,
        }
    }

    /// Captures a trace for `offset`, re-running the whole procedure after
    /// any failure until the `offset_attempt` policy gives up.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn acquire(&self, offset: i32) -> anyhow::Result<TraceDataset> {
        let mut attempts = self.retry.offset_attempt.attempts();

        loop {
            let attempt = attempts.begin();

            match self.run_procedure(offset).await {
                Ok(dataset) => return Ok(dataset),
                Err(e) => {
                    warn!(attempt, "Check of offset {} failed: {:#}", offset, e);

                    if !attempts.wait().await {
                        return Err(e.context(format!(
                            "offset {offset} failed after {} attempts",
                            attempts.made()
                        )));
                    }
                }
            }
        }
    }

    async fn run_procedure(&self, offset: i32) -> anyhow::Result<TraceDataset> {
        let axis = self.procedure.axis.as_str();
        let mut session = self.connection.connect().await?;

        let status = session.axis_status(axis).await?;
        if status.contains(AxisStatus::IN_POSITION) {
            debug!("Axis in position, parking at reference before the parameter change");
            self.move_to(&mut session, self.procedure.reference_position)
                .await?;
        }

        session.disable(axis).await?;
        session
            .set_parameter(axis, COMMUTATION_OFFSET, f64::from(offset))
            .await?;
        debug!("{} set to {}", COMMUTATION_OFFSET, offset);

        let mut session = self.commit_and_reset(session).await?;

        self.wait_fault_clear(&mut session).await?;
        self.wait_in_position(&mut session).await?;

        sleep(self.procedure.pre_motion_delay()).await;
        self.capture(&mut session).await?;

        self.read_trace().await
    }

    async fn move_to(&self, session: &mut C::Session, position: f64) -> ensemble::Result<()> {
        session
            .move_and_wait(
                &self.procedure.axis,
                position,
                self.procedure.speed,
                self.procedure.move_poll(),
            )
            .await
    }

    /// Commits the parameters, resets the controller and returns a fresh
    /// session. The reset drops the old connection.
    async fn commit_and_reset(&self, mut session: C::Session) -> anyhow::Result<C::Session> {
        match session.commit_parameters().await {
            Ok(()) => debug!("Parameters committed"),
            Err(e) if e.is_timeout_response() => {
                warn!("Timeout response while committing parameters; continuing")
            }
            Err(e) => return Err(e).context("failed to commit parameters"),
        }

        sleep(self.procedure.commit_delay()).await;

        match session.reset().await {
            Ok(()) => debug!("Controller reset"),
            Err(e)
                if e.is_timeout_response()
                    || e.is_connection_lost()
                    || matches!(e, EnsembleError::Timeout(_)) =>
            {
                debug!("Controller dropped the session on reset: {}", e)
            }
            Err(e) => return Err(e).context("failed to reset controller"),
        }
        drop(session);

        sleep(self.procedure.reset_delay()).await;
        let session = self.connection.connect().await?;
        sleep(self.procedure.reconnect_settle()).await;

        Ok(session)
    }

    async fn wait_fault_clear(&self, session: &mut C::Session) -> anyhow::Result<()> {
        let axis = self.procedure.axis.as_str();
        let mut attempts = self.retry.fault_clear.attempts();

        loop {
            attempts.begin();

            let fault = session.axis_fault(axis).await?;
            if fault.is_empty() {
                return Ok(());
            }

            debug!("Axis in fault condition: {:?}", fault);

            if !attempts.wait().await {
                bail!(
                    "axis fault {:?} did not clear after {} polls",
                    fault,
                    attempts.made()
                );
            }
        }
    }

    async fn wait_in_position(&self, session: &mut C::Session) -> anyhow::Result<()> {
        // bounded inside the poll loop; the session is reused for the capture
        let in_position = session
            .wait_axis_status(
                &self.procedure.axis,
                AxisStatus::IN_POSITION,
                self.procedure.in_position_poll(),
                self.procedure.in_position_timeout(),
                true,
            )
            .await?;

        if in_position {
            return Ok(());
        }

        match self.procedure.not_in_position {
            NotInPositionAction::Proceed => {
                warn!("Axis not in position after reset; proceeding");
                Ok(())
            }
            NotInPositionAction::Fail => bail!("axis not in position after reset"),
        }
    }

    /// Runs the scan profile with the scope armed.
    async fn capture(&self, session: &mut C::Session) -> anyhow::Result<()> {
        let procedure = &self.procedure;

        self.move_to(session, procedure.reference_position).await?;
        session
            .scope_start(procedure.scope_points, procedure.scope_period_ms)
            .await?;
        self.move_to(session, procedure.far_position).await?;
        self.move_to(session, procedure.reference_position).await?;

        sleep(procedure.scope_settle()).await;
        session.scope_stop().await?;
        session.scope_wait(procedure.scope_poll()).await?;

        Ok(())
    }

    async fn read_trace(&self) -> anyhow::Result<TraceDataset> {
        let points = self.procedure.scope_points;
        let read_timeout = self.procedure.scope_read_timeout();
        let mut attempts = self.retry.scope_read.attempts();

        loop {
            let attempt = attempts.begin();

            let result = match timeout(read_timeout, self.read_once(points)).await {
                Ok(result) => result,
                Err(_) => Err(EnsembleError::Timeout(read_timeout)),
            };

            match result {
                Ok(dataset) => {
                    info!(rows = dataset.len(), "Scope trace read");
                    return Ok(dataset);
                }
                Err(e) => {
                    warn!(attempt, "Scope read failed: {}", e);

                    if !attempts.wait().await {
                        return Err(e).context(format!(
                            "scope read failed after {} attempts",
                            attempts.made()
                        ));
                    }
                }
            }
        }
    }

    async fn read_once(&self, points: u32) -> ensemble::Result<TraceDataset> {
        let mut scope = self.connection.open_scope().await?;
        scope.read_data(points).await
    }
}
