use std::io;

use ensemble::EnsembleError;
use tokio::time::timeout;
use tracing::{Span, debug, info, info_span, instrument, warn};
use utilities::retry::RetryPolicy;

use crate::{
    config::ConnectionConfig,
    controller::{Connector, MotionController},
};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("{policy} retry policy exhausted after {attempts} attempts")]
    Exhausted { policy: &'static str, attempts: u32 },

    #[error("transport error: {0}")]
    Transport(#[source] EnsembleError),

    #[error("liveness check failed: {0}")]
    Protocol(#[source] EnsembleError),
}

fn is_retryable_connect_error(error: &EnsembleError) -> bool {
    match error {
        EnsembleError::Timeout(_) => true,
        EnsembleError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut
        ),
        _ => false,
    }
}

/// Produces live command sessions, reconnecting as long as the retry
/// policies allow.
pub struct ConnectionManager<C> {
    connector: C,
    config: ConnectionConfig,
    connect_policy: RetryPolicy,
    healthcheck_policy: RetryPolicy,
    span: Span,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        config: ConnectionConfig,
        connect_policy: RetryPolicy,
        healthcheck_policy: RetryPolicy,
        parent: &Span,
    ) -> Self {
        let span = info_span!(parent: parent, "connection", target = %connector.target());

        Self {
            connector,
            config,
            connect_policy,
            healthcheck_policy,
            span,
        }
    }

    /// Connects and checks that the controller answers a status query.
    /// A hung or reset liveness check starts over from a fresh socket.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn connect(&self) -> Result<C::Session, ConnectError> {
        let mut health = self.healthcheck_policy.attempts();
        let healthcheck_timeout = self.config.healthcheck_timeout();

        loop {
            let attempt = health.begin();
            let mut session = self.open_transport().await?;

            match timeout(healthcheck_timeout, session.program_status()).await {
                Ok(Ok(state)) => {
                    info!(task_state = state, "Connected to {}", self.connector.target());
                    return Ok(session);
                }
                Ok(Err(e)) if e.is_connection_lost() => {
                    warn!(attempt, "Connection reset during liveness check: {}", e);
                }
                Ok(Err(EnsembleError::Timeout(_))) | Err(_) => {
                    warn!(
                        attempt,
                        "Liveness check timed out after {:?}", healthcheck_timeout
                    );
                }
                Ok(Err(e)) => return Err(ConnectError::Protocol(e)),
            }

            drop(session);

            if !health.wait().await {
                return Err(ConnectError::Exhausted {
                    policy: "healthcheck",
                    attempts: health.made(),
                });
            }
        }
    }

    async fn open_transport(&self) -> Result<C::Session, ConnectError> {
        let mut attempts = self.connect_policy.attempts();
        let connect_timeout = self.config.connect_timeout();

        loop {
            let attempt = attempts.begin();
            debug!(attempt, "Connecting to {}", self.connector.target());

            let result = timeout(connect_timeout, self.connector.open_session())
                .await
                .unwrap_or(Err(EnsembleError::Timeout(connect_timeout)));

            match result {
                Ok(session) => return Ok(session),
                Err(e) if is_retryable_connect_error(&e) => {
                    debug!(attempt, "Connection attempt failed: {}", e);
                }
                Err(e) => return Err(ConnectError::Transport(e)),
            }

            if !attempts.wait().await {
                return Err(ConnectError::Exhausted {
                    policy: "connect",
                    attempts: attempts.made(),
                });
            }
        }
    }

    /// Opens the scope data channel, bounded by the connect timeout.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn open_scope(&self) -> Result<C::Scope, EnsembleError> {
        let connect_timeout = self.config.connect_timeout();

        timeout(connect_timeout, self.connector.open_scope())
            .await
            .unwrap_or(Err(EnsembleError::Timeout(connect_timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_refusal_and_timeouts_are_retried() {
        let refused = EnsembleError::Io(io::ErrorKind::ConnectionRefused.into());
        let timed_out = EnsembleError::Timeout(std::time::Duration::from_secs(2));
        let unreachable = EnsembleError::Io(io::ErrorKind::PermissionDenied.into());

        assert!(is_retryable_connect_error(&refused));
        assert!(is_retryable_connect_error(&timed_out));
        assert!(!is_retryable_connect_error(&unreachable));
    }
}
