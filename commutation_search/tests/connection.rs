mod common;

use std::time::Duration;

use commutation_search::{
    config::Config,
    connection::ConnectError,
    controller::MotionController,
};
use common::{Sim, connection};
use tokio::time::Instant;
use utilities::retry::RetryPolicy;

#[tokio::test(start_paused = true)]
async fn refused_connections_are_retried_until_accepted() {
    for refusals in [0, 1, 5, 20] {
        let sim = Sim::new();
        sim.state().refusals = refusals;

        let manager = connection(&sim, &Config::default());
        let mut session = manager.connect().await.unwrap();

        assert_eq!(sim.state().connect_attempts, refusals + 1);
        assert_eq!(session.program_status().await.unwrap(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn bounded_connect_policy_gives_up() {
    let sim = Sim::new();
    sim.state().refusals = 10;

    let mut config = Config::default();
    config.retry.connect = RetryPolicy::bounded(3, Duration::from_millis(100));

    let err = connection(&sim, &config).connect().await.unwrap_err();

    assert!(matches!(
        err,
        ConnectError::Exhausted {
            policy: "connect",
            attempts: 3
        }
    ));
    assert_eq!(sim.state().connect_attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn hung_healthcheck_reconnects_from_scratch() {
    let sim = Sim::new();
    sim.state().hung_healthchecks = 2;

    let config = Config::default();
    let start = Instant::now();
    connection(&sim, &config).connect().await.unwrap();

    let state = sim.state();
    assert_eq!(state.connect_attempts, 3);
    assert_eq!(
        state.commands.iter().filter(|c| *c == "TASKSTATE(1)").count(),
        3
    );
    // two liveness timeouts plus two healthcheck delays
    assert!(start.elapsed() >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn reset_healthcheck_reconnects_from_scratch() {
    let sim = Sim::new();
    sim.state().reset_healthchecks = 2;

    let start = Instant::now();
    connection(&sim, &Config::default()).connect().await.unwrap();

    let state = sim.state();
    assert_eq!(state.connect_attempts, 3);
    assert_eq!(state.count("TASKSTATE(1)"), 3);
    // no liveness timeout, only the two healthcheck delays
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn bounded_healthcheck_policy_gives_up() {
    let sim = Sim::new();
    sim.state().hung_healthchecks = 5;

    let mut config = Config::default();
    config.retry.healthcheck = RetryPolicy::bounded(2, Duration::from_secs(1));

    let err = connection(&sim, &config).connect().await.unwrap_err();

    assert!(matches!(
        err,
        ConnectError::Exhausted {
            policy: "healthcheck",
            attempts: 2
        }
    ));
}
