//! Sweeps the commutation offset of one axis and records a scope trace per
//! offset into `results-<start>-<stop>.txt`.
//!
//! Usage:
//! ```text
//! calibrate 10.0.0.12 326 360 2 --axis @0
//! ```

use std::path::PathBuf;

use clap::Parser;
use commutation_search::{
    config::{
        ConfigOptions, create_default_config, init_config_with_options, should_create_config,
    },
    connection::ConnectionManager,
    controller::EnsembleConnector,
    logging,
    procedure::CalibrationDriver,
    results::ResultStore,
    sweep::{ConsoleOperator, CtrlC, Sweep, SweepRange},
};
use tracing::{info, info_span};

#[derive(Parser, Debug)]
#[command(
    name = "calibrate",
    about = "Calibrate the commutation offset of an Ensemble axis",
    allow_negative_numbers = true
)]
struct Args {
    /// Controller hostname/IP
    host: String,

    /// Starting angle [deg]
    start: i32,

    /// The sweep stops before this angle [deg]
    stop: i32,

    /// Increment between angles [deg]
    step: i32,

    /// Axis name (X, Y, @0, @1, etc.); default @0
    #[arg(long)]
    axis: Option<String>,

    /// Comm port (usually socket 2); default 8000
    #[arg(long)]
    comm: Option<u16>,

    /// Scope port (usually socket 3); default 8001
    #[arg(long)]
    scope: Option<u16>,

    /// Directory the result file is written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;
    let args = Args::parse();

    if should_create_config() {
        create_default_config(args.config.as_ref())?;
    }

    let options = match &args.config {
        Some(path) => ConfigOptions::with_path(path),
        None => ConfigOptions::default(),
    };
    let (_config_manager, mut config) = init_config_with_options(options).map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;

    if let Some(axis) = args.axis {
        config.procedure.axis = axis;
    }
    if let Some(comm) = args.comm {
        config.connection.comm_port = comm;
    }
    if let Some(scope) = args.scope {
        config.connection.scope_port = scope;
    }
    config.validate()?;

    let range = SweepRange::new(args.start, args.stop, args.step)?;

    let root = info_span!("calibrate", host = %args.host, axis = %config.procedure.axis);

    let connector = EnsembleConnector {
        host: args.host.clone(),
        comm_port: config.connection.comm_port,
        scope_port: config.connection.scope_port,
        response_timeout: config.connection.response_timeout(),
    };
    let connection = ConnectionManager::new(
        connector,
        config.connection.clone(),
        config.retry.connect.clone(),
        config.retry.healthcheck.clone(),
        &root,
    );
    let driver = CalibrationDriver::new(
        connection,
        config.procedure.clone(),
        config.retry.clone(),
        &root,
    );
    let store = ResultStore::for_range(&args.output_dir, range.low(), range.high());

    let mut sweep = Sweep::new(driver, store, CtrlC, ConsoleOperator, &root);
    let outcome = sweep.run(&range).await?;

    info!(
        completed = outcome.completed.len(),
        stored = outcome.results.len(),
        aborted = outcome.aborted,
        "Done"
    );

    Ok(())
}
