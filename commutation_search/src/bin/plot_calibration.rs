//! Plots the traces saved by `calibrate` and reports the offset with the
//! lowest average current.
//!
//! Usage:
//! ```text
//! plot_calibration results-300-330.txt results-326-360.txt --no-skip
//! ```

use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use commutation_search::{
    analysis::analyze,
    config::{
        ConfigOptions, create_default_config, init_config_with_options, should_create_config,
    },
    logging, plot,
    results::load_all,
};
use tracing::{info, info_span};

#[derive(Parser, Debug)]
#[command(
    name = "plot_calibration",
    about = "Plot commutation offset calibration results"
)]
struct Args {
    /// List of dataset filenames (e.g., results-300-330.txt)
    #[arg(required = true)]
    filenames: Vec<PathBuf>,

    /// Include results which do not allow for the full travel range
    #[arg(long)]
    no_skip: bool,

    /// Directory the plots are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    logging::init()?;
    let args = Args::parse();

    if should_create_config() {
        create_default_config(args.config.as_ref())?;
    }

    let options = match &args.config {
        Some(path) => ConfigOptions::with_path(path),
        None => ConfigOptions::default(),
    };
    let (_config_manager, mut config) = init_config_with_options(options)?;

    if let Some(output_dir) = args.output_dir {
        config.plot.output_dir = output_dir;
    }

    let span = info_span!("plot_calibration", files = args.filenames.len());
    let _entered = span.enter();

    let results = load_all(&args.filenames)?;
    if results.is_empty() {
        bail!("no traces found in the given result files");
    }
    info!("Loaded {} offsets", results.len());

    let analysis = analyze(&results, &config.analysis, !args.no_skip);
    let paths = plot::render(&analysis, &config.plot)?;

    if let Some(best) = analysis.best {
        info!(
            overlay = %paths.overlay.display(),
            summary = %paths.summary.display(),
            "Minimum average current {:.3} A at {} deg",
            best.average_current,
            best.offset
        );
    }

    Ok(())
}
