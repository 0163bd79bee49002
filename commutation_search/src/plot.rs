use std::{
    fs,
    ops::Range,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use plotters::prelude::*;
use tracing::info;

use crate::{
    analysis::{Analysis, OffsetTrace},
    config::PlotConfig,
};

const TITLE: &str = "Commutation angle search";
const OVERLAY_FILE: &str = "commutation_overlay.png";
const SUMMARY_FILE: &str = "commutation_summary.png";

#[derive(Debug, Clone)]
pub struct PlotPaths {
    pub overlay: PathBuf,
    pub summary: PathBuf,
}

/// Value range with a small margin on both ends, or `fallback` when there
/// is nothing finite to show.
fn padded_range(values: impl Iterator<Item = f64>, fallback: Range<f64>) -> Range<f64> {
    let (min, max) = values
        .filter(|value| value.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), value| {
            (min.min(value), max.max(value))
        });

    if !min.is_finite() {
        return fallback;
    }

    let pad = ((max - min) * 0.05).max(1e-3);
    (min - pad)..(max + pad)
}

fn legend_label(trace: &OffsetTrace) -> String {
    match trace.average_current {
        Some(average) => format!("{} deg; {:.3}A", trace.offset, average),
        None => format!("{} deg; n/a", trace.offset),
    }
}

/// Draws the trace overlay and the average-current summary into
/// `config.output_dir`.
pub fn render(analysis: &Analysis, config: &PlotConfig) -> anyhow::Result<PlotPaths> {
    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create plot directory {}",
            config.output_dir.display()
        )
    })?;

    let paths = PlotPaths {
        overlay: config.output_dir.join(OVERLAY_FILE),
        summary: config.output_dir.join(SUMMARY_FILE),
    };
    let size = (config.width, config.height);

    render_overlay(analysis, &paths.overlay, size).context("failed to draw overlay plot")?;
    info!("Overlay plot saved to {}", paths.overlay.display());

    render_summary(analysis, &paths.summary, size).context("failed to draw summary plot")?;
    info!("Summary plot saved to {}", paths.summary.display());

    Ok(paths)
}

fn render_overlay(analysis: &Analysis, path: &Path, size: (u32, u32)) -> anyhow::Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    let x_range = padded_range(
        analysis.plotted().flat_map(|trace| trace.positions.iter().copied()),
        0.0..45.0,
    );
    let y_range = padded_range(
        analysis.plotted().flat_map(|trace| trace.currents.iter().copied()),
        0.0..1.0,
    );

    let mut chart = ChartBuilder::on(&root)
        .caption(TITLE, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc("Position [mm]")
        .y_desc("Current [A]")
        .y_label_formatter(&|y| format!("{y:.2}"))
        .axis_desc_style(("sans-serif", 18))
        .draw()?;

    for (index, trace) in analysis.plotted().enumerate() {
        let points: Vec<(f64, f64)> = trace
            .positions
            .iter()
            .copied()
            .zip(trace.currents.iter().copied())
            .collect();

        let alpha = analysis.alpha(trace);
        let style = if analysis.is_best(trace) {
            RED.mix(alpha).stroke_width(2)
        } else {
            Palette99::pick(index).mix(alpha).stroke_width(1)
        };

        chart
            .draw_series(LineSeries::new(points, style))?
            .label(legend_label(trace))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn render_summary(analysis: &Analysis, path: &Path, size: (u32, u32)) -> anyhow::Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    let averages: Vec<(f64, f64)> = analysis
        .traces
        .iter()
        .filter_map(|trace| {
            trace
                .average_current
                .map(|average| (f64::from(trace.offset), average))
        })
        .collect();

    let x_range = padded_range(averages.iter().map(|(offset, _)| *offset), 0.0..360.0);
    let y_range = padded_range(averages.iter().map(|(_, average)| *average), 0.0..1.0);

    let mut chart = ChartBuilder::on(&root)
        .caption(TITLE, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc("Commutation offset [deg]")
        .y_desc("Average current over scan [A]")
        .x_label_formatter(&|x| format!("{x:.0}"))
        .y_label_formatter(&|y| format!("{y:.3}"))
        .axis_desc_style(("sans-serif", 18))
        .draw()?;

    chart.draw_series(LineSeries::new(averages.iter().copied(), &BLUE))?;

    // markers only on offsets drawn on the overlay
    chart.draw_series(analysis.plotted().filter_map(|trace| {
        let style = if analysis.is_best(trace) { &RED } else { &BLACK };
        trace
            .average_current
            .map(|average| Cross::new((f64::from(trace.offset), average), 5, style.stroke_width(2)))
    }))?;

    root.present()?;
    Ok(())
}
