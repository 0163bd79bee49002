use tracing::{info, warn};

use crate::{config::AnalysisConfig, results::ResultSet};

/// Offsets below `wrap_threshold` are shown one full turn up so that a
/// sweep across 360 degrees stays contiguous.
pub fn normalize_offset(offset: i32, wrap_threshold: i32) -> i32 {
    if offset < wrap_threshold {
        offset + 360
    } else {
        offset
    }
}

/// One trace reduced to what the plots need.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetTrace {
    /// Offset after wrap-around normalization.
    pub offset: i32,
    /// Offset as stored in the result file.
    pub source_offset: i32,
    /// Feedback position [mm] above the minimum position.
    pub positions: Vec<f64>,
    /// Feedback current [A] for each entry of `positions`.
    pub currents: Vec<f64>,
    pub max_position: Option<f64>,
    /// Mean feedback current inside the position window, if any sample
    /// falls inside it.
    pub average_current: Option<f64>,
    pub full_travel: bool,
    /// Whether the trace is drawn on the overlay.
    pub plotted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestOffset {
    pub offset: i32,
    pub average_current: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    /// Ordered by normalized offset.
    pub traces: Vec<OffsetTrace>,
    pub best: Option<BestOffset>,
}

impl Analysis {
    pub fn plotted(&self) -> impl Iterator<Item = &OffsetTrace> {
        self.traces.iter().filter(|trace| trace.plotted)
    }

    pub fn is_best(&self, trace: &OffsetTrace) -> bool {
        self.best.is_some_and(|best| best.offset == trace.offset)
    }

    /// Line opacity: 1 for the best offset, fading quickly as the average
    /// current grows.
    pub fn alpha(&self, trace: &OffsetTrace) -> f64 {
        match (self.best, trace.average_current) {
            (Some(best), Some(average)) if average > 0.0 => {
                let relative = 1.0 - (average - best.average_current) / average;
                relative.powi(3).clamp(0.0, 1.0)
            }
            _ => 1.0,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn reduce(
    source_offset: i32,
    dataset: &ensemble::TraceDataset,
    config: &AnalysisConfig,
    skip: bool,
) -> OffsetTrace {
    let offset = normalize_offset(source_offset, config.wrap_threshold);

    let (positions, currents): (Vec<f64>, Vec<f64>) = dataset
        .position_feedback
        .iter()
        .zip(&dataset.current_feedback)
        .map(|(position, current)| (position / config.position_scale, *current))
        .filter(|(position, _)| *position > config.min_position)
        .unzip();

    let max_position = positions.iter().copied().reduce(f64::max);

    let average_current = mean(
        positions
            .iter()
            .zip(&currents)
            .filter(|(position, _)| {
                **position >= config.window_low && **position <= config.window_high
            })
            .map(|(_, current)| *current),
    );

    let full_travel = max_position.is_some_and(|max| max >= config.full_travel);
    let plotted = full_travel || !skip;

    let max_label = max_position.map_or_else(|| "none".to_string(), |max| format!("{max:.3}"));
    if plotted {
        info!("Including offset {} (max pos = {})", offset, max_label);
    } else {
        info!("Discarding offset {} (max pos = {})", offset, max_label);
    }
    if average_current.is_none() {
        warn!(
            "Offset {} has no samples in the {}..{} mm window",
            offset, config.window_low, config.window_high
        );
    }

    OffsetTrace {
        offset,
        source_offset,
        positions,
        currents,
        max_position,
        average_current,
        full_travel,
        plotted,
    }
}

/// Reduces every trace and finds the offset with the lowest mean current.
///
/// With `skip` set, traces that never reach full travel are left off the
/// overlay; their averages still count for the summary and the minimum.
pub fn analyze(results: &ResultSet, config: &AnalysisConfig, skip: bool) -> Analysis {
    let mut traces: Vec<OffsetTrace> = results
        .iter()
        .map(|(offset, dataset)| reduce(offset, dataset, config, skip))
        .collect();
    traces.sort_by_key(|trace| trace.offset);

    let best = traces
        .iter()
        .filter_map(|trace| {
            trace.average_current.map(|average_current| BestOffset {
                offset: trace.offset,
                average_current,
            })
        })
        .min_by(|a, b| a.average_current.total_cmp(&b.average_current));

    match best {
        Some(best) => info!(
            "Best offset {} deg with average current {:.3} A",
            best.offset, best.average_current
        ),
        None => warn!("No offset has samples in the averaging window"),
    }

    Analysis { traces, best }
}
