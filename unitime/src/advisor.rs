use serde::{Deserialize, Serialize};
use tracing::info;

use crate::interpolate::{InterpolatedSeries, InterpolationMethod, SourceSeries};
use crate::pairing::TimeParamPair;
use crate::settings::TimelineSettings;
use crate::table::Column;
use crate::timeline::UniversalTimeline;
use crate::AlignError;

/// How well one method covers the timeline for one pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodQuality {
    pub method: InterpolationMethod,
    pub total_target_points: usize,
    pub valid_points: usize,
    pub coverage_ratio: f64,
    pub source_points: usize,
    pub source_span_seconds: f64,
    pub target_span_seconds: f64,
    /// Timeline points per source point.
    pub interpolation_ratio: f64,
    pub score: f64,
}

fn score(method: InterpolationMethod, coverage_ratio: f64, source_points: usize) -> f64 {
    let bonus = match method {
        InterpolationMethod::Linear => 15.0,
        InterpolationMethod::Cubic if source_points >= 10 => 10.0,
        InterpolationMethod::Polynomial if source_points >= 4 => 5.0,
        _ => 0.0,
    };
    coverage_ratio * 100.0 + bonus
}

pub(crate) fn quality(
    series: &InterpolatedSeries,
    source: &SourceSeries,
    timeline: &UniversalTimeline,
) -> MethodQuality {
    let method = series.requested_method;
    let coverage_ratio = series.coverage_ratio();
    let source_points = source.len();
    MethodQuality {
        method,
        total_target_points: series.len(),
        valid_points: series.valid_count(),
        coverage_ratio,
        source_points,
        source_span_seconds: source.span_seconds(),
        target_span_seconds: timeline.duration_seconds(),
        interpolation_ratio: if source_points > 0 {
            series.len() as f64 / source_points as f64
        } else {
            0.0
        },
        score: score(method, coverage_ratio, source_points),
    }
}

/// Evaluate every method on one pair, in [`InterpolationMethod::ALL`] order.
pub fn compare_methods(
    time_column: &Column,
    value_column: &Column,
    timeline: &UniversalTimeline,
    settings: &TimelineSettings,
) -> Result<Vec<MethodQuality>, AlignError> {
    let source = SourceSeries::from_columns(time_column, value_column, settings)?;
    let pair = TimeParamPair::new(time_column.name.clone(), value_column.name.clone());
    Ok(compare_source(&pair, &source, timeline))
}

pub(crate) fn compare_source(
    pair: &TimeParamPair,
    source: &SourceSeries,
    timeline: &UniversalTimeline,
) -> Vec<MethodQuality> {
    InterpolationMethod::ALL
        .iter()
        .map(|&method| {
            let series = InterpolatedSeries::from_source(pair, source, timeline, method);
            quality(&series, source, timeline)
        })
        .collect()
}

/// Highest-scoring entry; on equal scores the one listed first wins.
pub fn best(report: &[MethodQuality]) -> InterpolationMethod {
    let mut winner: Option<&MethodQuality> = None;
    for entry in report {
        if winner.map_or(true, |w| entry.score > w.score) {
            winner = Some(entry);
        }
    }
    winner.map(|w| w.method).unwrap_or_default()
}

/// Pick a method for one pair by coverage, favouring linear.
pub fn recommend(
    time_column: &Column,
    value_column: &Column,
    timeline: &UniversalTimeline,
    settings: &TimelineSettings,
) -> Result<InterpolationMethod, AlignError> {
    let report = compare_methods(time_column, value_column, timeline, settings)?;
    let method = best(&report);
    info!(
        "Recommended {} for {}:{}",
        method, time_column.name, value_column.name
    );
    Ok(method)
}
