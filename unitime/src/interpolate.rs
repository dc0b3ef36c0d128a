use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::pairing::TimeParamPair;
use crate::settings::TimelineSettings;
use crate::table::{Cell, Column};
use crate::timeline::UniversalTimeline;
use crate::timeparse::{parse_timestamp, seconds_between};
use crate::AlignError;

/// Highest degree used by [`InterpolationMethod::Polynomial`].
pub const MAX_POLY_DEGREE: usize = 5;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    Linear,
    Nearest,
    Cubic,
    Polynomial,
    /// Last observed value at or before the target.
    #[serde(rename = "step", alias = "previous")]
    PreviousValue,
}

impl Default for InterpolationMethod {
    fn default() -> Self {
        InterpolationMethod::Linear
    }
}

impl InterpolationMethod {
    /// Every method, in evaluation order for method comparison.
    pub const ALL: [InterpolationMethod; 5] = [
        InterpolationMethod::Linear,
        InterpolationMethod::Nearest,
        InterpolationMethod::Cubic,
        InterpolationMethod::Polynomial,
        InterpolationMethod::PreviousValue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InterpolationMethod::Linear => "linear",
            InterpolationMethod::Nearest => "nearest",
            InterpolationMethod::Cubic => "cubic",
            InterpolationMethod::Polynomial => "polynomial",
            InterpolationMethod::PreviousValue => "step",
        }
    }

    /// Source points the method needs before it falls back to linear.
    pub fn min_points(&self) -> usize {
        match self {
            InterpolationMethod::Cubic => 4,
            _ => 2,
        }
    }

    /// Resolve a method name, mapping unknown names to linear. The returned
    /// error, if any, is meant to be reported as a warning.
    pub fn from_name_or_linear(name: &str) -> (Self, Option<AlignError>) {
        match name.parse() {
            Ok(method) => (method, None),
            Err(err) => {
                warn!("{}", err);
                (InterpolationMethod::Linear, Some(err))
            }
        }
    }
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InterpolationMethod {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(InterpolationMethod::Linear),
            "nearest" => Ok(InterpolationMethod::Nearest),
            "cubic" => Ok(InterpolationMethod::Cubic),
            "polynomial" => Ok(InterpolationMethod::Polynomial),
            "step" | "previous" => Ok(InterpolationMethod::PreviousValue),
            _ => Err(AlignError::UnknownMethod(s.to_string())),
        }
    }
}

/// Cleaned source rows of one pair: no nulls, strictly increasing timestamps.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSeries {
    times: Vec<NaiveDateTime>,
    values: Vec<f64>,
}

impl SourceSeries {
    /// Drop rows with a null timestamp or value, then sort by time and keep
    /// the first row of every run of equal timestamps.
    pub fn from_columns(
        time_column: &Column,
        value_column: &Column,
        settings: &TimelineSettings,
    ) -> Result<Self, AlignError> {
        let rows = time_column.len().min(value_column.len());
        let mut points: Vec<(NaiveDateTime, f64)> = Vec::with_capacity(rows);
        for row in 0..rows {
            let (time_cell, value_cell) = (&time_column.values[row], &value_column.values[row]);
            if time_cell.is_null() || value_cell.is_null() {
                continue;
            }
            let ts = parse_timestamp(time_cell, &settings.time_formats).ok_or_else(|| {
                AlignError::TimeParsing {
                    column: time_column.name.clone(),
                    detail: format!("row {}: '{}' is not a timestamp", row, time_cell),
                }
            })?;
            let value = numeric_value(value_cell).ok_or_else(|| AlignError::Interpolation {
                param: value_column.name.clone(),
                detail: format!("row {}: '{}' is not a number", row, value_cell),
            })?;
            points.push((ts, value));
        }

        // Stable sort, so the first of several equal timestamps survives.
        points.sort_by_key(|(ts, _)| *ts);
        points.dedup_by_key(|(ts, _)| *ts);
        let (times, values) = points.into_iter().unzip();
        Ok(Self { times, values })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((*self.times.first()?, *self.times.last()?))
    }

    pub fn span_seconds(&self) -> f64 {
        self.range()
            .map_or(0.0, |(lo, hi)| seconds_between(&lo, &hi))
    }

    /// Resample onto `timeline`. Targets outside this series' own time range
    /// are always null. Returns the method actually used after fallback.
    pub fn resample(
        &self,
        timeline: &UniversalTimeline,
        method: InterpolationMethod,
    ) -> (InterpolationMethod, Vec<Option<f64>>) {
        let mut out = vec![None; timeline.len()];
        let Some((lo, hi)) = self.range() else {
            return (method, out);
        };
        if self.len() < 2 {
            return (method, out);
        }

        // Seconds relative to the first source timestamp keep full precision
        // for sub-second data; the offset cancels out of every kernel.
        let xs: Vec<f64> = self.times.iter().map(|t| seconds_between(&lo, t)).collect();
        let (slots, targets): (Vec<usize>, Vec<f64>) = timeline
            .points()
            .enumerate()
            .filter(|(_, ts)| *ts >= lo && *ts <= hi)
            .map(|(i, ts)| (i, seconds_between(&lo, &ts)))
            .unzip();

        let (applied, computed) = match method {
            InterpolationMethod::Linear => (method, linear(&xs, &self.values, &targets)),
            InterpolationMethod::Nearest => (method, nearest(&xs, &self.values, &targets)),
            InterpolationMethod::PreviousValue => {
                (method, previous(&xs, &self.values, &targets))
            }
            InterpolationMethod::Cubic => match cubic(&xs, &self.values, &targets) {
                Some(values) => (method, values),
                None => {
                    debug!(
                        "Cubic spline unavailable for {} points, using linear",
                        xs.len()
                    );
                    let values = linear(&xs, &self.values, &targets);
                    (InterpolationMethod::Linear, values)
                }
            },
            InterpolationMethod::Polynomial => match polynomial(&xs, &self.values, &targets) {
                Some(values) => (method, values),
                None => {
                    debug!("Polynomial fit is singular, using linear");
                    let values = linear(&xs, &self.values, &targets);
                    (InterpolationMethod::Linear, values)
                }
            },
        };

        for (slot, value) in slots.into_iter().zip(computed) {
            out[slot] = Some(value).filter(|v| v.is_finite());
        }
        (applied, out)
    }
}

fn numeric_value(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::DateTime(_) => None,
        other => other.as_f64(),
    }
}

/// Index of the first source point strictly after `x`.
fn upper(xs: &[f64], x: f64) -> usize {
    xs.partition_point(|&v| v <= x)
}

fn linear(xs: &[f64], ys: &[f64], targets: &[f64]) -> Vec<f64> {
    let n = xs.len();
    targets
        .iter()
        .map(|&x| {
            let i = upper(xs, x);
            if i == 0 {
                return ys[0];
            }
            if i >= n {
                return ys[n - 1];
            }
            let t = (x - xs[i - 1]) / (xs[i] - xs[i - 1]);
            ys[i - 1] + t * (ys[i] - ys[i - 1])
        })
        .collect()
}

/// Ties between two neighbours go to the earlier one.
fn nearest(xs: &[f64], ys: &[f64], targets: &[f64]) -> Vec<f64> {
    let n = xs.len();
    targets
        .iter()
        .map(|&x| {
            let i = upper(xs, x);
            if i == 0 {
                return ys[0];
            }
            if i >= n {
                return ys[n - 1];
            }
            if xs[i] - x < x - xs[i - 1] {
                ys[i]
            } else {
                ys[i - 1]
            }
        })
        .collect()
}

fn previous(xs: &[f64], ys: &[f64], targets: &[f64]) -> Vec<f64> {
    targets
        .iter()
        .map(|&x| ys[upper(xs, x).saturating_sub(1)])
        .collect()
}

/// Second derivatives of the not-a-knot cubic spline through `(xs, ys)`,
/// solved as a tridiagonal system over the interior knots.
fn spline_moments(xs: &[f64], ys: &[f64]) -> Option<Array1<f64>> {
    let n = xs.len();
    if n < 4 {
        return None;
    }
    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let m = n - 2;

    let alpha_l = (h[0] + h[1]) / h[1];
    let beta_l = -h[0] / h[1];
    let alpha_r = (h[n - 3] + h[n - 2]) / h[n - 3];
    let beta_r = -h[n - 2] / h[n - 3];

    let mut sub = Array1::<f64>::zeros(m);
    let mut diag = Array1::<f64>::zeros(m);
    let mut sup = Array1::<f64>::zeros(m);
    let slope = |i: usize| (ys[i + 1] - ys[i]) / h[i];
    let mut rhs: Array1<f64> = (1..n - 1)
        .map(|i| 6.0 * (slope(i) - slope(i - 1)))
        .collect();

    diag[0] = h[0] * alpha_l + 2.0 * (h[0] + h[1]);
    sup[0] = h[0] * beta_l + h[1];
    for j in 1..m - 1 {
        let i = j + 1;
        sub[j] = h[i - 1];
        diag[j] = 2.0 * (h[i - 1] + h[i]);
        sup[j] = h[i];
    }
    sub[m - 1] = h[n - 3] + h[n - 2] * beta_r;
    diag[m - 1] = 2.0 * (h[n - 3] + h[n - 2]) + h[n - 2] * alpha_r;

    for i in 1..m {
        if diag[i - 1].abs() < f64::EPSILON {
            return None;
        }
        let w = sub[i] / diag[i - 1];
        diag[i] -= w * sup[i - 1];
        rhs[i] -= w * rhs[i - 1];
    }
    if diag[m - 1].abs() < f64::EPSILON {
        return None;
    }

    let mut moments = Array1::<f64>::zeros(n);
    moments[m] = rhs[m - 1] / diag[m - 1];
    for j in (0..m - 1).rev() {
        moments[j + 1] = (rhs[j] - sup[j] * moments[j + 2]) / diag[j];
    }
    moments[0] = alpha_l * moments[1] + beta_l * moments[2];
    moments[n - 1] = alpha_r * moments[n - 2] + beta_r * moments[n - 3];
    moments.iter().all(|v| v.is_finite()).then_some(moments)
}

fn cubic(xs: &[f64], ys: &[f64], targets: &[f64]) -> Option<Vec<f64>> {
    let moments = spline_moments(xs, ys)?;
    let n = xs.len();
    let values = targets
        .iter()
        .map(|&x| {
            let i = upper(xs, x).clamp(1, n - 1) - 1;
            let hi = xs[i + 1] - xs[i];
            let a = xs[i + 1] - x;
            let b = x - xs[i];
            moments[i] * a * a * a / (6.0 * hi)
                + moments[i + 1] * b * b * b / (6.0 * hi)
                + (ys[i] / hi - moments[i] * hi / 6.0) * a
                + (ys[i + 1] / hi - moments[i + 1] * hi / 6.0) * b
        })
        .collect();
    Some(values)
}

/// Least-squares polynomial of degree `min(n - 1, 5)` on the axis rescaled
/// to `[-1, 1]`, solved through the normal equations.
fn polynomial(xs: &[f64], ys: &[f64], targets: &[f64]) -> Option<Vec<f64>> {
    let n = xs.len();
    let degree = (n - 1).min(MAX_POLY_DEGREE);
    if degree < 1 {
        return None;
    }
    let center = (xs[0] + xs[n - 1]) / 2.0;
    let scale = (xs[n - 1] - xs[0]) / 2.0;
    if scale <= 0.0 {
        return None;
    }
    let size = degree + 1;

    let mut normal = Array2::<f64>::zeros((size, size));
    let mut rhs = Array1::<f64>::zeros(size);
    for (&x, &y) in xs.iter().zip(ys) {
        let u = (x - center) / scale;
        let powers: Vec<f64> = (0..2 * size - 1).map(|p| u.powi(p as i32)).collect();
        for r in 0..size {
            rhs[r] += y * powers[r];
            for c in 0..size {
                normal[[r, c]] += powers[r + c];
            }
        }
    }
    let coeffs = solve(normal, rhs)?;

    let values = targets
        .iter()
        .map(|&x| {
            let u = (x - center) / scale;
            coeffs.iter().rev().fold(0.0, |acc, c| acc * u + c)
        })
        .collect();
    Some(values)
}

/// Gaussian elimination with partial pivoting; `None` when singular.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let size = b.len();
    for col in 0..size {
        let pivot = (col..size).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..size {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }
        for row in col + 1..size {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..size {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(size);
    for row in (0..size).rev() {
        let tail: f64 = (row + 1..size).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Summary statistics over the non-null values of a series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub points: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation; zero for a single point.
    pub std: f64,
}

/// One parameter resampled onto the universal timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterpolatedSeries {
    pub param: String,
    pub time_column: String,
    pub requested_method: InterpolationMethod,
    pub applied_method: InterpolationMethod,
    pub values: Vec<Option<f64>>,
    pub source_points: usize,
    pub source_range: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl InterpolatedSeries {
    /// A series with no values, used when a pair cannot be interpolated.
    pub fn null(pair: &TimeParamPair, method: InterpolationMethod, len: usize) -> Self {
        Self {
            param: pair.param_column.clone(),
            time_column: pair.time_column.clone(),
            requested_method: method,
            applied_method: method,
            values: vec![None; len],
            source_points: 0,
            source_range: None,
        }
    }

    pub fn from_source(
        pair: &TimeParamPair,
        source: &SourceSeries,
        timeline: &UniversalTimeline,
        method: InterpolationMethod,
    ) -> Self {
        let (applied_method, values) = source.resample(timeline, method);
        Self {
            param: pair.param_column.clone(),
            time_column: pair.time_column.clone(),
            requested_method: method,
            applied_method,
            values,
            source_points: source.len(),
            source_range: source.range(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn all_null(&self) -> bool {
        self.valid_count() == 0
    }

    pub fn coverage_ratio(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.valid_count() as f64 / self.values.len() as f64
    }

    pub fn stats(&self) -> Option<SeriesStats> {
        let valid: Vec<f64> = self.values.iter().flatten().copied().collect();
        if valid.is_empty() {
            return None;
        }
        let points = valid.len();
        let mean = valid.iter().sum::<f64>() / points as f64;
        let std = if points > 1 {
            let ss: f64 = valid.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (points - 1) as f64).sqrt()
        } else {
            0.0
        };
        Some(SeriesStats {
            points,
            min: valid.iter().copied().fold(f64::INFINITY, f64::min),
            max: valid.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std,
        })
    }
}

/// Resample one time/value column pair onto `timeline`.
///
/// Fewer than two usable rows yield an all-null series rather than an
/// error; an unparseable timestamp or a non-numeric value is an error.
pub fn interpolate(
    time_column: &Column,
    value_column: &Column,
    timeline: &UniversalTimeline,
    method: InterpolationMethod,
    settings: &TimelineSettings,
) -> Result<InterpolatedSeries, AlignError> {
    let source = SourceSeries::from_columns(time_column, value_column, settings)?;
    let pair = TimeParamPair::new(time_column.name.clone(), value_column.name.clone());
    if source.len() < 2 {
        warn!(
            "Only {} usable rows for {}, leaving it empty",
            source.len(),
            pair
        );
    }
    let series = InterpolatedSeries::from_source(&pair, &source, timeline, method);
    debug!(
        "Interpolated {} with {} ({} of {} points)",
        pair,
        series.applied_method,
        series.valid_count(),
        series.len()
    );
    Ok(series)
}
