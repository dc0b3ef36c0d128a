use std::collections::BTreeSet;

use chrono::{NaiveDateTime, TimeDelta};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pairing::TimeParamPair;
use crate::settings::{validate_step, Settings};
use crate::table::Table;
use crate::timeparse::{epoch_seconds, parse_time_cells};
use crate::AlignError;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// A regular grid `start + k * step` for `k` in `0..len`; every point lies
/// at or before `end`, the latest observed timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalTimeline {
    start: NaiveDateTime,
    end: NaiveDateTime,
    step_ns: i64,
    len: usize,
}

fn span_nanos(from: NaiveDateTime, to: NaiveDateTime) -> i128 {
    let delta = to - from;
    delta.num_seconds() as i128 * NANOS_PER_SEC + delta.subsec_nanos() as i128
}

fn offset(nanos: i128) -> TimeDelta {
    let secs = (nanos / NANOS_PER_SEC) as i64;
    let rem = (nanos % NANOS_PER_SEC) as i64;
    TimeDelta::seconds(secs) + TimeDelta::nanoseconds(rem)
}

impl UniversalTimeline {
    /// Build the grid spanning `[start, end]`, refusing grids longer than
    /// `max_points`.
    pub fn new(
        start: NaiveDateTime,
        end: NaiveDateTime,
        step_seconds: f64,
        max_points: usize,
    ) -> Result<Self, AlignError> {
        let step_ns = validate_step(step_seconds)?;
        if end < start {
            return Err(AlignError::Config(format!(
                "timeline end {} precedes start {}",
                end, start
            )));
        }
        let points = span_nanos(start, end) / step_ns as i128 + 1;
        if points > max_points as i128 {
            return Err(AlignError::TimelineTooLarge {
                points: u64::try_from(points).unwrap_or(u64::MAX),
                limit: max_points,
            });
        }
        Ok(Self {
            start,
            end,
            step_ns,
            len: points as usize,
        })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Latest observed timestamp; the last grid point may fall short of it.
    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn step_seconds(&self) -> f64 {
        self.step_ns as f64 / 1e9
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn point(&self, index: usize) -> Option<NaiveDateTime> {
        if index >= self.len {
            return None;
        }
        Some(self.start + offset(index as i128 * self.step_ns as i128))
    }

    pub fn last(&self) -> NaiveDateTime {
        self.start + offset((self.len as i128 - 1) * self.step_ns as i128)
    }

    pub fn points(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        let step = self.step_ns as i128;
        (0..self.len).map(move |k| self.start + offset(k as i128 * step))
    }

    pub fn epoch_seconds(&self) -> Array1<f64> {
        self.points().map(|ts| epoch_seconds(&ts)).collect()
    }

    pub fn duration(&self) -> TimeDelta {
        self.last() - self.start
    }

    /// Seconds covered by the grid, first to last point.
    pub fn duration_seconds(&self) -> f64 {
        (self.len.saturating_sub(1)) as f64 * self.step_seconds()
    }
}

/// Build the universal timeline from every distinct time column referenced
/// by `pairs`. Columns that fail to parse are skipped and reported; only a
/// complete absence of timestamps is an error.
pub fn build_timeline(
    table: &Table,
    pairs: &[TimeParamPair],
    step_seconds: f64,
    settings: &Settings,
) -> Result<(UniversalTimeline, Vec<AlignError>), AlignError> {
    validate_step(step_seconds)?;

    let mut warnings = Vec::new();
    let mut seen = BTreeSet::new();
    let mut bounds: Option<(NaiveDateTime, NaiveDateTime)> = None;
    for pair in pairs {
        if !seen.insert(pair.time_column.as_str()) {
            continue;
        }
        let column = match table.require_column(&pair.time_column) {
            Ok(column) => column,
            Err(err) => {
                warn!("Skipping time column: {}", err);
                warnings.push(err);
                continue;
            }
        };
        let parsed = match parse_time_cells(&column.values, &settings.timeline.time_formats) {
            Ok(parsed) => parsed,
            Err(detail) => {
                let err = AlignError::TimeParsing {
                    column: pair.time_column.clone(),
                    detail,
                };
                warn!("Skipping time column: {}", err);
                warnings.push(err);
                continue;
            }
        };
        for (_, ts) in parsed {
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
                None => (ts, ts),
            });
        }
    }

    let (start, end) = bounds.ok_or(AlignError::NoValidTimeData)?;
    debug!("Time range: {} - {}", start, end);
    let timeline = UniversalTimeline::new(
        start,
        end,
        step_seconds,
        settings.interpolation.max_interpolation_points,
    )?;
    info!(
        "Universal timeline: {} points, step {} s",
        timeline.len(),
        timeline.step_seconds()
    );
    Ok((timeline, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Cell, Column};

    fn ts(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    fn time_col(name: &str, values: &[&str]) -> Column {
        Column::new(name, values.iter().map(|v| Cell::from_text(v)).collect())
    }

    #[test]
    fn test_two_ranges_thirty_second_step() {
        let table = Table::new(vec![
            time_col("Time_1", &["2024-01-01 10:00:00", "2024-01-01 10:01:00"]),
            time_col("Time_2", &["2024-01-01 10:00:30", "2024-01-01 10:02:00"]),
        ]);
        let pairs = vec![
            TimeParamPair::new("Time_1", "a"),
            TimeParamPair::new("Time_2", "b"),
        ];
        let (timeline, warnings) =
            build_timeline(&table, &pairs, 30.0, &Settings::default()).unwrap();
        assert!(warnings.is_empty());
        let points: Vec<_> = timeline.points().collect();
        assert_eq!(
            points,
            vec![
                ts("2024-01-01 10:00:00"),
                ts("2024-01-01 10:00:30"),
                ts("2024-01-01 10:01:00"),
                ts("2024-01-01 10:01:30"),
                ts("2024-01-01 10:02:00"),
            ]
        );
    }

    #[test]
    fn test_end_not_on_grid() {
        let timeline = UniversalTimeline::new(
            ts("2024-01-01 00:00:00"),
            ts("2024-01-01 00:00:25"),
            10.0,
            1000,
        )
        .unwrap();
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline.last(), ts("2024-01-01 00:00:20"));
        assert_eq!(timeline.end(), ts("2024-01-01 00:00:25"));
        assert_eq!(timeline.point(3), None);
    }

    #[test]
    fn test_sub_second_step_is_exact() {
        let timeline = UniversalTimeline::new(
            ts("2024-01-01 00:00:00"),
            ts("2024-01-01 00:00:00.3"),
            0.1,
            1000,
        )
        .unwrap();
        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline.last(), ts("2024-01-01 00:00:00.3"));
        assert!((timeline.duration_seconds() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_single_point_when_all_equal() {
        let t = ts("2024-01-01 00:00:00");
        let timeline = UniversalTimeline::new(t, t, 1.0, 10).unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.epoch_seconds().len(), 1);
    }

    #[test]
    fn test_point_limit() {
        let err = UniversalTimeline::new(
            ts("2024-01-01 00:00:00"),
            ts("2024-01-02 00:00:00"),
            1.0,
            1000,
        )
        .unwrap_err();
        assert_eq!(
            err,
            AlignError::TimelineTooLarge {
                points: 86_401,
                limit: 1000
            }
        );
    }

    #[test]
    fn test_bad_column_skipped_and_no_data_error() {
        let table = Table::new(vec![
            time_col("good", &["2024-01-01 00:00:00", "2024-01-01 00:00:02"]),
            time_col("bad", &["2024-01-01 00:00:00", "soon"]),
        ]);
        let settings = Settings::default();
        let pairs = vec![
            TimeParamPair::new("bad", "x"),
            TimeParamPair::new("good", "y"),
            TimeParamPair::new("good", "z"),
        ];
        let (timeline, warnings) = build_timeline(&table, &pairs, 1.0, &settings).unwrap();
        assert_eq!(timeline.len(), 3);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], AlignError::TimeParsing { .. }));

        let only_bad = vec![TimeParamPair::new("bad", "x")];
        assert_eq!(
            build_timeline(&table, &only_bad, 1.0, &settings).unwrap_err(),
            AlignError::NoValidTimeData
        );
        assert!(matches!(
            build_timeline(&table, &pairs, 0.0, &settings),
            Err(AlignError::Config(_))
        ));
    }
}
