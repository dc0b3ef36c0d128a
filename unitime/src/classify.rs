//! Column type inference.
//!
//! Time detection is name-first: a column is only considered a time column
//! when its name carries a time keyword and no non-time keyword, and only
//! then are its values parsed. Classification is a pure function of the
//! column's name and values.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::settings::TimelineSettings;
use crate::table::{Cell, Column, Table};
use crate::timeparse::{detect_time_format, parse_calendar_cell, parse_timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Time,
    Numeric,
    Text,
    Unknown,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Time => "time",
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeDetails {
    Time {
        format: Option<String>,
        range: Option<(NaiveDateTime, NaiveDateTime)>,
    },
    Numeric {
        min: f64,
        max: f64,
        mean: f64,
    },
    Text {
        samples: Vec<String>,
    },
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub non_null: usize,
    pub nulls: usize,
    pub distinct: usize,
    pub details: TypeDetails,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub column_type: ColumnType,
    pub stats: ColumnStats,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    pub rows: usize,
    pub columns: Vec<ColumnProfile>,
    pub time_columns: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub text_columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    pub rows: usize,
    pub columns: usize,
    pub time_columns: usize,
    pub numeric_columns: usize,
    pub text_columns: usize,
}

impl TableProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn summary(&self) -> TableSummary {
        TableSummary {
            rows: self.rows,
            columns: self.columns.len(),
            time_columns: self.time_columns.len(),
            numeric_columns: self.numeric_columns.len(),
            text_columns: self.text_columns.len(),
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
enum DistinctKey<'a> {
    Number(OrderedFloat<f64>),
    Text(&'a str),
    DateTime(NaiveDateTime),
}

fn distinct_count<'a>(cells: impl Iterator<Item = &'a Cell>) -> usize {
    let mut seen = HashSet::new();
    for cell in cells {
        let key = match cell {
            Cell::Number(v) => DistinctKey::Number(OrderedFloat(*v)),
            Cell::Text(s) => DistinctKey::Text(s.as_str()),
            Cell::DateTime(ts) => DistinctKey::DateTime(*ts),
            Cell::Null => continue,
        };
        seen.insert(key);
    }
    seen.len()
}

fn name_allows_time(name: &str, settings: &TimelineSettings) -> bool {
    let lower = name.to_lowercase();
    let contains_any = |keywords: &[String]| {
        keywords
            .iter()
            .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
    };
    if contains_any(&settings.non_time_keywords) {
        return false;
    }
    if !contains_any(&settings.time_column_keywords) {
        return false;
    }
    !settings
        .id_column_names
        .iter()
        .any(|id| lower.trim() == id.to_lowercase())
}

/// Content half of the time check, run on the leading non-null sample.
fn sample_is_time(sample: &[&Cell], settings: &TimelineSettings) -> bool {
    let parsed: Option<Vec<NaiveDateTime>> = sample
        .iter()
        .map(|cell| parse_calendar_cell(cell, &settings.time_formats))
        .collect();
    if let Some(times) = parsed {
        let distinct: HashSet<NaiveDateTime> = times.into_iter().collect();
        return distinct.len() >= 2;
    }

    // Unix seconds, guarded against integer IDs by a uniqueness threshold.
    let numeric: Option<Vec<f64>> = sample.iter().map(|cell| cell.as_f64()).collect();
    let Some(values) = numeric else {
        return false;
    };
    let (lo, hi) = settings.unix_timestamp_range;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let distinct: HashSet<OrderedFloat<f64>> = values.iter().map(|v| OrderedFloat(*v)).collect();
    min > lo
        && max < hi
        && distinct.len() as f64 > values.len() as f64 * settings.uniqueness_threshold
}

pub fn is_time_column(column: &Column, settings: &TimelineSettings) -> bool {
    if !name_allows_time(&column.name, settings) {
        return false;
    }
    let sample: Vec<&Cell> = column.non_null().take(settings.sample_size).collect();
    !sample.is_empty() && sample_is_time(&sample, settings)
}

pub fn is_numeric_column(column: &Column, settings: &TimelineSettings) -> bool {
    let mut sample = column.non_null().take(settings.sample_size).peekable();
    sample.peek().is_some() && sample.all(|cell| cell.as_f64().is_some())
}

pub fn classify_column(column: &Column, settings: &TimelineSettings) -> ColumnProfile {
    let column_type = if column.non_null_count() == 0 {
        ColumnType::Unknown
    } else if is_time_column(column, settings) {
        ColumnType::Time
    } else if is_numeric_column(column, settings) {
        ColumnType::Numeric
    } else {
        ColumnType::Text
    };

    let details = match column_type {
        ColumnType::Time => {
            let parsed: Vec<NaiveDateTime> = column
                .non_null()
                .filter_map(|cell| parse_timestamp(cell, &settings.time_formats))
                .collect();
            let range = parsed
                .iter()
                .min()
                .copied()
                .zip(parsed.iter().max().copied());
            TypeDetails::Time {
                format: detect_time_format(
                    &column.values,
                    &settings.time_formats,
                    settings.unix_timestamp_range.0,
                ),
                range,
            }
        }
        ColumnType::Numeric => {
            let values: Vec<f64> = column.non_null().filter_map(Cell::as_f64).collect();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            TypeDetails::Numeric { min, max, mean }
        }
        ColumnType::Text => TypeDetails::Text {
            samples: column.non_null().take(3).map(|c| c.to_string()).collect(),
        },
        ColumnType::Unknown => TypeDetails::Unknown,
    };

    let non_null = column.non_null_count();
    ColumnProfile {
        name: column.name.clone(),
        column_type,
        stats: ColumnStats {
            non_null,
            nulls: column.len() - non_null,
            distinct: distinct_count(column.non_null()),
            details,
        },
    }
}

pub fn classify_table(table: &Table, settings: &TimelineSettings) -> TableProfile {
    let mut profile = TableProfile {
        rows: table.row_count(),
        ..TableProfile::default()
    };
    for column in table.columns() {
        let col = classify_column(column, settings);
        match col.column_type {
            ColumnType::Time => profile.time_columns.push(col.name.clone()),
            ColumnType::Numeric => profile.numeric_columns.push(col.name.clone()),
            ColumnType::Text => profile.text_columns.push(col.name.clone()),
            ColumnType::Unknown => {}
        }
        profile.columns.push(col);
    }
    debug!(
        "classified {} columns: {} time, {} numeric, {} text",
        profile.columns.len(),
        profile.time_columns.len(),
        profile.numeric_columns.len(),
        profile.text_columns.len()
    );
    profile
}
