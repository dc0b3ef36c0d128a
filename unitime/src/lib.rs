//! Universal-timeline alignment for mixed tabular time series.
//!
//! A table whose columns mix timestamps, measurements and free text is
//! classified column by column, time columns are paired with parameter
//! columns, and every pair is resampled onto one regularly stepped timeline
//! so that signals recorded at different rates can be compared directly.

use thiserror::Error;

pub mod advisor;
pub mod cache;
pub mod classify;
pub mod engine;
pub mod interpolate;
pub mod pairing;
pub mod settings;
pub mod table;
pub mod timeline;
pub mod timeparse;

pub use advisor::{compare_methods, recommend, MethodQuality};
pub use cache::{CachedSeries, SeriesCache};
pub use classify::{
    classify_column, classify_table, ColumnProfile, ColumnStats, ColumnType, TableProfile,
    TableSummary, TypeDetails,
};
pub use engine::{Aligner, Alignment, AlignmentInfo, MethodChoice};
pub use interpolate::{interpolate, InterpolatedSeries, InterpolationMethod, SeriesStats};
pub use pairing::{
    auto_pair, trailing_number, validate_pairs, validate_time_column, TimeParamPair,
};
pub use settings::{InterpolationSettings, Settings, TimelineSettings};
pub use table::{Cell, Column, Table};
pub use timeline::{build_timeline, UniversalTimeline};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("invalid table: {0}")]
    Data(String),
    #[error("failed to parse time column '{column}': {detail}")]
    TimeParsing { column: String, detail: String },
    #[error("pairing failed: {0}")]
    Pairing(String),
    #[error("no valid time data in the selected pairs")]
    NoValidTimeData,
    #[error("interpolation of '{param}' failed: {detail}")]
    Interpolation { param: String, detail: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("unknown interpolation method '{0}', falling back to linear")]
    UnknownMethod(String),
    #[error("timeline of {points} points exceeds the limit of {limit}")]
    TimelineTooLarge { points: u64, limit: usize },
}
