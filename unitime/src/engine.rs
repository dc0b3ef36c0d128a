use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::advisor::{self, MethodQuality};
use crate::cache::{CachedSeries, SeriesCache};
use crate::classify::{self, ColumnProfile, TableProfile};
use crate::interpolate::{InterpolatedSeries, InterpolationMethod, SourceSeries};
use crate::pairing::{self, TimeParamPair};
use crate::settings::Settings;
use crate::table::{Column, Table};
use crate::timeline::{self, UniversalTimeline};
use crate::AlignError;

/// A fixed interpolation method, or one chosen per pair by the advisor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MethodChoice {
    Fixed(InterpolationMethod),
    Auto,
}

impl Default for MethodChoice {
    fn default() -> Self {
        MethodChoice::Fixed(InterpolationMethod::default())
    }
}

impl MethodChoice {
    /// `auto` or a method name; unknown names become linear plus a warning.
    pub fn from_name(name: &str) -> (Self, Option<AlignError>) {
        if name.trim().eq_ignore_ascii_case("auto") {
            return (MethodChoice::Auto, None);
        }
        let (method, warning) = InterpolationMethod::from_name_or_linear(name);
        (MethodChoice::Fixed(method), warning)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MethodChoice::Fixed(method) => method.name(),
            MethodChoice::Auto => "auto",
        }
    }
}

impl fmt::Display for MethodChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Every series of one pipeline run, keyed by parameter column name.
#[derive(Clone, Debug, PartialEq)]
pub struct Alignment {
    pub timeline: UniversalTimeline,
    pub series: BTreeMap<String, InterpolatedSeries>,
    pub pairs: Vec<TimeParamPair>,
    pub method: MethodChoice,
    /// Problems that were recovered from along the way.
    pub warnings: Vec<AlignError>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentInfo {
    pub time_columns: usize,
    pub pairs: usize,
    pub step_seconds: f64,
    pub method: String,
    pub timeline_points: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration_seconds: f64,
    pub warnings: usize,
}

impl Alignment {
    pub fn info(&self) -> AlignmentInfo {
        let time_columns: BTreeSet<&str> =
            self.pairs.iter().map(|p| p.time_column.as_str()).collect();
        AlignmentInfo {
            time_columns: time_columns.len(),
            pairs: self.pairs.len(),
            step_seconds: self.timeline.step_seconds(),
            method: self.method.to_string(),
            timeline_points: self.timeline.len(),
            start: self.timeline.start(),
            end: self.timeline.last(),
            duration_seconds: self.timeline.duration_seconds(),
            warnings: self.warnings.len(),
        }
    }
}

/// The alignment pipeline, configured once and passed around explicitly.
#[derive(Clone, Debug, Default)]
pub struct Aligner {
    settings: Settings,
}

impl Aligner {
    pub fn new(settings: Settings) -> Result<Self, AlignError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// An empty cache sized by the configured `cache_capacity`.
    pub fn series_cache(&self) -> SeriesCache {
        SeriesCache::from_settings(&self.settings.interpolation)
    }

    pub fn classify_column(&self, column: &Column) -> ColumnProfile {
        classify::classify_column(column, &self.settings.timeline)
    }

    pub fn classify_table(&self, table: &Table) -> TableProfile {
        classify::classify_table(table, &self.settings.timeline)
    }

    pub fn auto_pair(&self, table: &Table) -> Vec<TimeParamPair> {
        pairing::auto_pair(&self.classify_table(table))
    }

    pub fn validate_pairs(
        &self,
        table: &Table,
        pairs: &[TimeParamPair],
    ) -> (Vec<TimeParamPair>, Vec<AlignError>) {
        pairing::validate_pairs(table, pairs, &self.settings.timeline)
    }

    /// `None` uses the configured default step.
    pub fn build_timeline(
        &self,
        table: &Table,
        pairs: &[TimeParamPair],
        step_seconds: Option<f64>,
    ) -> Result<(UniversalTimeline, Vec<AlignError>), AlignError> {
        let step = step_seconds.unwrap_or(self.settings.interpolation.default_time_step_seconds);
        timeline::build_timeline(table, pairs, step, &self.settings)
    }

    fn source(&self, table: &Table, pair: &TimeParamPair) -> Result<SourceSeries, AlignError> {
        let time_column = table.require_column(&pair.time_column)?;
        let value_column = table.require_column(&pair.param_column)?;
        SourceSeries::from_columns(time_column, value_column, &self.settings.timeline)
    }

    pub fn interpolate(
        &self,
        table: &Table,
        pair: &TimeParamPair,
        timeline: &UniversalTimeline,
        method: InterpolationMethod,
    ) -> Result<InterpolatedSeries, AlignError> {
        let source = self.source(table, pair)?;
        let series = InterpolatedSeries::from_source(pair, &source, timeline, method);
        Ok(series)
    }

    pub fn compare_methods(
        &self,
        table: &Table,
        pair: &TimeParamPair,
        timeline: &UniversalTimeline,
    ) -> Result<Vec<MethodQuality>, AlignError> {
        let source = self.source(table, pair)?;
        Ok(advisor::compare_source(pair, &source, timeline))
    }

    pub fn recommend(
        &self,
        table: &Table,
        pair: &TimeParamPair,
        timeline: &UniversalTimeline,
    ) -> Result<InterpolationMethod, AlignError> {
        let report = self.compare_methods(table, pair, timeline)?;
        Ok(advisor::best(&report))
    }

    /// Interpolate one pair, turning every failure into an all-null series
    /// and a warning.
    fn align_pair(
        &self,
        table: &Table,
        pair: &TimeParamPair,
        timeline: &UniversalTimeline,
        choice: MethodChoice,
        warnings: &mut Vec<AlignError>,
    ) -> InterpolatedSeries {
        let fallback = match choice {
            MethodChoice::Fixed(method) => method,
            MethodChoice::Auto => InterpolationMethod::Linear,
        };
        let source = match self.source(table, pair) {
            Ok(source) => source,
            Err(err) => {
                warn!("Skipping {}: {}", pair, err);
                warnings.push(err);
                return InterpolatedSeries::null(pair, fallback, timeline.len());
            }
        };
        if source.len() < 2 {
            let err = AlignError::Interpolation {
                param: pair.param_column.clone(),
                detail: format!("{} usable rows, at least 2 needed", source.len()),
            };
            warn!("Skipping {}: {}", pair, err);
            warnings.push(err);
        }
        let method = match choice {
            MethodChoice::Fixed(method) => method,
            MethodChoice::Auto => {
                let method = advisor::best(&advisor::compare_source(pair, &source, timeline));
                info!("Auto-selected {} for {}", method, pair);
                method
            }
        };
        InterpolatedSeries::from_source(pair, &source, timeline, method)
    }

    fn store(
        series_map: &mut BTreeMap<String, InterpolatedSeries>,
        warnings: &mut Vec<AlignError>,
        pair: &TimeParamPair,
        series: InterpolatedSeries,
    ) {
        if series_map.insert(pair.param_column.clone(), series).is_some() {
            let err = AlignError::Pairing(format!(
                "parameter '{}' is paired more than once, keeping {}",
                pair.param_column, pair
            ));
            warn!("{}", err);
            warnings.push(err);
        }
    }

    /// Resample every pair onto `timeline`. Per-pair problems never abort the
    /// batch; they leave an all-null series and a warning behind.
    pub fn interpolate_all(
        &self,
        table: &Table,
        pairs: &[TimeParamPair],
        timeline: &UniversalTimeline,
        choice: MethodChoice,
    ) -> Alignment {
        let mut warnings = Vec::new();
        let mut series = BTreeMap::new();
        for pair in pairs {
            let aligned = self.align_pair(table, pair, timeline, choice, &mut warnings);
            Self::store(&mut series, &mut warnings, pair, aligned);
        }
        info!("Interpolated {} series with {}", series.len(), choice);
        Alignment {
            timeline: timeline.clone(),
            series,
            pairs: pairs.to_vec(),
            method: choice,
            warnings,
        }
    }

    /// Same as [`Aligner::interpolate_all`], reusing series from `cache`.
    pub fn interpolate_all_cached(
        &self,
        cache: &mut SeriesCache,
        table: &Table,
        pairs: &[TimeParamPair],
        timeline: &UniversalTimeline,
        choice: MethodChoice,
    ) -> Alignment {
        let mut warnings = Vec::new();
        let mut series = BTreeMap::new();
        for pair in pairs {
            let key = match (
                table.column(&pair.time_column),
                table.column(&pair.param_column),
            ) {
                (Some(time_column), Some(value_column)) => SeriesCache::key(
                    time_column,
                    value_column,
                    choice.label(),
                    timeline,
                    &self.settings.timeline.time_formats,
                )
                .ok(),
                _ => None,
            };
            let entry = match key.as_deref().and_then(|k| cache.get(k)) {
                Some(hit) => {
                    debug!("Cache hit for {}", pair);
                    hit
                }
                None => {
                    let mut pair_warnings = Vec::new();
                    let fresh =
                        self.align_pair(table, pair, timeline, choice, &mut pair_warnings);
                    let entry = CachedSeries {
                        series: fresh,
                        warnings: pair_warnings,
                    };
                    if let Some(key) = key {
                        cache.insert(key, entry.clone());
                    }
                    entry
                }
            };
            warnings.extend(entry.warnings);
            Self::store(&mut series, &mut warnings, pair, entry.series);
        }
        Alignment {
            timeline: timeline.clone(),
            series,
            pairs: pairs.to_vec(),
            method: choice,
            warnings,
        }
    }

    /// Validate the table, pair columns (automatically when `pairs` is
    /// `None`), build the timeline and resample every pair.
    pub fn run(
        &self,
        table: &Table,
        pairs: Option<&[TimeParamPair]>,
        step_seconds: Option<f64>,
        choice: MethodChoice,
    ) -> Result<Alignment, AlignError> {
        let mut warnings = table.validate()?;
        let pairs = match pairs {
            Some(pairs) => pairs.to_vec(),
            None => self.auto_pair(table),
        };
        if pairs.is_empty() {
            let reason = "no time/parameter pairs to align";
            return Err(AlignError::Pairing(reason.into()));
        }
        let (timeline, timeline_warnings) = self.build_timeline(table, &pairs, step_seconds)?;
        warnings.extend(timeline_warnings);
        let mut alignment = self.interpolate_all(table, &pairs, &timeline, choice);
        warnings.append(&mut alignment.warnings);
        alignment.warnings = warnings;
        Ok(alignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn text(name: &str, values: &[&str]) -> Column {
        Column::new(name, values.iter().map(|v| Cell::from_text(v)).collect())
    }

    fn table() -> Table {
        Table::new(vec![
            text(
                "Time_A",
                &[
                    "2024-01-01 10:00:00",
                    "2024-01-01 10:00:10",
                    "2024-01-01 10:00:20",
                ],
            ),
            text("Temp_A", &["1", "2", "3"]),
            text(
                "Time_B",
                &["2024-01-01 10:00:05", "2024-01-01 10:00:25", ""],
            ),
            text("Press_B", &["10", "20", ""]),
        ])
    }

    #[test]
    fn test_method_choice_from_name() {
        assert_eq!(MethodChoice::from_name("AUTO"), (MethodChoice::Auto, None));
        assert_eq!(
            MethodChoice::from_name("cubic"),
            (MethodChoice::Fixed(InterpolationMethod::Cubic), None)
        );
        let (choice, warning) = MethodChoice::from_name("akima");
        assert_eq!(choice, MethodChoice::Fixed(InterpolationMethod::Linear));
        assert!(matches!(warning, Some(AlignError::UnknownMethod(_))));
    }

    #[test]
    fn test_run_auto_pairs() {
        let aligner = Aligner::default();
        let alignment = aligner
            .run(&table(), None, Some(5.0), MethodChoice::default())
            .unwrap();
        assert_eq!(
            alignment.pairs,
            vec![
                TimeParamPair::new("Time_A", "Temp_A"),
                TimeParamPair::new("Time_B", "Press_B"),
            ]
        );
        assert_eq!(alignment.timeline.len(), 6);
        let temp = &alignment.series["Temp_A"];
        assert_eq!(
            temp.values,
            vec![Some(1.0), Some(1.5), Some(2.0), Some(2.5), Some(3.0), None]
        );
        let press = &alignment.series["Press_B"];
        assert_eq!(press.values[0], None);
        assert_eq!(press.values[1], Some(10.0));
        assert_eq!(press.values[5], Some(20.0));
        assert!(alignment.warnings.is_empty());

        let info = alignment.info();
        assert_eq!(info.pairs, 2);
        assert_eq!(info.time_columns, 2);
        assert_eq!(info.timeline_points, 6);
        assert_eq!(info.duration_seconds, 25.0);
        assert_eq!(info.method, "linear");
    }

    #[test]
    fn test_bad_pair_becomes_null_series() {
        let aligner = Aligner::default();
        let pairs = vec![
            TimeParamPair::new("Time_A", "Temp_A"),
            TimeParamPair::new("Time_A", "Missing"),
        ];
        let alignment = aligner
            .run(&table(), Some(&pairs), Some(10.0), MethodChoice::Auto)
            .unwrap();
        assert!(alignment.series["Missing"].all_null());
        assert!(!alignment.series["Temp_A"].all_null());
        assert_eq!(
            alignment.warnings,
            vec![AlignError::UnknownColumn("Missing".into())]
        );
    }

    #[test]
    fn test_run_without_pairs() {
        let table = Table::new(vec![text("note", &["a", "b"])]);
        assert!(matches!(
            Aligner::default().run(&table, None, None, MethodChoice::default()),
            Err(AlignError::Pairing(_))
        ));
    }

    #[test]
    fn test_cached_matches_fresh() {
        let aligner = Aligner::default();
        let table = table();
        let pairs = aligner.auto_pair(&table);
        let (timeline, _) = aligner.build_timeline(&table, &pairs, Some(1.0)).unwrap();
        let fresh = aligner.interpolate_all(&table, &pairs, &timeline, MethodChoice::Auto);
        let mut cache = SeriesCache::new(8);
        let choice = MethodChoice::Auto;
        let cold = aligner.interpolate_all_cached(&mut cache, &table, &pairs, &timeline, choice);
        let warm = aligner.interpolate_all_cached(&mut cache, &table, &pairs, &timeline, choice);
        assert_eq!(cold.series, fresh.series);
        assert_eq!(warm.series, fresh.series);
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn test_cache_hit_replays_warnings() {
        let aligner = Aligner::default();
        let table = Table::new(vec![
            text("Time_1", &["2024-01-01 10:00:00", "2024-01-01 10:00:10"]),
            text("A_1", &["1", "2"]),
            text("Time_2", &["2024-01-01 10:00:05", ""]),
            text("B_2", &["7", ""]),
        ]);
        let pairs = vec![
            TimeParamPair::new("Time_1", "A_1"),
            TimeParamPair::new("Time_2", "B_2"),
        ];
        let (timeline, _) = aligner.build_timeline(&table, &pairs, Some(1.0)).unwrap();
        let choice = MethodChoice::default();
        let fresh = aligner.interpolate_all(&table, &pairs, &timeline, choice);
        assert_eq!(fresh.warnings.len(), 1);
        assert!(matches!(
            &fresh.warnings[0],
            AlignError::Interpolation { param, .. } if param == "B_2"
        ));

        let mut cache = aligner.series_cache();
        let cold = aligner.interpolate_all_cached(&mut cache, &table, &pairs, &timeline, choice);
        let warm = aligner.interpolate_all_cached(&mut cache, &table, &pairs, &timeline, choice);
        assert_eq!(cache.hits(), 2);
        assert_eq!(cold.warnings, fresh.warnings);
        assert_eq!(warm.warnings, fresh.warnings);
        assert_eq!(warm.series, fresh.series);
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let mut settings = Settings::default();
        settings.interpolation.default_time_step_seconds = -1.0;
        assert!(matches!(Aligner::new(settings), Err(AlignError::Config(_))));
    }
}
