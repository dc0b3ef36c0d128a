use serde::{Deserialize, Serialize};

use crate::interpolate::InterpolationMethod;
use crate::AlignError;

/// Settings that drive time column detection and parsing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineSettings {
    /// A time column's name must contain one of these (case-insensitive).
    pub time_column_keywords: Vec<String>,
    /// Any of these in a column name rules out a time column, even when a
    /// time keyword is also present.
    pub non_time_keywords: Vec<String>,
    /// Exact names that are never time columns.
    pub id_column_names: Vec<String>,
    pub time_formats: Vec<String>,
    pub unix_timestamp_range: (f64, f64),
    pub uniqueness_threshold: f64,
    pub sample_size: usize,
    pub min_time_points: usize,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            time_column_keywords: strings(&[
                "time",
                "timestamp",
                "datetime",
                "date",
                "время",
                "дата",
                "временная_метка",
            ]),
            non_time_keywords: strings(&[
                "information",
                "info",
                "value",
                "val",
                "data",
                "param",
                "parameter",
            ]),
            id_column_names: strings(&["id", "index", "номер"]),
            time_formats: strings(&[
                "%Y-%m-%d %H:%M:%S",
                "%d.%m.%Y %H:%M:%S",
                "%Y-%m-%d",
                "%d.%m.%Y",
                "%H:%M:%S",
            ]),
            unix_timestamp_range: (1_000_000_000.0, 3_000_000_000.0),
            uniqueness_threshold: 0.8,
            sample_size: 100,
            min_time_points: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationSettings {
    pub default_time_step_seconds: f64,
    pub default_method: InterpolationMethod,
    /// Upper bound on the number of timeline points.
    pub max_interpolation_points: usize,
    /// Entries kept by a [`crate::SeriesCache`]; zero disables caching.
    pub cache_capacity: usize,
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        Self {
            default_time_step_seconds: 1.0,
            default_method: InterpolationMethod::Linear,
            max_interpolation_points: 100_000,
            cache_capacity: 32,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timeline: TimelineSettings,
    pub interpolation: InterpolationSettings,
}

impl Settings {
    /// Parse settings from JSON; absent fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, AlignError> {
        let settings: Settings =
            serde_json::from_str(text).map_err(|e| AlignError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AlignError> {
        validate_step(self.interpolation.default_time_step_seconds)?;
        let tl = &self.timeline;
        if tl.sample_size == 0 {
            return Err(AlignError::Config("sample_size must be at least 1".into()));
        }
        let (lo, hi) = tl.unix_timestamp_range;
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(AlignError::Config(format!(
                "unix_timestamp_range ({}, {}) is not an increasing range",
                lo, hi
            )));
        }
        if !(0.0..=1.0).contains(&tl.uniqueness_threshold) {
            return Err(AlignError::Config(format!(
                "uniqueness_threshold {} must lie in [0, 1]",
                tl.uniqueness_threshold
            )));
        }
        if tl.time_column_keywords.is_empty() {
            return Err(AlignError::Config("time_column_keywords is empty".into()));
        }
        if self.interpolation.max_interpolation_points == 0 {
            return Err(AlignError::Config(
                "max_interpolation_points must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Check a timeline step and return it in whole nanoseconds.
pub fn validate_step(step_seconds: f64) -> Result<i64, AlignError> {
    if !step_seconds.is_finite() || step_seconds <= 0.0 {
        return Err(AlignError::Config(format!(
            "time step must be a positive number of seconds, got {}",
            step_seconds
        )));
    }
    let step_ns = (step_seconds * 1e9).round();
    if step_ns < 1.0 {
        return Err(AlignError::Config(format!(
            "time step {} s is below nanosecond resolution",
            step_seconds
        )));
    }
    Ok(step_ns.min(i64::MAX as f64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.timeline.uniqueness_threshold, 0.8);
        assert_eq!(settings.interpolation.default_time_step_seconds, 1.0);
        assert_eq!(
            settings.interpolation.default_method,
            InterpolationMethod::Linear
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = Settings::from_json(
            r#"{"interpolation": {"default_time_step_seconds": 0.5, "default_method": "step"}}"#,
        )
        .unwrap();
        assert_eq!(settings.interpolation.default_time_step_seconds, 0.5);
        assert_eq!(
            settings.interpolation.default_method,
            InterpolationMethod::PreviousValue
        );
        assert_eq!(settings.interpolation.max_interpolation_points, 100_000);
        assert_eq!(settings.timeline, TimelineSettings::default());
    }

    #[test]
    fn test_rejects_bad_step() {
        assert!(matches!(validate_step(0.0), Err(AlignError::Config(_))));
        assert!(matches!(validate_step(-1.0), Err(AlignError::Config(_))));
        assert!(matches!(validate_step(f64::NAN), Err(AlignError::Config(_))));
        assert!(matches!(validate_step(1e-12), Err(AlignError::Config(_))));
        assert_eq!(validate_step(0.25).unwrap(), 250_000_000);
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(matches!(
            Settings::from_json("{\"timeline\": 3}"),
            Err(AlignError::Config(_))
        ));
        assert!(matches!(
            Settings::from_json(r#"{"timeline": {"uniqueness_threshold": 1.5}}"#),
            Err(AlignError::Config(_))
        ));
    }
}
