use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::TableProfile;
use crate::settings::TimelineSettings;
use crate::table::Table;
use crate::timeparse::parse_time_cells;
use crate::AlignError;

/// A time column and the parameter column sampled against it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeParamPair {
    pub time_column: String,
    pub param_column: String,
}

impl TimeParamPair {
    pub fn new(time_column: impl Into<String>, param_column: impl Into<String>) -> Self {
        Self {
            time_column: time_column.into(),
            param_column: param_column.into(),
        }
    }
}

impl fmt::Display for TimeParamPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.time_column, self.param_column)
    }
}

/// Parses `TIME:PARAM`, splitting at the first colon.
impl FromStr for TimeParamPair {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((time, param)) if !time.trim().is_empty() && !param.trim().is_empty() => {
                Ok(Self::new(time.trim(), param.trim()))
            }
            _ => Err(AlignError::Pairing(format!(
                "'{}' is not of the form TIME:PARAM",
                s
            ))),
        }
    }
}

/// The last run of ASCII digits in a column name, e.g. `Temp_12b` -> `"12"`.
///
/// Leading zeros are dropped so `Temp_007` and `Time_7` match. Runs of any
/// length are kept as text. Non-ASCII digits do not count as digits.
pub fn trailing_number(name: &str) -> Option<&str> {
    let bytes = name.as_bytes();
    let end = bytes.iter().rposition(|b| b.is_ascii_digit())? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map_or(0, |i| i + 1);
    let digits = name[start..end].trim_start_matches('0');
    Some(if digits.is_empty() { "0" } else { digits })
}

/// Greedily pair time columns with numeric columns in declaration order.
///
/// A numeric column whose trailing number matches the time column's wins;
/// otherwise the first still-available numeric column is taken. Numeric
/// columns are consumed, so none appears in two pairs, and a time column
/// left without candidates stays unpaired.
pub fn pair_columns(time_columns: &[String], numeric_columns: &[String]) -> Vec<TimeParamPair> {
    if time_columns.is_empty() || numeric_columns.is_empty() {
        warn!(
            "{}",
            AlignError::Pairing(format!(
                "{} time columns and {} numeric columns, nothing to pair",
                time_columns.len(),
                numeric_columns.len()
            ))
        );
        return Vec::new();
    }

    let mut available: Vec<&String> = numeric_columns.iter().collect();
    let mut pairs = Vec::new();
    for time_col in time_columns {
        if available.is_empty() {
            break;
        }
        let suffix_match = trailing_number(time_col).and_then(|number| {
            available
                .iter()
                .position(|param| trailing_number(param) == Some(number))
        });
        let idx = suffix_match.unwrap_or(0);
        let param = available.remove(idx);
        info!("Paired {} -> {}", time_col, param);
        pairs.push(TimeParamPair::new(time_col.clone(), param.clone()));
    }
    pairs
}

pub fn auto_pair(profile: &TableProfile) -> Vec<TimeParamPair> {
    pair_columns(&profile.time_columns, &profile.numeric_columns)
}

/// Check that a column exists and holds at least `min_time_points`
/// timestamps with two or more distinct values.
pub fn validate_time_column(
    table: &Table,
    name: &str,
    settings: &TimelineSettings,
) -> Result<(), AlignError> {
    let column = table.require_column(name)?;
    let parsed = parse_time_cells(&column.values, &settings.time_formats).map_err(|detail| {
        AlignError::TimeParsing {
            column: name.to_string(),
            detail,
        }
    })?;
    let needed = settings.min_time_points.max(2);
    if parsed.len() < needed {
        return Err(AlignError::TimeParsing {
            column: name.to_string(),
            detail: format!("{} timestamps, at least {} needed", parsed.len(), needed),
        });
    }
    let distinct: HashSet<_> = parsed.iter().map(|(_, ts)| *ts).collect();
    if distinct.len() < 2 {
        return Err(AlignError::TimeParsing {
            column: name.to_string(),
            detail: "all timestamps are identical".into(),
        });
    }
    Ok(())
}

/// Keep the pairs that can be plotted; the rest come back as warnings.
pub fn validate_pairs(
    table: &Table,
    pairs: &[TimeParamPair],
    settings: &TimelineSettings,
) -> (Vec<TimeParamPair>, Vec<AlignError>) {
    let mut valid = Vec::with_capacity(pairs.len());
    let mut warnings = Vec::new();
    for pair in pairs {
        let check = validate_time_column(table, &pair.time_column, settings).and_then(|_| {
            let param = table.require_column(&pair.param_column)?;
            if param.non_null().any(|cell| cell.as_f64().is_some()) {
                Ok(())
            } else {
                Err(AlignError::Pairing(format!(
                    "parameter column '{}' has no numeric values",
                    pair.param_column
                )))
            }
        });
        match check {
            Ok(()) => valid.push(pair.clone()),
            Err(err) => {
                warn!("Dropping pair {}: {}", pair, err);
                warnings.push(err);
            }
        }
    }
    (valid, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Cell, Column};

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_trailing_number() {
        assert_eq!(trailing_number("Time_12"), Some("12"));
        assert_eq!(trailing_number("T1_sensor2b"), Some("2"));
        assert_eq!(trailing_number("Temp_007"), Some("7"));
        assert_eq!(trailing_number("Temp_000"), Some("0"));
        assert_eq!(trailing_number("Time_A"), None);
        assert_eq!(trailing_number("42"), Some("42"));
        assert_eq!(trailing_number("Time_٣"), None);
    }

    #[test]
    fn test_long_suffixes_still_pair() {
        let long = "123456789012345678901234567890";
        let time = format!("Time_{}", long);
        let param = format!("Flow_{}", long);
        assert_eq!(trailing_number(&time), Some(long));
        let pairs = pair_columns(&[time.clone()], &names(&["Other_1", param.as_str()]));
        assert_eq!(pairs, vec![TimeParamPair::new(time, param)]);
    }

    #[test]
    fn test_pairs_by_suffix() {
        let pairs = pair_columns(
            &names(&["Time_2", "Time_1"]),
            &names(&["Temp_1", "Press_2"]),
        );
        assert_eq!(
            pairs,
            vec![
                TimeParamPair::new("Time_2", "Press_2"),
                TimeParamPair::new("Time_1", "Temp_1"),
            ]
        );
    }

    #[test]
    fn test_first_available_fallback() {
        let pairs = pair_columns(&names(&["Time_X"]), &names(&["Param1", "Param2"]));
        assert_eq!(pairs, vec![TimeParamPair::new("Time_X", "Param1")]);
    }

    #[test]
    fn test_suffix_tie_takes_first_declared() {
        let pairs = pair_columns(&names(&["t_3"]), &names(&["a", "b_3", "c_3"]));
        assert_eq!(pairs, vec![TimeParamPair::new("t_3", "b_3")]);
    }

    #[test]
    fn test_unpaired_time_column_and_empty_inputs() {
        let pairs = pair_columns(&names(&["Time_1", "Time_2"]), &names(&["Value"]));
        assert_eq!(pairs, vec![TimeParamPair::new("Time_1", "Value")]);
        assert!(pair_columns(&names(&["Time_1"]), &[]).is_empty());
        assert!(pair_columns(&[], &names(&["Value"])).is_empty());
    }

    #[test]
    fn test_pair_from_str() {
        let pair: TimeParamPair = "Time_A:Temp_A".parse().unwrap();
        assert_eq!(pair, TimeParamPair::new("Time_A", "Temp_A"));
        assert!("Time_A".parse::<TimeParamPair>().is_err());
        assert!(":Temp".parse::<TimeParamPair>().is_err());
    }

    #[test]
    fn test_validate_pairs() {
        let table = Table::new(vec![
            Column::new(
                "time",
                vec![
                    Cell::from_text("2024-01-01 00:00:00"),
                    Cell::from_text("2024-01-01 00:00:05"),
                ],
            ),
            Column::new("flat_time", vec![Cell::from_text("2024-01-01 00:00:00"); 2]),
            Column::new("temp", vec![Cell::Number(1.0), Cell::Null]),
            Column::new("note", vec![Cell::from_text("a"), Cell::from_text("b")]),
        ]);
        let settings = TimelineSettings::default();
        let pairs = vec![
            TimeParamPair::new("time", "temp"),
            TimeParamPair::new("time", "note"),
            TimeParamPair::new("flat_time", "temp"),
            TimeParamPair::new("time", "missing"),
        ];
        let (valid, warnings) = validate_pairs(&table, &pairs, &settings);
        assert_eq!(valid, vec![TimeParamPair::new("time", "temp")]);
        assert_eq!(warnings.len(), 3);
        assert!(matches!(warnings[0], AlignError::Pairing(_)));
        assert!(matches!(warnings[1], AlignError::TimeParsing { .. }));
        assert_eq!(warnings[2], AlignError::UnknownColumn("missing".into()));
    }
}
