// Timestamp parsing shared by classification, timeline construction and
// interpolation. Naive timestamps are treated as UTC when converted to epoch
// seconds; nothing here reads the wall clock.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::table::Cell;

/// Formats tried after the configured ones: fractional seconds, ISO `T`
/// separators and minute precision.
const FALLBACK_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d.%m.%Y %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M",
];

pub fn epoch_seconds(ts: &NaiveDateTime) -> f64 {
    let utc = ts.and_utc();
    utc.timestamp() as f64 + utc.timestamp_subsec_nanos() as f64 / 1e9
}

/// Exact signed difference `to - from` in seconds.
pub fn seconds_between(from: &NaiveDateTime, to: &NaiveDateTime) -> f64 {
    let delta = *to - *from;
    delta.num_seconds() as f64 + delta.subsec_nanos() as f64 / 1e9
}

pub fn from_epoch_seconds(secs: f64) -> Option<NaiveDateTime> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos).map(|dt| dt.naive_utc())
}

/// Parse text against a single strftime-style format. Date-only formats
/// resolve to midnight and time-only formats are anchored to 1970-01-01.
pub fn parse_with_format(text: &str, format: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
        return Some(ts);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, format) {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(time) = NaiveTime::parse_from_str(text, format) {
        return NaiveDate::from_ymd_opt(1970, 1, 1).map(|d| d.and_time(time));
    }
    None
}

/// Parse calendar text: configured formats first, then RFC 3339, then the
/// built-in fallbacks. Plain numbers are not calendar text.
pub fn parse_datetime_text(raw: &str, formats: &[String]) -> Option<NaiveDateTime> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(ts) = formats.iter().find_map(|fmt| parse_with_format(text, fmt)) {
        return Some(ts);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    FALLBACK_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Calendar view of a cell: datetimes and parseable text only.
pub fn parse_calendar_cell(cell: &Cell, formats: &[String]) -> Option<NaiveDateTime> {
    match cell {
        Cell::DateTime(ts) => Some(*ts),
        Cell::Text(s) => parse_datetime_text(s, formats),
        Cell::Null | Cell::Number(_) => None,
    }
}

/// Timestamp view of a cell. Numbers (and numeric text) are Unix seconds.
pub fn parse_timestamp(cell: &Cell, formats: &[String]) -> Option<NaiveDateTime> {
    match cell {
        Cell::Null => None,
        Cell::DateTime(ts) => Some(*ts),
        Cell::Number(v) => from_epoch_seconds(*v),
        Cell::Text(s) => parse_datetime_text(s, formats)
            .or_else(|| s.trim().parse::<f64>().ok().and_then(from_epoch_seconds)),
    }
}

/// Parse every non-null cell, failing on the first one that is not a
/// timestamp. Returns `(row index, timestamp)` pairs.
pub fn parse_time_cells(
    cells: &[Cell],
    formats: &[String],
) -> Result<Vec<(usize, NaiveDateTime)>, String> {
    let mut out = Vec::with_capacity(cells.len());
    for (row, cell) in cells.iter().enumerate() {
        if cell.is_null() {
            continue;
        }
        match parse_timestamp(cell, formats) {
            Some(ts) => out.push((row, ts)),
            None => return Err(format!("row {}: '{}' is not a timestamp", row, cell)),
        }
    }
    Ok(out)
}

/// Name the format of a time column from its first ten non-null samples:
/// a configured format, `timestamp` for Unix seconds, or `auto`.
pub fn detect_time_format(
    cells: &[Cell],
    formats: &[String],
    unix_lower_bound: f64,
) -> Option<String> {
    let sample: Vec<&Cell> = cells.iter().filter(|c| !c.is_null()).take(10).collect();
    if sample.is_empty() {
        return None;
    }
    for fmt in formats {
        let all_match = sample.iter().all(|cell| match cell {
            Cell::Text(s) => parse_with_format(s, fmt).is_some(),
            _ => false,
        });
        if all_match {
            return Some(fmt.clone());
        }
    }
    let numeric: Option<Vec<f64>> = sample.iter().map(|c| c.as_f64()).collect();
    if let Some(values) = numeric {
        if values.iter().copied().fold(f64::INFINITY, f64::min) > unix_lower_bound {
            return Some("timestamp".to_string());
        }
    }
    Some("auto".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats() -> Vec<String> {
        crate::settings::TimelineSettings::default().time_formats
    }

    fn ts(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn test_parse_configured_formats() {
        let f = formats();
        assert_eq!(
            parse_datetime_text("2024-01-01 10:00:30", &f),
            Some(ts("2024-01-01 10:00:30"))
        );
        assert_eq!(
            parse_datetime_text("31.12.2023 23:59:59", &f),
            Some(ts("2023-12-31 23:59:59"))
        );
        assert_eq!(
            parse_datetime_text("2024-02-29", &f),
            Some(ts("2024-02-29 00:00:00"))
        );
        assert_eq!(
            parse_datetime_text("12:30:00", &f),
            Some(ts("1970-01-01 12:30:00"))
        );
    }

    #[test]
    fn test_parse_fallbacks() {
        let f = formats();
        assert_eq!(
            parse_datetime_text("2024-01-01T10:00:00.250", &f),
            Some(ts("2024-01-01 10:00:00.25"))
        );
        assert_eq!(
            parse_datetime_text("2024-01-01T10:00:00Z", &f),
            Some(ts("2024-01-01 10:00:00"))
        );
        assert_eq!(parse_datetime_text("1700000000", &f), None);
        assert_eq!(parse_datetime_text("pressure", &f), None);
    }

    #[test]
    fn test_numbers_are_unix_seconds() {
        let f = formats();
        let parsed = parse_timestamp(&Cell::Number(1_700_000_000.5), &f).unwrap();
        assert!((epoch_seconds(&parsed) - 1_700_000_000.5).abs() < 1e-6);
        let text = Cell::Text("1700000000".into());
        assert!(parse_timestamp(&text, &f).is_some());
        let number = Cell::Number(1_700_000_000.0);
        assert!(parse_calendar_cell(&number, &f).is_none());
    }

    #[test]
    fn test_parse_time_cells_reports_row() {
        let f = formats();
        let cells = vec![
            Cell::Text("2024-01-01 00:00:00".into()),
            Cell::Null,
            Cell::Text("garbage".into()),
        ];
        let err = parse_time_cells(&cells, &f).unwrap_err();
        assert!(err.contains("row 2"));
    }

    #[test]
    fn test_detect_time_format() {
        let f = formats();
        let cells = vec![Cell::Text("01.02.2024 10:00:00".into())];
        assert_eq!(
            detect_time_format(&cells, &f, 1e9).as_deref(),
            Some("%d.%m.%Y %H:%M:%S")
        );
        let unix = vec![Cell::Number(1_700_000_000.0), Cell::Number(1_700_000_100.0)];
        assert_eq!(
            detect_time_format(&unix, &f, 1e9).as_deref(),
            Some("timestamp")
        );
        let iso = vec![Cell::Text("2024-01-01T00:00:00".into())];
        assert_eq!(detect_time_format(&iso, &f, 1e9).as_deref(), Some("auto"));
    }
}
