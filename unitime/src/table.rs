use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AlignError;

/// One nullable value of a loaded table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// Infer a cell from raw text the way the loader does: blank and `nan`
    /// become null, anything parseable as a finite float becomes a number.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Cell::Number(v),
            Ok(_) => Cell::Null,
            Err(_) => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Number(v) => v.is_nan(),
            Cell::Text(_) | Cell::DateTime(_) => false,
        }
    }

    /// Numeric view of the cell; text is accepted when it parses as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) if !v.is_nan() => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| !v.is_nan()),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Number(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
            Cell::DateTime(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(value: NaiveDateTime) -> Self {
        Cell::DateTime(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn non_null(&self) -> impl Iterator<Item = &Cell> {
        self.values.iter().filter(|c| !c.is_null())
    }

    pub fn non_null_count(&self) -> usize {
        self.non_null().count()
    }

    pub fn null_count(&self) -> usize {
        self.values.len() - self.non_null_count()
    }
}

/// An ordered collection of named columns, as handed over by the loader.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// First column with the given name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column, AlignError> {
        self.column(name)
            .ok_or_else(|| AlignError::UnknownColumn(name.to_string()))
    }

    pub fn row_count(&self) -> usize {
        self.columns.iter().map(Column::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.row_count() == 0
    }

    /// Reject tables the pipeline cannot work with and report suspicious
    /// but usable structure as warnings.
    pub fn validate(&self) -> Result<Vec<AlignError>, AlignError> {
        if self.columns.is_empty() {
            return Err(AlignError::Data("table has no columns".into()));
        }
        if self.row_count() == 0 {
            return Err(AlignError::Data("table has no rows".into()));
        }

        let mut warnings = Vec::new();
        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                warnings.push(AlignError::Data(format!(
                    "duplicated column name '{}'",
                    column.name
                )));
            }
            if column.non_null_count() == 0 {
                warnings.push(AlignError::Data(format!(
                    "column '{}' contains only nulls",
                    column.name
                )));
            }
        }
        for warning in &warnings {
            warn!("{}", warning);
        }
        Ok(warnings)
    }
}
