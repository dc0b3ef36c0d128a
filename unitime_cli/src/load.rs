use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::debug;
use unitime::{Cell, Column, Table};

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const SNIFF_LINES: usize = 5;

/// Most frequent candidate delimiter over the first lines; comma when none
/// occurs. Earlier candidates win ties.
pub fn sniff_delimiter(text: &str) -> u8 {
    let head: Vec<&str> = text.lines().take(SNIFF_LINES).collect();
    let mut best = (b',', 0usize);
    for delim in DELIMITERS {
        let count: usize = head
            .iter()
            .map(|line| line.bytes().filter(|b| *b == delim).count())
            .sum();
        if count > best.1 {
            best = (delim, count);
        }
    }
    best.0
}

pub fn parse_table(text: &str) -> Result<Table> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let delimiter = sniff_delimiter(text);
    debug!("Using delimiter {:?}", delimiter as char);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .context("failed to read CSV header")?
        .clone();
    if headers.is_empty() {
        return Err(anyhow!("CSV has no header row"));
    }
    let mut values: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV record {}", line + 2))?;
        for (idx, column) in values.iter_mut().enumerate() {
            column.push(record.get(idx).map_or(Cell::Null, Cell::from_text));
        }
    }

    let columns = headers
        .iter()
        .zip(values)
        .enumerate()
        .map(|(idx, (name, cells))| {
            let name = if name.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                name.to_string()
            };
            Column::new(name, cells)
        })
        .collect();
    Ok(Table::new(columns))
}

pub fn load_table(path: &Path) -> Result<Table> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let table =
        parse_table(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    debug!(
        "Loaded {}: {} columns, {} rows",
        path.display(),
        table.columns().len(),
        table.row_count()
    );
    Ok(table)
}
