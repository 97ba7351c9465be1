use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

use crate::table::classify::{RawRecord, RawValue};

/// Rows of a parsed cell table, in source order, with the ordered column list.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<RawRecord>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reader for delimited cell tables.
///
/// Fields are typed dynamically: empty fields become null, `true`/`false`
/// become booleans, anything that parses as a finite number becomes a number
/// and everything else is kept as text.
pub struct TableReader;

impl TableReader {
    /// Read a CSV file with a header row.
    pub fn read_csv(path: &Path) -> Result<Table> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open table: {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("failed to parse table: {}", path.display()))
    }

    /// Read CSV data from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Table> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = csv_reader
            .headers()
            .context("failed to read header row")?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (index, result) in csv_reader.records().enumerate() {
            let record = result.with_context(|| format!("failed to read row {index}"))?;
            let mut row = RawRecord::new();
            for (column, field) in columns.iter().zip(record.iter()) {
                row.push(column.clone(), parse_field(field));
            }
            rows.push(row);
        }

        Ok(Table { columns, rows })
    }
}

/// Give a single text field its dynamic type.
pub fn parse_field(field: &str) -> RawValue {
    if field.is_empty() {
        return RawValue::Null;
    }
    match field {
        "true" | "TRUE" | "True" => return RawValue::Bool(true),
        "false" | "FALSE" | "False" => return RawValue::Bool(false),
        _ => {}
    }
    match field.parse::<f64>() {
        Ok(n) if n.is_finite() => RawValue::Number(n),
        _ => RawValue::Text(field.to_string()),
    }
}
