use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::genealogy::model::Cell;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("row {row}: missing track id column '{column}'")]
    MissingTrackId { row: usize, column: String },
}

/// A field value as it came out of the tabular parser, before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl RawValue {
    /// Name of the runtime type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Number(_) => "number",
            RawValue::Text(_) => "string",
            RawValue::Bool(_) => "boolean",
            RawValue::Null => "null",
        }
    }
}

impl std::fmt::Display for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawValue::Number(n) => write!(f, "{n}"),
            RawValue::Text(s) => write!(f, "{s:?}"),
            RawValue::Bool(b) => write!(f, "{b}"),
            RawValue::Null => write!(f, "null"),
        }
    }
}

/// One untyped record: column name to value, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, RawValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: RawValue) {
        self.fields.push((column.into(), value));
    }

    /// Builder-style variant of [`RawRecord::push`].
    pub fn with(mut self, column: impl Into<String>, value: RawValue) -> Self {
        self.push(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&RawValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Names of the columns with special meaning in a cell table.
///
/// Every other column becomes a plain numeric or string attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderMap {
    pub time: String,
    pub track_id: String,
    pub parent_id: String,
    pub mass: String,
    pub frame: String,
    pub x: String,
    pub y: String,
}

impl Default for HeaderMap {
    fn default() -> Self {
        Self {
            time: "time".to_string(),
            track_id: "id".to_string(),
            parent_id: "parent".to_string(),
            mass: "mass".to_string(),
            frame: "frame".to_string(),
            x: "x".to_string(),
            y: "y".to_string(),
        }
    }
}

impl HeaderMap {
    /// All special column names, in a fixed order.
    pub fn special_columns(&self) -> [&str; 7] {
        [
            &self.time,
            &self.track_id,
            &self.parent_id,
            &self.mass,
            &self.frame,
            &self.x,
            &self.y,
        ]
    }

    pub fn is_special(&self, column: &str) -> bool {
        self.special_columns().contains(&column)
    }
}

/// Outcome of classifying a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    /// The value had a type that is neither number nor string.
    Dropped { type_name: &'static str },
}

/// Classify one field by its runtime type.
pub fn classify_field(value: &RawValue) -> FieldValue {
    match value {
        RawValue::Number(n) => FieldValue::Number(*n),
        RawValue::Text(s) => FieldValue::Text(s.clone()),
        other => FieldValue::Dropped {
            type_name: other.type_name(),
        },
    }
}

/// Render a value as an identifier string.
///
/// Integral numbers lose their fractional part so that a numeric `1` and the
/// text `"1"` produce the same id.
pub fn value_to_id(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Number(n) => Some(number_to_id(*n)),
        RawValue::Text(s) => Some(s.trim().to_string()),
        RawValue::Bool(_) | RawValue::Null => None,
    }
}

fn number_to_id(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Convert one raw record into a [`Cell`].
///
/// The track id column is extracted and not stored as an attribute. The parent
/// column is always stored as a string (empty when null). Values of any other
/// type than number or string are dropped with a warning.
pub fn classify_row(row: usize, record: &RawRecord, headers: &HeaderMap) -> Result<Cell, ClassifyError> {
    let track_id = record
        .get(&headers.track_id)
        .and_then(value_to_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ClassifyError::MissingTrackId {
            row,
            column: headers.track_id.clone(),
        })?;

    let mut attr_num = HashMap::new();
    let mut attr_str = HashMap::new();

    for (key, value) in record.iter() {
        if key == headers.track_id {
            continue;
        }

        if key == headers.parent_id {
            let parent = match value {
                RawValue::Null => Some(String::new()),
                other => value_to_id(other),
            };
            match parent {
                Some(parent) => {
                    attr_str.insert(key.to_string(), parent);
                }
                None => warn!(
                    row,
                    key,
                    value = %value,
                    value_type = value.type_name(),
                    "dropping parent value of unsupported type"
                ),
            }
            continue;
        }

        match classify_field(value) {
            FieldValue::Number(n) => {
                attr_num.insert(key.to_string(), n);
            }
            FieldValue::Text(s) => {
                attr_str.insert(key.to_string(), s);
            }
            FieldValue::Dropped { type_name } => {
                warn!(row, key, value = %value, value_type = type_name, "dropping field of unsupported type");
            }
        }
    }

    Ok(Cell {
        row_id: row,
        track_id,
        attr_num,
        attr_str,
    })
}
