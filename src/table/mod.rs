pub mod classify;
pub mod reader;

pub use classify::{ClassifyError, FieldValue, HeaderMap, RawRecord, RawValue, classify_field, classify_row};
pub use reader::{Table, TableReader};
