//! String rows.

use serde::Serialize;

use super::{RowGenerator, RowKey, split_indexed};
use crate::types::SearchValue;

/// A string search row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StringRow {
    /// Shared columns.
    #[serde(flatten)]
    pub key: RowKey,
    /// Indexed prefix.
    pub text: String,
    /// Full text when it does not fit in the indexed column.
    pub text_overflow: Option<String>,
    /// Lowest value of the parameter in the resource.
    pub is_min: bool,
    /// Highest value of the parameter in the resource.
    pub is_max: bool,
}

/// Generates [`StringRow`]s.
#[derive(Debug, Clone, Copy)]
pub struct StringRowGenerator {
    max_indexed_length: usize,
}

impl StringRowGenerator {
    /// Creates a generator with the indexed column width in characters.
    pub fn new(max_indexed_length: usize) -> Self {
        Self { max_indexed_length }
    }
}

impl RowGenerator for StringRowGenerator {
    type Row = StringRow;

    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<StringRow> {
        let SearchValue::String {
            text,
            is_min,
            is_max,
        } = value
        else {
            return None;
        };

        let (text, text_overflow) = split_indexed(text, self.max_indexed_length);
        Some(StringRow {
            key,
            text,
            text_overflow,
            is_min: *is_min,
            is_max: *is_max,
        })
    }

    fn dedup_key(&self, row: &StringRow) -> StringRow {
        StringRow {
            text: row.text.to_lowercase(),
            text_overflow: row.text_overflow.as_ref().map(|t| t.to_lowercase()),
            ..row.clone()
        }
    }
}
