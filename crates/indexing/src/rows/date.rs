//! Date rows.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{RowGenerator, RowKey};
use crate::types::SearchValue;

/// A date search row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DateTimeRow {
    /// Shared columns.
    #[serde(flatten)]
    pub key: RowKey,
    /// First instant covered.
    pub start_date_time: DateTime<Utc>,
    /// Last instant covered.
    pub end_date_time: DateTime<Utc>,
    /// The range spans more than a day.
    pub is_long_span: bool,
    /// Earliest value of the parameter in the resource.
    pub is_min: bool,
    /// Latest value of the parameter in the resource.
    pub is_max: bool,
}

/// Generates [`DateTimeRow`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeRowGenerator;

impl DateTimeRowGenerator {
    /// Creates a generator.
    pub fn new() -> Self {
        Self
    }
}

impl RowGenerator for DateTimeRowGenerator {
    type Row = DateTimeRow;

    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<DateTimeRow> {
        let SearchValue::DateTime {
            start,
            end,
            is_min,
            is_max,
        } = value
        else {
            return None;
        };

        Some(DateTimeRow {
            key,
            start_date_time: *start,
            end_date_time: *end,
            is_long_span: *end - *start > Duration::days(1),
            is_min: *is_min,
            is_max: *is_max,
        })
    }
}
