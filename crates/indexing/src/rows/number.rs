//! Number rows.

use rust_decimal::Decimal;
use serde::Serialize;

use super::{RowGenerator, RowKey};
use crate::types::SearchValue;

/// Stored in place of a missing lower bound.
pub const LOW_SENTINEL: Decimal = Decimal::MIN;

/// Stored in place of a missing upper bound.
pub const HIGH_SENTINEL: Decimal = Decimal::MAX;

/// A number search row.
///
/// Points set `single_value` only. Ranges set `low_value` and `high_value`,
/// with sentinels in place of open ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NumberRow {
    /// Shared columns.
    #[serde(flatten)]
    pub key: RowKey,
    /// The value when low equals high.
    pub single_value: Option<Decimal>,
    /// Lower bound of a range.
    pub low_value: Option<Decimal>,
    /// Upper bound of a range.
    pub high_value: Option<Decimal>,
}

/// Splits bounds into a point or a sentinel-closed range.
///
/// Returns `None` when both ends are open.
pub(crate) fn point_or_range(
    low: Option<Decimal>,
    high: Option<Decimal>,
) -> Option<(Option<Decimal>, Option<Decimal>, Option<Decimal>)> {
    match (low, high) {
        (None, None) => None,
        (Some(low), Some(high)) if low == high => Some((Some(low), None, None)),
        (low, high) => Some((
            None,
            Some(low.unwrap_or(LOW_SENTINEL)),
            Some(high.unwrap_or(HIGH_SENTINEL)),
        )),
    }
}

/// Generates [`NumberRow`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberRowGenerator;

impl NumberRowGenerator {
    /// Creates a generator.
    pub fn new() -> Self {
        Self
    }
}

impl RowGenerator for NumberRowGenerator {
    type Row = NumberRow;

    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<NumberRow> {
        let SearchValue::Number { low, high } = value else {
            return None;
        };
        let (single_value, low_value, high_value) = point_or_range(*low, *high)?;

        Some(NumberRow {
            key,
            single_value,
            low_value,
            high_value,
        })
    }
}
