//! Quantity rows.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use super::model::ModelIdResolver;
use super::number::point_or_range;
use super::{RowGenerator, RowKey};
use crate::types::SearchValue;

/// A quantity search row, laid out like a number row plus unit ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QuantityRow {
    /// Shared columns.
    #[serde(flatten)]
    pub key: RowKey,
    /// Unit system id.
    pub system_id: Option<i32>,
    /// Unit code id.
    pub quantity_code_id: Option<i32>,
    /// The value when low equals high.
    pub single_value: Option<Decimal>,
    /// Lower bound of a range.
    pub low_value: Option<Decimal>,
    /// Upper bound of a range.
    pub high_value: Option<Decimal>,
}

/// Generates [`QuantityRow`]s.
#[derive(Clone)]
pub struct QuantityRowGenerator {
    ids: Arc<dyn ModelIdResolver>,
}

impl QuantityRowGenerator {
    /// Creates a generator.
    pub fn new(ids: Arc<dyn ModelIdResolver>) -> Self {
        Self { ids }
    }
}

impl RowGenerator for QuantityRowGenerator {
    type Row = QuantityRow;

    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<QuantityRow> {
        let SearchValue::Quantity {
            system,
            code,
            low,
            high,
        } = value
        else {
            return None;
        };
        let (single_value, low_value, high_value) = point_or_range(*low, *high)?;

        Some(QuantityRow {
            key,
            system_id: system.as_deref().map(|s| self.ids.system_id(s)),
            quantity_code_id: code.as_deref().map(|c| self.ids.quantity_code_id(c)),
            single_value,
            low_value,
            high_value,
        })
    }
}

impl std::fmt::Debug for QuantityRowGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuantityRowGenerator").finish_non_exhaustive()
    }
}
