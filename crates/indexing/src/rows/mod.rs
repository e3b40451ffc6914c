//! Storage rows for the bulk upsert.
//!
//! Each search value kind has a generator that turns one
//! [`SearchValue`] into at most one row. Generators decline (return `None`)
//! for values the kind cannot store, such as a token without a code.
//! [`RowBatch`] dispatches a resource's index entries to the generators and
//! deduplicates rows within one write batch.
//!
//! - [`string`], [`token`], [`number`], [`quantity`], [`date`],
//!   [`reference`], [`uri`] - single-kind generators
//! - [`composite`] - composite rows assembled from component rows
//! - [`resource`] - the compressed resource payload row
//! - [`surrogate`] - time-derived resource surrogate ids
//! - [`model`] - compact ids for resource types, parameters and systems
//! - [`batch`] - per-batch assembly and deduplication

use std::collections::HashSet;
use std::hash::Hash;

use serde::Serialize;

use crate::types::SearchValue;

pub mod batch;
pub mod composite;
pub mod date;
pub mod model;
pub mod number;
pub mod quantity;
pub mod reference;
pub mod resource;
pub mod string;
pub mod surrogate;
pub mod token;
pub mod uri;

pub use batch::{BatchRows, RowBatch};
pub use composite::{CompositeRow, CompositeRowGenerator, CompositeShape};
pub use date::{DateTimeRow, DateTimeRowGenerator};
pub use model::{InMemoryModelIds, ModelIdResolver};
pub use number::{NumberRow, NumberRowGenerator};
pub use quantity::{QuantityRow, QuantityRowGenerator};
pub use reference::{ReferenceRow, ReferenceRowGenerator};
pub use resource::{ResourceRecord, ResourceRow, ResourceRowGenerator, ResourceWriteOptions};
pub use string::{StringRow, StringRowGenerator};
pub use surrogate::SurrogateIdGenerator;
pub use token::{TokenRow, TokenRowGenerator, TokenTextRow, TokenTextRowGenerator};
pub use uri::{UriRow, UriRowGenerator};

/// Search parameter id given to composite component rows.
pub const COMPOSITE_COMPONENT_PARAM_ID: i16 = 0;

/// Columns shared by every search row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RowKey {
    /// Resource type id.
    pub resource_type_id: i16,
    /// Resource surrogate id.
    pub resource_surrogate_id: i64,
    /// Search parameter id.
    pub search_param_id: i16,
}

impl RowKey {
    /// Creates a key.
    pub fn new(resource_type_id: i16, resource_surrogate_id: i64, search_param_id: i16) -> Self {
        Self {
            resource_type_id,
            resource_surrogate_id,
            search_param_id,
        }
    }

    /// Returns the key used for intermediate composite component rows.
    pub fn component(self) -> Self {
        Self {
            search_param_id: COMPOSITE_COMPONENT_PARAM_ID,
            ..self
        }
    }
}

/// Turns one search value into one storage row.
pub trait RowGenerator: Send + Sync {
    /// Row type produced.
    type Row: Clone + Eq + Hash;

    /// Builds the row, or `None` if the value cannot be stored by this kind.
    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<Self::Row>;

    /// Returns the value the batch deduplicates on.
    fn dedup_key(&self, row: &Self::Row) -> Self::Row {
        row.clone()
    }

    /// Builds the row and records it in `seen`.
    ///
    /// Returns `None` if the generator declines or an equivalent row was
    /// already recorded.
    fn generate(
        &self,
        key: RowKey,
        value: &SearchValue,
        seen: Option<&mut HashSet<Self::Row>>,
    ) -> Option<Self::Row> {
        let row = self.try_generate(key, value)?;
        match seen {
            Some(seen) => {
                if !seen.insert(self.dedup_key(&row)) {
                    None
                } else {
                    Some(row)
                }
            }
            None => Some(row),
        }
    }
}

/// Splits text into its indexed prefix and overflow.
///
/// When `text` is longer than `max_len` characters the prefix holds exactly
/// `max_len` characters and the overflow holds the whole of `text`.
pub fn split_indexed(text: &str, max_len: usize) -> (String, Option<String>) {
    match text.char_indices().nth(max_len) {
        Some((end, _)) => (text[..end].to_string(), Some(text.to_string())),
        None => (text.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_indexed() {
        assert_eq!(split_indexed("short", 10), ("short".to_string(), None));
        assert_eq!(split_indexed("exact", 5), ("exact".to_string(), None));
        assert_eq!(
            split_indexed("overflowing", 4),
            ("over".to_string(), Some("overflowing".to_string()))
        );
    }

    #[test]
    fn test_split_indexed_counts_characters() {
        let (prefix, overflow) = split_indexed("Ærøskøbing", 3);
        assert_eq!(prefix, "Ærø");
        assert_eq!(prefix.chars().count(), 3);
        assert_eq!(overflow.as_deref(), Some("Ærøskøbing"));
    }

    #[test]
    fn test_component_key() {
        let key = RowKey::new(1, 42, 7);
        assert_eq!(key.component(), RowKey::new(1, 42, COMPOSITE_COMPONENT_PARAM_ID));
    }
}
