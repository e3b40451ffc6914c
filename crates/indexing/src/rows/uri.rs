//! URI rows.

use serde::Serialize;

use super::{RowGenerator, RowKey};
use crate::types::SearchValue;

/// A URI search row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UriRow {
    /// Shared columns.
    #[serde(flatten)]
    pub key: RowKey,
    /// The URI.
    pub uri: String,
}

/// Generates [`UriRow`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct UriRowGenerator;

impl UriRowGenerator {
    /// Creates a generator.
    pub fn new() -> Self {
        Self
    }
}

impl RowGenerator for UriRowGenerator {
    type Row = UriRow;

    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<UriRow> {
        match value {
            SearchValue::Uri { uri } if !uri.is_empty() => Some(UriRow {
                key,
                uri: uri.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_uri_rows_dedup_exactly() {
        let key = RowKey::new(1, 100, 8);
        let mut seen = HashSet::new();
        let profile = SearchValue::uri("http://hl7.org/fhir/StructureDefinition/vitalsigns");

        assert!(UriRowGenerator.generate(key, &profile, Some(&mut seen)).is_some());
        assert!(UriRowGenerator.generate(key, &profile, Some(&mut seen)).is_none());
        assert!(UriRowGenerator.try_generate(key, &SearchValue::uri("")).is_none());
    }
}
