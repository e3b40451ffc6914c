//! Reference rows.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::model::ModelIdResolver;
use super::{RowGenerator, RowKey};
use crate::types::SearchValue;

/// A reference search row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ReferenceRow {
    /// Shared columns.
    #[serde(flatten)]
    pub key: RowKey,
    /// Service base of an absolute reference.
    pub base_uri: Option<String>,
    /// Target resource type id.
    pub reference_resource_type_id: Option<i16>,
    /// Target resource id, cut to the column width.
    pub reference_resource_id: String,
    /// Target version.
    pub reference_resource_version: Option<i32>,
}

/// Generates [`ReferenceRow`]s.
///
/// Target ids longer than the column are cut to fit. The cut is lossy and
/// logged; existing rows depend on it, so it is kept as is.
#[derive(Clone)]
pub struct ReferenceRowGenerator {
    ids: Arc<dyn ModelIdResolver>,
    max_id_length: usize,
}

impl ReferenceRowGenerator {
    /// Creates a generator.
    pub fn new(ids: Arc<dyn ModelIdResolver>, max_id_length: usize) -> Self {
        Self { ids, max_id_length }
    }
}

impl RowGenerator for ReferenceRowGenerator {
    type Row = ReferenceRow;

    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<ReferenceRow> {
        let SearchValue::Reference {
            base_uri,
            resource_type,
            resource_id,
            version,
        } = value
        else {
            return None;
        };
        if resource_id.is_empty() {
            return None;
        }

        let reference_resource_id = match resource_id.char_indices().nth(self.max_id_length) {
            Some((end, _)) => {
                warn!(
                    resource_id = %resource_id,
                    max_length = self.max_id_length,
                    "Truncating reference target id"
                );
                resource_id[..end].to_string()
            }
            None => resource_id.clone(),
        };

        Some(ReferenceRow {
            key,
            base_uri: base_uri.clone(),
            reference_resource_type_id: resource_type
                .as_deref()
                .and_then(|rt| self.ids.resource_type_id(rt)),
            reference_resource_id,
            reference_resource_version: version.as_deref().and_then(|v| v.parse().ok()),
        })
    }
}

impl std::fmt::Debug for ReferenceRowGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceRowGenerator")
            .field("max_id_length", &self.max_id_length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::model::InMemoryModelIds;

    const KEY: RowKey = RowKey {
        resource_type_id: 2,
        resource_surrogate_id: 100,
        search_param_id: 6,
    };

    fn generator(max_id_length: usize) -> ReferenceRowGenerator {
        let ids = InMemoryModelIds::new().with_resource_types(["Patient", "Observation"]);
        ReferenceRowGenerator::new(Arc::new(ids), max_id_length)
    }

    #[test]
    fn test_reference_row() {
        let value = SearchValue::reference("http://example.org/fhir/Patient/p1/_history/3").unwrap();
        let row = generator(64).try_generate(KEY, &value).unwrap();
        assert_eq!(row.base_uri.as_deref(), Some("http://example.org/fhir/"));
        assert_eq!(row.reference_resource_type_id, Some(1));
        assert_eq!(row.reference_resource_id, "p1");
        assert_eq!(row.reference_resource_version, Some(3));
    }

    #[test]
    fn test_long_id_truncated() {
        let value = SearchValue::reference("Patient/abcdefghij").unwrap();
        let row = generator(4).try_generate(KEY, &value).unwrap();
        assert_eq!(row.reference_resource_id, "abcd");
    }

    #[test]
    fn test_unknown_target_type() {
        let value = SearchValue::reference("Spaceship/s1").unwrap();
        let row = generator(64).try_generate(KEY, &value).unwrap();
        assert_eq!(row.reference_resource_type_id, None);
    }
}
