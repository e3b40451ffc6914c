//! Search index extraction.
//!
//! [`SearchIndexer`] evaluates every applicable search parameter against a
//! resource and produces [`SearchIndexEntry`] facts. A parameter that fails
//! to evaluate or convert is logged and skipped; one bad definition never
//! blocks a resource write.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::converters::ConverterRegistry;
use super::errors::ExtractionError;
use super::evaluator::{ExpressionEvaluator, TypedElement};
use super::registry::{SearchParameterDefinition, SearchParameterDefinitionSource};
use crate::types::{SearchParamType, SearchValue};

/// One indexed fact: a parameter and a value extracted for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchIndexEntry {
    /// The parameter the value was extracted for.
    pub definition: Arc<SearchParameterDefinition>,
    /// The extracted value.
    pub value: SearchValue,
}

impl SearchIndexEntry {
    /// Creates a new entry.
    pub fn new(definition: Arc<SearchParameterDefinition>, value: SearchValue) -> Self {
        Self { definition, value }
    }
}

/// Extracts search index entries from resources.
pub struct SearchIndexer {
    definitions: Arc<dyn SearchParameterDefinitionSource>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    converters: ConverterRegistry,
}

impl SearchIndexer {
    /// Creates an indexer over a definition source and an evaluator.
    pub fn new(
        definitions: Arc<dyn SearchParameterDefinitionSource>,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Self {
        Self {
            definitions,
            evaluator,
            converters: ConverterRegistry::new(),
        }
    }

    /// Extracts every index entry for a resource.
    ///
    /// Fails only when the input is not a resource at all.
    pub fn extract(&self, resource: &Value) -> Result<Vec<SearchIndexEntry>, ExtractionError> {
        let resource_type = resource
            .as_object()
            .and_then(|obj| obj.get("resourceType"))
            .and_then(Value::as_str)
            .ok_or_else(|| ExtractionError::InvalidResource {
                message: "resource must be a JSON object with a resourceType".to_string(),
            })?;

        let mut entries = Vec::new();

        for def in self.definitions.definitions_for(resource_type) {
            // The type is stored on every row; no fact is needed
            if def.is_resource_type_parameter() || !def.is_supported {
                continue;
            }

            let result = if def.is_composite() {
                self.extract_composite(resource, &def)
            } else {
                self.extract_simple(resource, &def)
            };

            match result {
                Ok(values) => entries.extend(
                    values
                        .into_iter()
                        .map(|value| SearchIndexEntry::new(Arc::clone(&def), value)),
                ),
                Err(e) => {
                    warn!(
                        resource_type = %resource_type,
                        param = %def.code,
                        error = %e,
                        "Skipping search parameter"
                    );
                }
            }
        }

        mark_sort_extremes(&mut entries);

        debug!(
            resource_type = %resource_type,
            count = entries.len(),
            "Extracted search index entries"
        );
        Ok(entries)
    }

    fn evaluate(
        &self,
        context: &Value,
        def: &SearchParameterDefinition,
        expression: &str,
    ) -> Result<Vec<TypedElement>, ExtractionError> {
        self.evaluator
            .evaluate(context, expression)
            .map_err(|e| ExtractionError::EvaluationFailed {
                param_name: def.code.clone(),
                expression: expression.to_string(),
                error: e.message,
            })
    }

    /// Converts evaluated elements for a parameter kind. Elements without a
    /// converter are logged and skipped.
    fn convert(
        &self,
        def: &SearchParameterDefinition,
        param_type: SearchParamType,
        elements: Vec<TypedElement>,
    ) -> Result<Vec<SearchValue>, ExtractionError> {
        let mut values = Vec::new();

        for element in elements {
            let Some(converter) = self.converters.lookup(element.element_type, param_type) else {
                let e = ExtractionError::UnsupportedType {
                    param_name: def.code.clone(),
                    value_type: element.element_type.to_string(),
                };
                warn!(error = %e, "No converter for element");
                continue;
            };

            match converter.convert(&element.value) {
                Ok(converted) => values.extend(converted),
                Err(actual_value) => {
                    let e = ExtractionError::ConversionFailed {
                        param_name: def.code.clone(),
                        expected_type: param_type.to_string(),
                        actual_value,
                    };
                    warn!(converter = converter.name, error = %e, "Conversion failed");
                }
            }
        }

        Ok(values)
    }

    fn extract_simple(
        &self,
        resource: &Value,
        def: &SearchParameterDefinition,
    ) -> Result<Vec<SearchValue>, ExtractionError> {
        if def.expression.is_empty() {
            return Ok(Vec::new());
        }

        let elements = self.evaluate(resource, def, &def.expression)?;
        let mut values = self.convert(def, def.param_type, elements)?;

        if def.param_type == SearchParamType::Reference {
            if let Some(targets) = def.target.as_ref().filter(|t| !t.is_empty()) {
                // Path expressions cannot always restrict the target type
                values.retain(|value| {
                    let reference = value.to_string();
                    targets.iter().any(|t| reference.contains(t.as_str()))
                });
            }
        }

        Ok(values)
    }

    fn extract_composite(
        &self,
        resource: &Value,
        def: &SearchParameterDefinition,
    ) -> Result<Vec<SearchValue>, ExtractionError> {
        let components = def
            .component
            .iter()
            .map(|component| {
                self.definitions
                    .resolve(&component.definition)
                    .map(|resolved| (resolved, component.expression.as_str()))
                    .map_err(|_| ExtractionError::UnresolvedComponent {
                        param_name: def.code.clone(),
                        component_url: component.definition.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let roots = self.evaluate(resource, def, &def.expression)?;
        let mut values = Vec::new();

        'roots: for root in roots {
            let mut lists = Vec::with_capacity(components.len());

            for (component_def, expression) in &components {
                let converted = self
                    .evaluate(&root.value, component_def, expression)
                    .and_then(|elements| {
                        self.convert(component_def, component_def.param_type, elements)
                    });
                let list: Vec<SearchValue> = match converted {
                    Ok(list) => list
                        .into_iter()
                        .filter(SearchValue::is_valid_as_composite_component)
                        .collect(),
                    Err(e) => {
                        warn!(param = %def.code, error = %e, "Skipping composite root");
                        continue 'roots;
                    }
                };

                if list.is_empty() {
                    continue 'roots;
                }
                lists.push(list);
            }

            values.push(SearchValue::Composite { components: lists });
        }

        Ok(values)
    }
}

impl std::fmt::Debug for SearchIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndexer").finish_non_exhaustive()
    }
}

/// Ordering key of a value for `_sort`.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Text(String),
    Instant(chrono::DateTime<chrono::Utc>),
}

/// Returns the keys a value sorts by ascending and descending.
fn sort_keys(value: &SearchValue) -> Option<(SortKey, SortKey)> {
    match value {
        SearchValue::String { text, .. } => {
            let text = text.to_lowercase();
            Some((SortKey::Text(text.clone()), SortKey::Text(text)))
        }
        SearchValue::DateTime { start, end, .. } => {
            Some((SortKey::Instant(*start), SortKey::Instant(*end)))
        }
        _ => None,
    }
}

/// Flags the lowest and highest String and DateTime values of each
/// parameter. Values tied for an extreme are all flagged.
fn mark_sort_extremes(entries: &mut [SearchIndexEntry]) {
    let mut by_param: HashMap<String, Vec<(usize, SortKey, SortKey)>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if let Some((low, high)) = sort_keys(&entry.value) {
            by_param
                .entry(entry.definition.identity().to_string())
                .or_default()
                .push((i, low, high));
        }
    }

    for keyed in by_param.values() {
        let (Some(min), Some(max)) = (
            keyed.iter().map(|(_, low, _)| low).min(),
            keyed.iter().map(|(_, _, high)| high).max(),
        ) else {
            continue;
        };

        for (i, low, high) in keyed {
            if let SearchValue::String { is_min, is_max, .. }
            | SearchValue::DateTime { is_min, is_max, .. } = &mut entries[*i].value
            {
                *is_min = low == min;
                *is_max = high == max;
            }
        }
    }
}
