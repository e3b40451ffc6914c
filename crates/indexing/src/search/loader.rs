//! SearchParameter Loader.
//!
//! Parses FHIR `SearchParameter` resources into definitions. Input may be a
//! single resource, a JSON array of resources, or a Bundle. A small set of
//! core parameters is embedded in the crate and always available.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::types::SearchParamType;

use super::errors::LoaderError;
use super::registry::{
    CompositeComponentDef, RESOURCE_TYPE_PARAMETER_URL, SearchParameterDefinition,
    SearchParameterSource, SearchParameterStatus, SortParameterStatus,
};

/// Returns the parameters every resource type supports.
pub fn core_parameters() -> Vec<SearchParameterDefinition> {
    let core = |url: &str, code: &str, param_type: SearchParamType, expression: &str| {
        SearchParameterDefinition::new(url, code, param_type, expression)
            .with_base(["Resource"])
            .with_source(SearchParameterSource::Embedded)
    };

    vec![
        core(
            "http://hl7.org/fhir/SearchParameter/Resource-id",
            "_id",
            SearchParamType::Token,
            "Resource.id",
        )
        .with_sort_status(SortParameterStatus::Enabled),
        core(
            "http://hl7.org/fhir/SearchParameter/Resource-lastUpdated",
            "_lastUpdated",
            SearchParamType::Date,
            "Resource.meta.lastUpdated",
        )
        .with_sort_status(SortParameterStatus::Enabled),
        core(
            RESOURCE_TYPE_PARAMETER_URL,
            "_type",
            SearchParamType::Token,
            "Resource.resourceType",
        ),
        core(
            "http://hl7.org/fhir/SearchParameter/Resource-tag",
            "_tag",
            SearchParamType::Token,
            "Resource.meta.tag",
        ),
        core(
            "http://hl7.org/fhir/SearchParameter/Resource-profile",
            "_profile",
            SearchParamType::Uri,
            "Resource.meta.profile",
        ),
        core(
            "http://hl7.org/fhir/SearchParameter/Resource-security",
            "_security",
            SearchParamType::Token,
            "Resource.meta.security",
        ),
    ]
}

/// Loader for SearchParameter definitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchParameterLoader;

impl SearchParameterLoader {
    /// Creates a new loader.
    pub fn new() -> Self {
        Self
    }

    /// Loads SearchParameter resources from a Bundle, array, or single resource.
    ///
    /// Entries that are not SearchParameters are ignored.
    pub fn load_from_json(
        &self,
        json: &Value,
    ) -> Result<Vec<SearchParameterDefinition>, LoaderError> {
        let is_search_parameter =
            |v: &Value| v.get("resourceType").and_then(|t| t.as_str()) == Some("SearchParameter");

        let mut params = Vec::new();

        // Bundle
        if let Some(entries) = json.get("entry").and_then(|e| e.as_array()) {
            for resource in entries.iter().filter_map(|e| e.get("resource")) {
                if is_search_parameter(resource) {
                    params.push(self.parse_resource(resource)?);
                }
            }
        }
        // Array of SearchParameter resources
        else if let Some(array) = json.as_array() {
            for item in array.iter().filter(|i| is_search_parameter(i)) {
                params.push(self.parse_resource(item)?);
            }
        }
        // Single SearchParameter
        else if is_search_parameter(json) {
            params.push(self.parse_resource(json)?);
        }

        debug!(count = params.len(), "Loaded SearchParameter definitions");
        Ok(params)
    }

    /// Loads SearchParameter resources from a JSON file.
    pub fn load_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<SearchParameterDefinition>, LoaderError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| LoaderError::FileLoadFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        let json: Value =
            serde_json::from_str(&content).map_err(|e| LoaderError::FileLoadFailed {
                path: path.display().to_string(),
                message: format!("Invalid JSON: {}", e),
            })?;

        self.load_from_json(&json)
    }

    /// Parses a SearchParameter FHIR resource into a definition.
    pub fn parse_resource(
        &self,
        resource: &Value,
    ) -> Result<SearchParameterDefinition, LoaderError> {
        let url = resource
            .get("url")
            .and_then(|v| v.as_str())
            .map(String::from);

        let code = resource
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoaderError::MissingField {
                field: "code".to_string(),
                url: url.clone(),
            })?
            .to_string();

        let type_str = resource
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoaderError::MissingField {
                field: "type".to_string(),
                url: url.clone(),
            })?;

        let param_type =
            type_str
                .parse::<SearchParamType>()
                .map_err(|_| LoaderError::UnknownType {
                    type_code: type_str.to_string(),
                    url: url.clone(),
                })?;

        let expression = resource
            .get("expression")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        // Composite and special parameters may omit the expression
        if expression.is_empty()
            && !matches!(
                param_type,
                SearchParamType::Composite | SearchParamType::Special
            )
            && !code.starts_with('_')
        {
            return Err(LoaderError::MissingField {
                field: "expression".to_string(),
                url,
            });
        }

        let strings = |field: &str| -> Option<Vec<String>> {
            resource.get(field).and_then(|v| v.as_array()).map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
        };

        let base = strings("base").unwrap_or_default();
        if base.is_empty() {
            return Err(LoaderError::MissingField {
                field: "base".to_string(),
                url,
            });
        }

        let status = resource
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(SearchParameterStatus::from_fhir_status)
            .unwrap_or(SearchParameterStatus::Active);

        let component = self.parse_components(resource, url.as_deref())?;

        let mut def = SearchParameterDefinition::anonymous(code, param_type, expression)
            .with_base(base)
            .with_status(status)
            .with_sort_status(default_sort_status(param_type));
        def.url = url;
        def.target = strings("target");
        def.component = component;
        def.name = resource
            .get("name")
            .and_then(|v| v.as_str())
            .map(String::from);
        def.description = resource
            .get("description")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(def)
    }

    /// Parses composite components from a SearchParameter resource.
    fn parse_components(
        &self,
        resource: &Value,
        url: Option<&str>,
    ) -> Result<Vec<CompositeComponentDef>, LoaderError> {
        let Some(components) = resource.get("component").and_then(|v| v.as_array()) else {
            return Ok(Vec::new());
        };

        components
            .iter()
            .map(|comp| {
                let definition = comp
                    .get("definition")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| LoaderError::InvalidResource {
                        message: "Composite component missing definition".to_string(),
                        url: url.map(String::from),
                    })?
                    .to_string();

                let expression = comp
                    .get("expression")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();

                Ok(CompositeComponentDef {
                    definition,
                    expression,
                })
            })
            .collect()
    }
}

/// String and date parameters are sortable out of the box; number, quantity
/// and token parameters can be enabled once reindexed.
fn default_sort_status(param_type: SearchParamType) -> SortParameterStatus {
    match param_type {
        SearchParamType::String | SearchParamType::Date => SortParameterStatus::Enabled,
        SearchParamType::Number | SearchParamType::Quantity | SearchParamType::Token => {
            SortParameterStatus::Supported
        }
        _ => SortParameterStatus::Disabled,
    }
}
