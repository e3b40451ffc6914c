//! Query compilation.
//!
//! [`SearchOptionsFactory`] turns the raw key/value pairs of a search request
//! into [`SearchOptions`]. Parameters are processed in request order with a
//! fixed set of special cases:
//!
//! 1. `ct` - continuation token, at most once; disables the default total
//! 2. `_format`, `_pretty` - ignored
//! 3. `_type` - unknown types are dropped with a warning; if none are known
//!    the raw value is kept so the filter matches nothing
//! 4. empty key or value - unsupported
//! 5. `_text` - unsupported
//! 6. `_total` - `estimate` is rejected, anything else disables the default
//! 7. everything else - syntactic validation, then the expression parser
//!
//! Unsupported parameters and sort keys become warnings, or a
//! [`SearchError::BadRequest`] in strict mode.

use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use super::expression::Expression;
use super::options::{IncludeExpression, SearchIssue, SearchOptions};
use super::params::{ControlParameter, IncludeRequest, SearchParameterValidator};
use super::parser::{DefaultExpressionParser, ParseOutcome, SearchExpressionParser};
use super::registry::{RESOURCE, SearchParameterDefinitionSource};
use super::sort::{DefaultSortingValidator, SortingValidator};
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::types::{
    Base64ContinuationTokenCodec, ContinuationTokenCodec, SearchParamType, SortDirective,
    SummaryMode, TotalMode,
};

/// Continuation token parameter.
pub const CONTINUATION_TOKEN: &str = "ct";

/// Resource type filter parameter.
pub const TYPE: &str = "_type";

/// Resource types that define compartments.
pub const COMPARTMENT_TYPES: [&str; 5] =
    ["Patient", "Encounter", "RelatedPerson", "Practitioner", "Device"];

/// A search request as received.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Type segment of the URL, `None` for a system-level search.
    pub resource_type: Option<String>,
    /// Compartment type and owner id.
    pub compartment: Option<(String, String)>,
    /// Query parameters in request order.
    pub query_parameters: Vec<(String, String)>,
    /// Strict handling; `None` uses the configured default.
    pub strict: Option<bool>,
    /// Background (`Prefer: respond-async`) request.
    pub is_async: bool,
}

impl SearchRequest {
    /// Creates a system-level search.
    pub fn system() -> Self {
        Self::default()
    }

    /// Creates a search over one resource type.
    pub fn for_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Self::default()
        }
    }

    /// Restricts the search to a compartment.
    pub fn with_compartment(
        mut self,
        compartment_type: impl Into<String>,
        compartment_id: impl Into<String>,
    ) -> Self {
        self.compartment = Some((compartment_type.into(), compartment_id.into()));
        self
    }

    /// Adds one query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_parameters.push((key.into(), value.into()));
        self
    }

    /// Adds every parameter of a URL-encoded query string.
    pub fn with_query(mut self, query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        self.query_parameters.extend(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
        self
    }

    /// Sets strict handling.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Marks the request as a background operation.
    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }
}

/// Compiles search requests.
pub struct SearchOptionsFactory {
    definitions: Arc<dyn SearchParameterDefinitionSource>,
    parser: Arc<dyn SearchExpressionParser>,
    sorting_validator: Arc<dyn SortingValidator>,
    token_codec: Arc<dyn ContinuationTokenCodec>,
    validator: SearchParameterValidator,
    config: SearchConfig,
}

impl SearchOptionsFactory {
    /// Creates a factory with an injected expression parser.
    pub fn new(
        definitions: Arc<dyn SearchParameterDefinitionSource>,
        parser: Arc<dyn SearchExpressionParser>,
        config: SearchConfig,
    ) -> Self {
        Self {
            definitions,
            parser,
            sorting_validator: Arc::new(DefaultSortingValidator::new()),
            token_codec: Arc::new(Base64ContinuationTokenCodec),
            validator: SearchParameterValidator::new(),
            config,
        }
    }

    /// Creates a factory using [`DefaultExpressionParser`].
    pub fn with_defaults(
        definitions: Arc<dyn SearchParameterDefinitionSource>,
        config: SearchConfig,
    ) -> Self {
        let parser = Arc::new(DefaultExpressionParser::new(Arc::clone(&definitions)));
        Self::new(definitions, parser, config)
    }

    /// Replaces the sort eligibility check.
    pub fn with_sorting_validator(mut self, validator: Arc<dyn SortingValidator>) -> Self {
        self.sorting_validator = validator;
        self
    }

    /// Replaces the continuation token codec.
    pub fn with_token_codec(mut self, codec: Arc<dyn ContinuationTokenCodec>) -> Self {
        self.token_codec = codec;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Compiles a search request.
    pub fn create(&self, request: &SearchRequest) -> Result<SearchOptions, SearchError> {
        let strict = request.strict.unwrap_or(self.config.strict_handling);

        let mut continuation_token = None;
        let mut requested_total = None;
        let mut count = None;
        let mut summary = None;
        let mut elements = Vec::new();
        let mut sort_requests: Vec<SortDirective> = Vec::new();
        let mut include_requests: Vec<(String, String, IncludeRequest)> = Vec::new();
        let mut search_params: Vec<(String, String)> = Vec::new();
        let mut unsupported: Vec<(String, String)> = Vec::new();
        let mut issues = Vec::new();

        for (key, value) in &request.query_parameters {
            if key == CONTINUATION_TOKEN {
                if continuation_token.is_some() {
                    return Err(SearchError::invalid_operation(
                        "Only one continuation token may be given",
                    ));
                }
                continuation_token = Some(self.token_codec.decode(value)?);
                continue;
            }

            if key == "_format" || key == "_pretty" {
                continue;
            }

            if key == TYPE && !value.is_empty() {
                let (known, unknown): (Vec<&str>, Vec<&str>) = value
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .partition(|t| self.definitions.is_known_resource_type(t));

                let filter = if unknown.is_empty() {
                    value.clone()
                } else {
                    issues.push(SearchIssue::warning(format!(
                        "Resource types not supported: {}",
                        unknown.join(", ")
                    )));
                    // Keep the raw value so an all-unknown filter matches nothing
                    if known.is_empty() {
                        value.clone()
                    } else {
                        known.join(",")
                    }
                };
                search_params.push((key.clone(), filter));
                continue;
            }

            if key.is_empty() || value.is_empty() {
                unsupported.push((key.clone(), value.clone()));
                continue;
            }

            if key == "_text" {
                unsupported.push((key.clone(), value.clone()));
                continue;
            }

            if key == "_total" {
                let mode = TotalMode::from_str(value).map_err(SearchError::bad_request)?;
                if mode == TotalMode::Estimate {
                    return Err(SearchError::SearchOperationNotSupported {
                        message: "_total=estimate is not supported".to_string(),
                    });
                }
                requested_total = Some(mode);
                continue;
            }

            match self.validator.validate(key, value)? {
                Some(ControlParameter::Count(n)) => count = Some(n),
                Some(ControlParameter::Sort(directives)) => sort_requests.extend(directives),
                Some(ControlParameter::Summary(mode)) => summary = Some(mode),
                Some(ControlParameter::Elements(names)) => elements = names,
                Some(ControlParameter::Include(include)) => {
                    include_requests.push((key.clone(), value.clone(), include))
                }
                None => search_params.push((key.clone(), value.clone())),
            }
        }

        if !elements.is_empty() && summary.is_some_and(|m| m != SummaryMode::False) {
            return Err(SearchError::bad_request(
                "_elements and _summary cannot be used together",
            ));
        }

        let max_item_count = match count {
            Some(n) if n > self.config.max_item_count && !request.is_async => {
                debug!(requested = n, max = self.config.max_item_count, "Clamping _count");
                issues.push(SearchIssue::information(format!(
                    "_count={} exceeds the maximum of {}; {} used instead",
                    n, self.config.max_item_count, self.config.max_item_count
                )));
                self.config.max_item_count
            }
            Some(n) => n,
            None => self.config.default_item_count,
        };

        let count_only = count == Some(0) || summary == Some(SummaryMode::Count);

        let include_total = match requested_total {
            Some(mode) => mode,
            None if count_only => TotalMode::Accurate,
            None if continuation_token.is_some() => TotalMode::None,
            None => self.config.include_total,
        };

        let mut filters = Vec::new();

        let resource_types = match &request.resource_type {
            Some(rt) => {
                if !self.definitions.is_known_resource_type(rt) {
                    return Err(SearchError::resource_type_not_supported(rt.as_str()));
                }
                let types = vec![rt.clone()];
                if let ParseOutcome::Supported(expr) = self.parser.parse(&types, TYPE, rt)? {
                    filters.push(expr);
                }
                types
            }
            None => {
                // Modified `_type` (e.g. `:not`) cannot narrow the type set
                let mut types: Vec<String> = Vec::new();
                for (_, value) in search_params.iter().filter(|(k, _)| k == TYPE) {
                    for t in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                        if !types.iter().any(|existing| existing == t) {
                            types.push(t.to_string());
                        }
                    }
                }
                if types.is_empty() {
                    types.push(RESOURCE.to_string());
                }
                types
            }
        };

        if let Some((compartment_type, compartment_id)) = &request.compartment {
            if !COMPARTMENT_TYPES.contains(&compartment_type.as_str()) {
                return Err(SearchError::invalid_operation(format!(
                    "Compartment type '{}' is not valid",
                    compartment_type
                )));
            }
            if compartment_id.trim().is_empty() {
                return Err(SearchError::invalid_operation("Compartment id is blank"));
            }
            filters.push(Expression::Compartment {
                compartment_type: compartment_type.clone(),
                compartment_id: compartment_id.clone(),
            });
        }

        for (key, value) in &search_params {
            match self.parser.parse(&resource_types, key, value)? {
                ParseOutcome::Supported(expr) => filters.push(expr),
                ParseOutcome::Unsupported { key, value } => unsupported.push((key, value)),
            }
        }

        let mut includes = Vec::new();
        for (key, value, request) in include_requests {
            match self.compile_include(&request, &resource_types)? {
                Some(include) => {
                    if include.circular {
                        debug!(include = %value, "Circular iterating include");
                        issues.push(SearchIssue::information(format!(
                            "'{}={}' references its own source type; only a single iteration is performed",
                            key, value
                        )));
                    }
                    includes.push(include);
                }
                None => unsupported.push((key, value)),
            }
        }

        let mut sort = Vec::new();
        let mut sort_errors = Vec::new();
        for directive in &sort_requests {
            let mut resolved = None;
            let mut on_every_type = true;
            for rt in &resource_types {
                match self.definitions.get_param(rt, &directive.parameter) {
                    Some(def) => {
                        resolved.get_or_insert(def);
                    }
                    None => on_every_type = false,
                }
            }
            match resolved {
                Some(def) if on_every_type => sort.push((def, directive.direction)),
                _ => sort_errors.push(format!(
                    "Sort parameter '{}' is not supported for {}",
                    directive.parameter,
                    resource_types.join(", ")
                )),
            }
        }
        if let Err(errors) = self.sorting_validator.validate(&sort) {
            sort_errors.extend(errors);
            sort.clear();
        }

        if strict && !sort_errors.is_empty() {
            return Err(SearchError::bad_request(sort_errors.join("; ")));
        }
        if strict && !unsupported.is_empty() {
            let names: Vec<String> = unsupported
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            return Err(SearchError::bad_request(format!(
                "Search parameters not supported: {}",
                names.join(", ")
            )));
        }

        issues.extend(sort_errors.into_iter().map(SearchIssue::warning));
        issues.extend(unsupported.iter().map(|(key, _)| {
            SearchIssue::warning(format!("The search parameter '{}' is not supported", key))
        }));

        let expression = if filters.is_empty() {
            None
        } else {
            Some(Expression::and(filters))
        };

        debug!(
            resource_types = ?resource_types,
            unsupported = unsupported.len(),
            issues = issues.len(),
            "Compiled search"
        );

        Ok(SearchOptions {
            resource_types,
            expression,
            sort,
            continuation_token,
            max_item_count,
            include_count: self.config.include_count,
            include_total,
            count_only,
            summary: summary.unwrap_or_default(),
            elements,
            includes,
            unsupported_parameters: unsupported,
            issues,
            is_async: request.is_async,
        })
    }

    /// Compiles one include directive. `None` means the parameter is unknown.
    fn compile_include(
        &self,
        request: &IncludeRequest,
        resource_types: &[String],
    ) -> Result<Option<IncludeExpression>, SearchError> {
        let iterating = request.modifier.is_iterating();
        let source_type = request.source_type.trim();

        if source_type.is_empty() {
            return Err(SearchError::invalid_operation(
                "Include source resource type is blank",
            ));
        }
        if request.parameter == "*" {
            return Ok(None);
        }
        if !self.definitions.is_known_resource_type(source_type) {
            return Err(SearchError::resource_type_not_supported(source_type));
        }

        let Some(parameter) = self.definitions.get_param(source_type, &request.parameter) else {
            return Ok(None);
        };
        if parameter.param_type != SearchParamType::Reference {
            return Err(SearchError::bad_request(format!(
                "'{}:{}' is not a reference parameter",
                source_type, request.parameter
            )));
        }

        let declared_targets = parameter.target.clone().unwrap_or_default();
        let target_types = match &request.target_type {
            Some(target) => vec![target.clone()],
            None if !request.reversed => declared_targets,
            None if iterating => {
                // Previously included resources cannot tell us the target
                if declared_targets.len() != 1 {
                    return Err(SearchError::invalid_operation(format!(
                        "'{}:{}' has {} possible target types; iterating revinclude needs an explicit target type",
                        source_type,
                        request.parameter,
                        declared_targets.len()
                    )));
                }
                declared_targets
            }
            None => resource_types.to_vec(),
        };

        for target in &target_types {
            if target.trim().is_empty() {
                return Err(SearchError::invalid_operation(
                    "Include target resource type is blank",
                ));
            }
            if !self.definitions.is_known_resource_type(target) {
                return Err(SearchError::resource_type_not_supported(target.as_str()));
            }
        }

        let circular = iterating && target_types.iter().any(|t| t == source_type);

        Ok(Some(IncludeExpression {
            reversed: request.reversed,
            modifier: request.modifier,
            source_type: source_type.to_string(),
            parameter,
            target_types,
            circular,
        }))
    }
}

impl std::fmt::Debug for SearchOptionsFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOptionsFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::registry::{
        SearchParameterDefinition, SearchParameterRegistryBuilder, SortParameterStatus,
    };
    use crate::types::{ContinuationToken, SortDirection};

    fn factory() -> SearchOptionsFactory {
        let mut builder = SearchParameterRegistryBuilder::new().with_core_parameters();
        builder
            .register_all(vec![
                SearchParameterDefinition::new(
                    "http://hl7.org/fhir/SearchParameter/individual-family",
                    "family",
                    SearchParamType::String,
                    "Patient.name.family",
                )
                .with_base(["Patient"])
                .with_sort_status(SortParameterStatus::Enabled),
                SearchParameterDefinition::new(
                    "http://hl7.org/fhir/SearchParameter/Patient-link",
                    "link",
                    SearchParamType::Reference,
                    "Patient.link.other",
                )
                .with_base(["Patient"])
                .with_targets(["Patient", "RelatedPerson"]),
                SearchParameterDefinition::new(
                    "http://hl7.org/fhir/SearchParameter/Observation-subject",
                    "subject",
                    SearchParamType::Reference,
                    "Observation.subject",
                )
                .with_base(["Observation"])
                .with_targets(["Patient"]),
            ])
            .unwrap();
        let registry = Arc::new(builder.with_resource_types(["RelatedPerson"]).build());
        SearchOptionsFactory::with_defaults(registry, SearchConfig::default())
    }

    fn create(request: SearchRequest) -> Result<SearchOptions, SearchError> {
        factory().create(&request)
    }

    #[test]
    fn test_type_segment_adds_filter() {
        let options = create(SearchRequest::for_type("Patient").with_query("family=smi")).unwrap();
        assert_eq!(options.resource_types, vec!["Patient"]);
        assert_eq!(
            options.expression.unwrap().to_string(),
            "(And (Param _type (Eq ResourceType \"Patient\")) (Param family (StringStartsWith String \"smi\" IgnoreCase)))"
        );
        assert_eq!(options.max_item_count, 10);
        assert!(options.issues.is_empty());
    }

    #[test]
    fn test_unknown_type_segment() {
        assert!(matches!(
            create(SearchRequest::for_type("Spaceship")),
            Err(SearchError::ResourceTypeNotSupported { .. })
        ));
    }

    #[test]
    fn test_system_search_defaults_to_resource() {
        let options = create(SearchRequest::system()).unwrap();
        assert_eq!(options.resource_types, vec!["Resource"]);
        assert!(options.expression.is_none());
    }

    #[test]
    fn test_modified_type_does_not_narrow() {
        let options = create(SearchRequest::system().with_param("_type:not", "Patient")).unwrap();
        assert_eq!(options.resource_types, vec!["Resource"]);
    }

    #[test]
    fn test_ignored_and_unsupported() {
        let options = create(
            SearchRequest::for_type("Patient")
                .with_query("_format=json&_pretty=true&_text=cancer&family=&unknown=1"),
        )
        .unwrap();
        assert_eq!(
            options.unsupported_parameters,
            vec![
                ("_text".to_string(), "cancer".to_string()),
                ("family".to_string(), "".to_string()),
                ("unknown".to_string(), "1".to_string()),
            ]
        );
        assert_eq!(options.issues.len(), 3);
        assert!(options.has_warnings());

        let strict = create(
            SearchRequest::for_type("Patient")
                .with_query("unknown=1")
                .with_strict(true),
        );
        assert!(matches!(strict, Err(SearchError::BadRequest { .. })));
    }

    #[test]
    fn test_continuation_token() {
        let codec = Base64ContinuationTokenCodec;
        let token = codec.encode(&ContinuationToken::new(vec![], 42));

        let options = create(
            SearchRequest::for_type("Patient").with_param(CONTINUATION_TOKEN, token.clone()),
        )
        .unwrap();
        assert_eq!(
            options.continuation_token.map(|t| t.resource_surrogate_id()),
            Some(42)
        );
        assert_eq!(options.include_total, TotalMode::None);

        let twice = create(
            SearchRequest::for_type("Patient")
                .with_param(CONTINUATION_TOKEN, token.clone())
                .with_param(CONTINUATION_TOKEN, token),
        );
        assert!(matches!(
            twice,
            Err(SearchError::InvalidSearchOperation { .. })
        ));

        assert!(matches!(
            create(SearchRequest::for_type("Patient").with_param(CONTINUATION_TOKEN, "%%%")),
            Err(SearchError::InvalidContinuationToken { .. })
        ));
    }

    #[test]
    fn test_elements_with_summary() {
        assert!(matches!(
            create(SearchRequest::for_type("Patient").with_query("_elements=name&_summary=true")),
            Err(SearchError::BadRequest { .. })
        ));
        assert!(
            create(SearchRequest::for_type("Patient").with_query("_elements=name&_summary=false"))
                .is_ok()
        );
    }

    #[test]
    fn test_count_only() {
        let options = create(SearchRequest::for_type("Patient").with_query("_summary=count")).unwrap();
        assert!(options.count_only);
        assert_eq!(options.include_total, TotalMode::Accurate);

        let options = create(SearchRequest::for_type("Patient").with_query("_count=0")).unwrap();
        assert!(options.count_only);
    }

    #[test]
    fn test_sort() {
        let options = create(SearchRequest::for_type("Patient").with_query("_sort=-family")).unwrap();
        assert_eq!(options.sort.len(), 1);
        assert_eq!(options.sort[0].0.code, "family");
        assert_eq!(options.sort[0].1, SortDirection::Descending);

        // `_tag` resolves but is not enabled for sorting; `nope` does not resolve
        let options =
            create(SearchRequest::for_type("Patient").with_query("_sort=nope,_tag")).unwrap();
        assert!(options.sort.is_empty());
        assert_eq!(options.issues.len(), 2);

        let strict = create(
            SearchRequest::for_type("Patient")
                .with_query("_sort=nope")
                .with_strict(true),
        );
        assert!(matches!(strict, Err(SearchError::BadRequest { .. })));
    }

    #[test]
    fn test_includes() {
        let options = create(
            SearchRequest::for_type("Observation").with_query("_include=Observation:subject"),
        )
        .unwrap();
        assert_eq!(options.includes.len(), 1);
        assert_eq!(options.includes[0].target_types, vec!["Patient"]);

        let options = create(
            SearchRequest::for_type("Patient").with_query("_revinclude=Observation:subject"),
        )
        .unwrap();
        assert!(options.includes[0].reversed);
        assert_eq!(options.includes[0].target_types, vec!["Patient"]);

        // Two declared targets and no explicit one
        assert!(matches!(
            create(SearchRequest::for_type("Patient").with_query("_revinclude:iterate=Patient:link")),
            Err(SearchError::InvalidSearchOperation { .. })
        ));

        assert!(matches!(
            create(SearchRequest::for_type("Patient").with_query("_include=Patient:link:")),
            Err(SearchError::InvalidSearchOperation { .. })
        ));

        assert!(matches!(
            create(SearchRequest::for_type("Patient").with_query("_include=Patient:link:Spaceship")),
            Err(SearchError::ResourceTypeNotSupported { .. })
        ));
    }

    #[test]
    fn test_circular_iterate_include() {
        let options = create(
            SearchRequest::for_type("Patient").with_query("_include:iterate=Patient:link:Patient"),
        )
        .unwrap();
        assert!(options.includes[0].circular);
        assert_eq!(options.issues.len(), 1);
        assert!(!options.has_warnings());
    }

    #[test]
    fn test_compartment() {
        let options = create(
            SearchRequest::for_type("Observation").with_compartment("Patient", "p1"),
        )
        .unwrap();
        assert!(
            options
                .expression
                .unwrap()
                .to_string()
                .contains("(Compartment Patient \"p1\")")
        );

        assert!(matches!(
            create(SearchRequest::for_type("Observation").with_compartment("Observation", "o1")),
            Err(SearchError::InvalidSearchOperation { .. })
        ));
        assert!(matches!(
            create(SearchRequest::for_type("Observation").with_compartment("Patient", " ")),
            Err(SearchError::InvalidSearchOperation { .. })
        ));
    }

    #[test]
    fn test_with_query_decodes() {
        let request = SearchRequest::system().with_query("?family=O%27Brien&name=a+b");
        assert_eq!(
            request.query_parameters,
            vec![
                ("family".to_string(), "O'Brien".to_string()),
                ("name".to_string(), "a b".to_string()),
            ]
        );
    }
}
