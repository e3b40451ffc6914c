//! SearchParameter Registry.
//!
//! The registry holds every SearchParameter definition known to the server,
//! indexed by both (resource_type, param_code) and canonical URL. It is
//! assembled once through [`SearchParameterRegistryBuilder`] and is read-only
//! afterwards, so it can be shared behind an `Arc` without locking.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::SearchParamType;

use super::errors::RegistryError;
use super::loader::core_parameters;

/// URL of the built-in `_type` parameter.
///
/// The resource type is stored directly on every row, so this parameter is
/// never indexed as a fact.
pub const RESOURCE_TYPE_PARAMETER_URL: &str = "http://hl7.org/fhir/SearchParameter/Resource-type";

/// Universal base type every resource derives from.
pub const RESOURCE: &str = "Resource";

/// Base type of every resource that has narrative and extensions.
pub const DOMAIN_RESOURCE: &str = "DomainResource";

// Resources that derive from Resource directly rather than DomainResource
const NON_DOMAIN_RESOURCES: &[&str] = &["Binary", "Bundle", "Parameters"];

/// Status of a SearchParameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterStatus {
    /// Active - can be used in searches.
    #[default]
    Active,
    /// Draft - informational, not yet active.
    Draft,
    /// Retired - disabled, not usable.
    Retired,
}

impl SearchParameterStatus {
    /// Parse from FHIR status string.
    pub fn from_fhir_status(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(SearchParameterStatus::Active),
            "draft" => Some(SearchParameterStatus::Draft),
            "retired" => Some(SearchParameterStatus::Retired),
            _ => None,
        }
    }

    /// Returns true if this status allows the parameter to be used in searches.
    pub fn is_usable(&self) -> bool {
        *self == SearchParameterStatus::Active
    }
}

/// Source of a SearchParameter definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterSource {
    /// Built-in parameters compiled into the crate.
    #[default]
    Embedded,
    /// Loaded from a SearchParameter bundle or file.
    Loaded,
}

/// Whether a parameter may be used in `_sort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortParameterStatus {
    /// Sorting is not possible.
    #[default]
    Disabled,
    /// Sorting is possible once the parameter has been reindexed.
    Supported,
    /// Sorting is available.
    Enabled,
}

/// Component of a composite search parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeComponentDef {
    /// Definition URL of the component parameter.
    pub definition: String,
    /// Path expression evaluated against each composite root.
    pub expression: String,
}

/// The identity two definitions are compared by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DefinitionIdentity {
    /// Canonical URL.
    Url(String),
    /// Fallback for definitions without a URL.
    Shape {
        /// Parameter code.
        code: String,
        /// Parameter kind.
        param_type: SearchParamType,
        /// Path expression.
        expression: String,
    },
}

impl std::fmt::Display for DefinitionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefinitionIdentity::Url(url) => f.write_str(url),
            DefinitionIdentity::Shape {
                code,
                param_type,
                expression,
            } => write!(f, "{} ({}): {}", code, param_type, expression),
        }
    }
}

/// Complete definition of a SearchParameter.
///
/// Equality and hashing use [`DefinitionIdentity`]: the URL when present,
/// otherwise (code, kind, expression).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParameterDefinition {
    /// Canonical URL.
    pub url: Option<String>,

    /// Parameter code (the URL param name, e.g., "name", "identifier").
    pub code: String,

    /// Human-readable name.
    pub name: Option<String>,

    /// Description of the parameter.
    pub description: Option<String>,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// Path expression for extracting values.
    pub expression: String,

    /// Resource types this parameter applies to.
    pub base: Vec<String>,

    /// Target resource types (for reference parameters).
    pub target: Option<Vec<String>>,

    /// Components (for composite parameters).
    pub component: Vec<CompositeComponentDef>,

    /// Current status.
    pub status: SearchParameterStatus,

    /// Source of this definition.
    pub source: SearchParameterSource,

    /// Whether the parameter can be used in a search query.
    pub is_searchable: bool,

    /// Whether the server can index values for this parameter.
    pub is_supported: bool,

    /// Set when only some of the parameter's paths or components are indexable.
    pub is_partially_supported: bool,

    /// Sort eligibility.
    pub sort_status: SortParameterStatus,
}

impl SearchParameterDefinition {
    /// Creates a new SearchParameter definition.
    pub fn new(
        url: impl Into<String>,
        code: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        let mut def = Self::anonymous(code, param_type, expression);
        def.url = Some(url.into());
        def
    }

    /// Creates a definition without a canonical URL.
    pub fn anonymous(
        code: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            url: None,
            code: code.into(),
            name: None,
            description: None,
            param_type,
            expression: expression.into(),
            base: Vec::new(),
            target: None,
            component: Vec::new(),
            status: SearchParameterStatus::Active,
            source: SearchParameterSource::Loaded,
            is_searchable: true,
            is_supported: param_type != SearchParamType::Special,
            is_partially_supported: false,
            sort_status: SortParameterStatus::Disabled,
        }
    }

    /// Sets the base resource types.
    pub fn with_base<I, S>(mut self, base: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base = base.into_iter().map(Into::into).collect();
        self
    }

    /// Sets target types for reference parameters.
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a composite component.
    pub fn with_component(
        mut self,
        definition: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.component.push(CompositeComponentDef {
            definition: definition.into(),
            expression: expression.into(),
        });
        self
    }

    /// Sets the source.
    pub fn with_source(mut self, source: SearchParameterSource) -> Self {
        self.source = source;
        self
    }

    /// Sets the status, which also decides whether the parameter is searchable.
    pub fn with_status(mut self, status: SearchParameterStatus) -> Self {
        self.status = status;
        self.is_searchable = status.is_usable();
        self
    }

    /// Sets the sort eligibility.
    pub fn with_sort_status(mut self, sort_status: SortParameterStatus) -> Self {
        self.sort_status = sort_status;
        self
    }

    /// Returns the identity used for equality and duplicate detection.
    pub fn identity(&self) -> DefinitionIdentity {
        match &self.url {
            Some(url) => DefinitionIdentity::Url(url.clone()),
            None => DefinitionIdentity::Shape {
                code: self.code.clone(),
                param_type: self.param_type,
                expression: self.expression.clone(),
            },
        }
    }

    /// Returns whether this is a composite parameter.
    pub fn is_composite(&self) -> bool {
        self.param_type == SearchParamType::Composite && !self.component.is_empty()
    }

    /// Returns whether this is the built-in `_type` parameter.
    pub fn is_resource_type_parameter(&self) -> bool {
        self.url.as_deref() == Some(RESOURCE_TYPE_PARAMETER_URL)
    }

    /// Returns a label for log messages.
    pub fn label(&self) -> &str {
        self.url.as_deref().unwrap_or(&self.code)
    }
}

impl PartialEq for SearchParameterDefinition {
    fn eq(&self, other: &Self) -> bool {
        match (&self.url, &other.url) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                self.code == other.code
                    && self.param_type == other.param_type
                    && self.expression == other.expression
            }
            _ => false,
        }
    }
}

impl Eq for SearchParameterDefinition {}

impl Hash for SearchParameterDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// Read access to SearchParameter definitions.
///
/// This is the contract the indexer and the query compiler consume; the
/// registry is the default implementation.
pub trait SearchParameterDefinitionSource: Send + Sync {
    /// Returns every definition that applies to a resource type, including
    /// those inherited from `DomainResource` and `Resource`.
    fn definitions_for(&self, resource_type: &str) -> Vec<Arc<SearchParameterDefinition>>;

    /// Resolves a definition by canonical URL.
    fn resolve(&self, url: &str) -> Result<Arc<SearchParameterDefinition>, RegistryError>;

    /// Gets a definition by resource type and code, falling back to the base types.
    fn get_param(
        &self,
        resource_type: &str,
        code: &str,
    ) -> Option<Arc<SearchParameterDefinition>>;

    /// Returns true if the resource type is known to the server.
    fn is_known_resource_type(&self, resource_type: &str) -> bool;
}

/// Immutable registry of SearchParameter definitions.
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, param_code).
    params_by_type: HashMap<String, BTreeMap<String, Arc<SearchParameterDefinition>>>,

    /// Parameters indexed by canonical URL.
    params_by_url: HashMap<String, Arc<SearchParameterDefinition>>,

    /// Every registered definition in registration order.
    all: Vec<Arc<SearchParameterDefinition>>,

    /// Known resource types.
    resource_types: BTreeSet<String>,
}

impl SearchParameterRegistry {
    /// Creates a registry holding only the built-in core parameters.
    pub fn core() -> Self {
        SearchParameterRegistryBuilder::new()
            .with_core_parameters()
            .build()
    }

    /// Returns the number of registered parameters.
    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// Returns true if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Returns all known resource types, sorted.
    pub fn resource_types(&self) -> Vec<String> {
        self.resource_types.iter().cloned().collect()
    }

    /// Returns every registered definition in registration order.
    pub fn all(&self) -> &[Arc<SearchParameterDefinition>] {
        &self.all
    }

    fn inherited_types(resource_type: &str) -> Vec<&str> {
        match resource_type {
            RESOURCE => vec![RESOURCE],
            DOMAIN_RESOURCE => vec![DOMAIN_RESOURCE, RESOURCE],
            rt if NON_DOMAIN_RESOURCES.contains(&rt) => vec![rt, RESOURCE],
            rt => vec![rt, DOMAIN_RESOURCE, RESOURCE],
        }
    }
}

impl SearchParameterDefinitionSource for SearchParameterRegistry {
    fn definitions_for(&self, resource_type: &str) -> Vec<Arc<SearchParameterDefinition>> {
        let mut seen_codes = HashSet::new();
        let mut result = Vec::new();

        for rt in Self::inherited_types(resource_type) {
            if let Some(params) = self.params_by_type.get(rt) {
                for (code, param) in params {
                    if seen_codes.insert(code.as_str()) {
                        result.push(Arc::clone(param));
                    }
                }
            }
        }

        result
    }

    fn resolve(&self, url: &str) -> Result<Arc<SearchParameterDefinition>, RegistryError> {
        self.params_by_url
            .get(url)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                identifier: url.to_string(),
            })
    }

    fn get_param(
        &self,
        resource_type: &str,
        code: &str,
    ) -> Option<Arc<SearchParameterDefinition>> {
        Self::inherited_types(resource_type)
            .into_iter()
            .find_map(|rt| self.params_by_type.get(rt).and_then(|p| p.get(code)))
            .cloned()
    }

    fn is_known_resource_type(&self, resource_type: &str) -> bool {
        self.resource_types.contains(resource_type)
    }
}

impl std::fmt::Debug for SearchParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterRegistry")
            .field("params_count", &self.all.len())
            .field("resource_types", &self.resource_types.len())
            .finish()
    }
}

/// Assembles a [`SearchParameterRegistry`].
///
/// Registration rejects definitions whose identity was already registered.
/// When two different definitions claim the same code on the same base type,
/// the first one registered wins and the later one is logged as shadowed.
#[derive(Debug, Default)]
pub struct SearchParameterRegistryBuilder {
    definitions: Vec<SearchParameterDefinition>,
    identities: HashSet<DefinitionIdentity>,
    by_type: HashMap<String, BTreeMap<String, usize>>,
    resource_types: BTreeSet<String>,
}

impl SearchParameterRegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        let mut builder = Self::default();
        builder.resource_types.insert(RESOURCE.to_string());
        builder.resource_types.insert(DOMAIN_RESOURCE.to_string());
        builder
    }

    /// Adds the built-in `_id`, `_lastUpdated`, `_type`, `_tag`, `_profile`
    /// and `_security` parameters.
    pub fn with_core_parameters(mut self) -> Self {
        for def in core_parameters() {
            if !self.identities.contains(&def.identity()) {
                self.insert(def);
            }
        }
        self
    }

    /// Declares resource types as known even if no parameter names them as base.
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Registers a definition.
    pub fn register(&mut self, def: SearchParameterDefinition) -> Result<(), RegistryError> {
        if def.code.is_empty() {
            return Err(RegistryError::InvalidDefinition {
                message: format!("'{}' has no code", def.label()),
            });
        }
        if def.base.is_empty() {
            return Err(RegistryError::InvalidDefinition {
                message: format!("'{}' has no base resource type", def.label()),
            });
        }

        let identity = def.identity();
        if self.identities.contains(&identity) {
            return Err(RegistryError::Duplicate {
                identity: identity.to_string(),
            });
        }

        self.insert(def);
        Ok(())
    }

    /// Registers many definitions, skipping duplicates with a warning.
    ///
    /// Returns the number of definitions registered.
    pub fn register_all<I>(&mut self, defs: I) -> Result<usize, RegistryError>
    where
        I: IntoIterator<Item = SearchParameterDefinition>,
    {
        let mut count = 0;
        for def in defs {
            match self.register(def) {
                Ok(()) => count += 1,
                Err(RegistryError::Duplicate { identity }) => {
                    warn!(identity = %identity, "Skipping duplicate SearchParameter");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    fn insert(&mut self, def: SearchParameterDefinition) {
        let index = self.definitions.len();
        self.identities.insert(def.identity());

        for base in &def.base {
            self.resource_types.insert(base.clone());
            let codes = self.by_type.entry(base.clone()).or_default();
            if let Some(existing) = codes.get(&def.code).copied() {
                warn!(
                    code = %def.code,
                    base = %base,
                    kept = %self.definitions[existing].label(),
                    shadowed = %def.label(),
                    "SearchParameter code is already defined for this type"
                );
            } else {
                codes.insert(def.code.clone(), index);
            }
        }

        self.definitions.push(def);
    }

    /// Freezes the registry.
    ///
    /// Composite parameters whose components cannot all be resolved are
    /// flagged as partially supported.
    pub fn build(mut self) -> SearchParameterRegistry {
        let urls: HashSet<String> = self
            .definitions
            .iter()
            .filter_map(|d| d.url.clone())
            .collect();

        for def in &mut self.definitions {
            if def.param_type != SearchParamType::Composite {
                continue;
            }
            let missing = def
                .component
                .iter()
                .filter(|c| !urls.contains(&c.definition))
                .count();
            if def.component.is_empty() || missing == def.component.len() {
                def.is_supported = false;
            } else if missing > 0 {
                def.is_partially_supported = true;
            }
            if missing > 0 {
                debug!(param = %def.label(), missing, "Composite has unresolved components");
            }
        }

        let all: Vec<Arc<SearchParameterDefinition>> =
            self.definitions.into_iter().map(Arc::new).collect();

        let params_by_url = all
            .iter()
            .filter_map(|d| d.url.clone().map(|url| (url, Arc::clone(d))))
            .collect();

        let params_by_type = self
            .by_type
            .into_iter()
            .map(|(rt, codes)| {
                let codes = codes
                    .into_iter()
                    .map(|(code, index)| (code, Arc::clone(&all[index])))
                    .collect();
                (rt, codes)
            })
            .collect();

        SearchParameterRegistry {
            params_by_type,
            params_by_url,
            all,
            resource_types: self.resource_types,
        }
    }
}
