//! Compiled search queries.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::expression::Expression;
use super::registry::SearchParameterDefinition;
use crate::types::{ContinuationToken, IncludeModifier, SortDirection, SummaryMode, TotalMode};

/// Severity of a compilation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Informational; the query ran as requested after adjustment.
    Information,
    /// Part of the query was ignored.
    Warning,
}

/// A problem recovered from while compiling a query.
///
/// Issues are surfaced to clients next to the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchIssue {
    /// Severity.
    pub severity: IssueSeverity,
    /// Human-readable description.
    pub message: String,
}

impl SearchIssue {
    /// Creates an informational issue.
    pub fn information(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Information,
            message: message.into(),
        }
    }

    /// Creates a warning.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for SearchIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.severity, self.message)
    }
}

/// A compiled `_include` / `_revinclude` directive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncludeExpression {
    /// True for `_revinclude`.
    pub reversed: bool,
    /// Iteration modifier.
    pub modifier: IncludeModifier,
    /// Resource type holding the reference.
    pub source_type: String,
    /// The reference parameter followed.
    #[serde(serialize_with = "serialize_code")]
    pub parameter: Arc<SearchParameterDefinition>,
    /// Resource types at the other end of the reference.
    pub target_types: Vec<String>,
    /// Set when an iterating directive references its own source type.
    pub circular: bool,
}

fn serialize_code<S>(def: &Arc<SearchParameterDefinition>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&def.code)
}

fn serialize_sort<S>(
    sort: &[(Arc<SearchParameterDefinition>, SortDirection)],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(sort.len()))?;
    for (def, direction) in sort {
        seq.serialize_element(&(def.code.as_str(), direction))?;
    }
    seq.end()
}

/// A compiled search query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOptions {
    /// Resource types searched.
    pub resource_types: Vec<String>,

    /// Filter over all search parameters, `None` to match everything.
    pub expression: Option<Expression>,

    /// Resolved sort keys, in order.
    #[serde(serialize_with = "serialize_sort")]
    pub sort: Vec<(Arc<SearchParameterDefinition>, SortDirection)>,

    /// Position to resume from.
    #[serde(skip)]
    pub continuation_token: Option<ContinuationToken>,

    /// Page size.
    pub max_item_count: usize,

    /// Maximum included resources per page.
    pub include_count: usize,

    /// Whether and how to count the full result set.
    pub include_total: TotalMode,

    /// Only the count is wanted.
    pub count_only: bool,

    /// Summary mode.
    pub summary: SummaryMode,

    /// Elements to return.
    pub elements: Vec<String>,

    /// Include and revinclude directives.
    pub includes: Vec<IncludeExpression>,

    /// Query parameters that were ignored.
    pub unsupported_parameters: Vec<(String, String)>,

    /// Problems recovered from during compilation.
    pub issues: Vec<SearchIssue>,

    /// Whether the search runs as a background operation.
    pub is_async: bool,
}

impl SearchOptions {
    /// Returns true if any issue is a warning.
    pub fn has_warnings(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Warning)
    }
}
