//! Search parameter vocabulary shared by the loader, the value extractor
//! and the query compiler.
//!
//! [`SearchParamType`] picks the row family an extracted value is written
//! to and the comparisons a query may run against it. [`SearchModifier`]
//! and [`SearchPrefix`] are the `code:modifier=prefixvalue` parts of a query
//! parameter; their `is_valid_for` checks turn a malformed query into a bad
//! request rather than an empty result. The remaining enums carry the
//! result-shaping controls (`_sort`, `_total`, `_summary`, `_include`).
//!
//! Every keyword enum keeps its wire spellings in one table so parsing and
//! display cannot drift apart.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of a search parameter, as declared by `SearchParameter.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// Text, matched case- and accent-insensitively by prefix.
    String,
    /// Exact URI.
    Uri,
    /// Decimal point or range.
    Number,
    /// Instant range derived from a date, dateTime, instant or Period.
    Date,
    /// Number with a unit system and code.
    Quantity,
    /// Code, optionally scoped by a system.
    Token,
    /// Link to another resource.
    Reference,
    /// Combines the values of other parameters found on one element.
    Composite,
    /// Bespoke matching (e.g. `near`); never indexed.
    Special,
}

impl SearchParamType {
    const ALL: [SearchParamType; 9] = [
        SearchParamType::String,
        SearchParamType::Uri,
        SearchParamType::Number,
        SearchParamType::Date,
        SearchParamType::Quantity,
        SearchParamType::Token,
        SearchParamType::Reference,
        SearchParamType::Composite,
        SearchParamType::Special,
    ];

    /// The `SearchParameter.type` code.
    pub fn as_str(self) -> &'static str {
        match self {
            SearchParamType::String => "string",
            SearchParamType::Uri => "uri",
            SearchParamType::Number => "number",
            SearchParamType::Date => "date",
            SearchParamType::Quantity => "quantity",
            SearchParamType::Token => "token",
            SearchParamType::Reference => "reference",
            SearchParamType::Composite => "composite",
            SearchParamType::Special => "special",
        }
    }

    /// Values of this kind are stored as ranges that support ordering prefixes.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            SearchParamType::Number | SearchParamType::Date | SearchParamType::Quantity
        )
    }
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown search parameter type: {}", s))
    }
}

/// The `:modifier` suffix of a query parameter name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModifier {
    /// `:exact`
    Exact,
    /// `:contains`
    Contains,
    /// `:text`
    Text,
    /// `:not`
    Not,
    /// `:missing`
    Missing,
    /// `:above`
    Above,
    /// `:below`
    Below,
    /// `:in`
    In,
    /// `:not-in`
    NotIn,
    /// `:identifier`
    Identifier,
    /// Target type restriction on a reference, e.g. `subject:Patient`.
    Type(String),
}

const KEYWORD_MODIFIERS: [SearchModifier; 10] = [
    SearchModifier::Exact,
    SearchModifier::Contains,
    SearchModifier::Text,
    SearchModifier::Not,
    SearchModifier::Missing,
    SearchModifier::Above,
    SearchModifier::Below,
    SearchModifier::In,
    SearchModifier::NotIn,
    SearchModifier::Identifier,
];

impl SearchModifier {
    /// The modifier as written after the colon.
    pub fn as_str(&self) -> &str {
        match self {
            SearchModifier::Exact => "exact",
            SearchModifier::Contains => "contains",
            SearchModifier::Text => "text",
            SearchModifier::Not => "not",
            SearchModifier::Missing => "missing",
            SearchModifier::Above => "above",
            SearchModifier::Below => "below",
            SearchModifier::In => "in",
            SearchModifier::NotIn => "not-in",
            SearchModifier::Identifier => "identifier",
            SearchModifier::Type(resource_type) => resource_type,
        }
    }

    /// Parses a modifier. Unknown lowercase keywords yield `None`; a
    /// capitalised word is taken as a resource type restriction.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(keyword) = KEYWORD_MODIFIERS
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
        {
            return Some(keyword);
        }
        s.starts_with(|c: char| c.is_ascii_uppercase())
            .then(|| SearchModifier::Type(s.to_string()))
    }

    /// Whether the modifier can be applied to a parameter of this kind.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        use SearchParamType as T;
        match self {
            SearchModifier::Missing => true,
            SearchModifier::Exact | SearchModifier::Contains => {
                matches!(param_type, T::String | T::Uri)
            }
            SearchModifier::Text | SearchModifier::Not => param_type == T::Token,
            SearchModifier::Above
            | SearchModifier::Below
            | SearchModifier::In
            | SearchModifier::NotIn => matches!(param_type, T::Token | T::Uri),
            SearchModifier::Identifier | SearchModifier::Type(_) => param_type == T::Reference,
        }
    }
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two-letter comparison prefix on an ordered search value (`gt2020`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Ranges overlap (the default).
    #[default]
    Eq,
    /// Ranges do not overlap.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after the value's range.
    Sa,
    /// Ends before the value's range.
    Eb,
    /// Within a tolerance of the value.
    Ap,
}

impl SearchPrefix {
    const ALL: [SearchPrefix; 9] = [
        SearchPrefix::Eq,
        SearchPrefix::Ne,
        SearchPrefix::Gt,
        SearchPrefix::Lt,
        SearchPrefix::Ge,
        SearchPrefix::Le,
        SearchPrefix::Sa,
        SearchPrefix::Eb,
        SearchPrefix::Ap,
    ];

    /// The two-letter prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            SearchPrefix::Eq => "eq",
            SearchPrefix::Ne => "ne",
            SearchPrefix::Gt => "gt",
            SearchPrefix::Lt => "lt",
            SearchPrefix::Ge => "ge",
            SearchPrefix::Le => "le",
            SearchPrefix::Sa => "sa",
            SearchPrefix::Eb => "eb",
            SearchPrefix::Ap => "ap",
        }
    }

    /// Splits a leading prefix off a value. Values without one compare
    /// with `eq`.
    pub fn extract(value: &str) -> (Self, &str) {
        value
            .split_at_checked(2)
            .and_then(|(head, rest)| head.parse().ok().map(|prefix| (prefix, rest)))
            .unwrap_or((SearchPrefix::Eq, value))
    }

    /// `eq` applies everywhere; `sa`/`eb` only to dates; the rest to any
    /// ordered kind.
    pub fn is_valid_for(self, param_type: SearchParamType) -> bool {
        match self {
            SearchPrefix::Eq => true,
            SearchPrefix::Sa | SearchPrefix::Eb => param_type == SearchParamType::Date,
            _ => param_type.is_ordered(),
        }
    }
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown search prefix: {}", s))
    }
}

/// Direction of one `_sort` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SortDirection {
    /// Lowest value first.
    #[default]
    Ascending,
    /// Highest value first.
    Descending,
}

/// A requested sort key, before resolution against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    /// Parameter code, without the `-`.
    pub parameter: String,
    /// Requested direction.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Parses one `_sort` entry; a leading `-` sorts descending.
    pub fn parse(s: &str) -> Self {
        let (parameter, direction) = match s.strip_prefix('-') {
            Some(code) => (code, SortDirection::Descending),
            None => (s, SortDirection::Ascending),
        };
        Self {
            parameter: parameter.to_string(),
            direction,
        }
    }
}

/// Value of `_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalMode {
    /// No total in the result.
    None,
    /// Rejected by the query compiler; no store here can estimate.
    Estimate,
    /// Exact count of matches.
    Accurate,
}

impl FromStr for TotalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [TotalMode::None, TotalMode::Estimate, TotalMode::Accurate]
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown _total value: {}", s))
    }
}

impl TotalMode {
    /// The `_total` value.
    pub fn as_str(self) -> &'static str {
        match self {
            TotalMode::None => "none",
            TotalMode::Estimate => "estimate",
            TotalMode::Accurate => "accurate",
        }
    }
}

/// Value of `_summary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    /// Elements marked as summary only.
    True,
    /// Full resources.
    #[default]
    False,
    /// Narrative and mandatory elements.
    Text,
    /// Everything except the narrative.
    Data,
    /// Only the match count; no resources are returned.
    Count,
}

impl SummaryMode {
    /// The `_summary` value.
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryMode::True => "true",
            SummaryMode::False => "false",
            SummaryMode::Text => "text",
            SummaryMode::Data => "data",
            SummaryMode::Count => "count",
        }
    }
}

impl FromStr for SummaryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            SummaryMode::True,
            SummaryMode::False,
            SummaryMode::Text,
            SummaryMode::Data,
            SummaryMode::Count,
        ]
        .into_iter()
        .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown _summary value: {}", s))
    }
}

/// Modifier on an `_include` / `_revinclude` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludeModifier {
    /// Apply to the primary result set only.
    #[default]
    None,
    /// Also apply to previously included resources.
    Iterate,
    /// Older spelling of `iterate`.
    Recurse,
}

impl IncludeModifier {
    /// Parses the modifier part of `_include:iterate`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "iterate" => Some(IncludeModifier::Iterate),
            "recurse" => Some(IncludeModifier::Recurse),
            _ => None,
        }
    }

    /// Returns true if the directive applies to included results.
    pub fn is_iterating(&self) -> bool {
        matches!(self, IncludeModifier::Iterate | IncludeModifier::Recurse)
    }
}
