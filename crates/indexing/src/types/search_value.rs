//! Typed search values.
//!
//! A [`SearchValue`] is what the indexer produces for one matched element and
//! what row generators consume. Each variant carries only the fields needed to
//! test equality or overlap for its kind.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::partial_date::PartialDateTime;
use super::search_params::SearchParamType;

/// A value extracted from a resource for one search parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SearchValue {
    /// A number, either a point (`low == high`) or a range with open ends.
    Number {
        /// Lower bound, `None` when unbounded.
        low: Option<Decimal>,
        /// Upper bound, `None` when unbounded.
        high: Option<Decimal>,
    },

    /// A closed instant range.
    DateTime {
        /// First instant covered.
        start: DateTime<Utc>,
        /// Last instant covered.
        end: DateTime<Utc>,
        /// Set on the earliest value of this parameter within one resource.
        #[serde(default)]
        is_min: bool,
        /// Set on the latest value of this parameter within one resource.
        #[serde(default)]
        is_max: bool,
    },

    /// Free text.
    String {
        /// The text, case preserved.
        text: String,
        /// Set on the lowest value of this parameter within one resource.
        #[serde(default)]
        is_min: bool,
        /// Set on the highest value of this parameter within one resource.
        #[serde(default)]
        is_max: bool,
    },

    /// A coded value.
    Token {
        /// Code system URI.
        system: Option<String>,
        /// The code.
        code: Option<String>,
        /// Display text, used by `:text` searches.
        text: Option<String>,
    },

    /// A reference to another resource.
    Reference {
        /// Service base URL for absolute references.
        base_uri: Option<String>,
        /// Target resource type, when known.
        resource_type: Option<String>,
        /// Target resource id.
        resource_id: String,
        /// Target version from `_history/{vid}`.
        version: Option<String>,
    },

    /// A measured amount.
    Quantity {
        /// Unit system URI.
        system: Option<String>,
        /// Unit code.
        code: Option<String>,
        /// Lower bound, `None` when unbounded.
        low: Option<Decimal>,
        /// Upper bound, `None` when unbounded.
        high: Option<Decimal>,
    },

    /// A URI.
    Uri {
        /// The URI text.
        uri: String,
    },

    /// The values of a composite parameter for one root element.
    ///
    /// One list per component, in component order. Every list holds the
    /// alternatives for that component; rows are produced from the cartesian
    /// product of the lists.
    Composite {
        /// Alternative values, one list per component.
        components: Vec<Vec<SearchValue>>,
    },
}

impl SearchValue {
    /// Creates a string value.
    pub fn string(text: impl Into<String>) -> Self {
        SearchValue::String {
            text: text.into(),
            is_min: false,
            is_max: false,
        }
    }

    /// Creates a token value.
    pub fn token(system: Option<String>, code: Option<String>, text: Option<String>) -> Self {
        SearchValue::Token { system, code, text }
    }

    /// Creates a token value with a code only.
    pub fn token_code(code: impl Into<String>) -> Self {
        SearchValue::Token {
            system: None,
            code: Some(code.into()),
            text: None,
        }
    }

    /// Creates a point number value.
    pub fn number(value: Decimal) -> Self {
        SearchValue::Number {
            low: Some(value),
            high: Some(value),
        }
    }

    /// Creates a number range value.
    pub fn number_range(low: Option<Decimal>, high: Option<Decimal>) -> Self {
        SearchValue::Number { low, high }
    }

    /// Creates a point quantity value.
    pub fn quantity(value: Decimal, system: Option<String>, code: Option<String>) -> Self {
        SearchValue::Quantity {
            system,
            code,
            low: Some(value),
            high: Some(value),
        }
    }

    /// Creates a date value covering an instant range.
    pub fn date_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        SearchValue::DateTime {
            start,
            end,
            is_min: false,
            is_max: false,
        }
    }

    /// Creates a date value covering everything a partial date covers.
    pub fn date(partial: &PartialDateTime) -> Self {
        Self::date_range(partial.start(), partial.end())
    }

    /// Creates a URI value.
    pub fn uri(uri: impl Into<String>) -> Self {
        SearchValue::Uri { uri: uri.into() }
    }

    /// Parses a reference string (`Patient/1`, `http://x/fhir/Patient/1/_history/2`,
    /// or a bare id) into a reference value.
    ///
    /// Returns `None` for contained (`#id`) and empty references.
    pub fn reference(reference: &str) -> Option<Self> {
        let reference = reference.trim();
        if reference.is_empty() || reference.starts_with('#') || reference.starts_with("urn:") {
            return None;
        }

        let (path, version) = match reference.split_once("/_history/") {
            Some((path, version)) => (path, Some(version.to_string())),
            None => (reference, None),
        };

        let segments: Vec<&str> = path.rsplitn(3, '/').collect();
        match segments.as_slice() {
            [id] => Some(SearchValue::Reference {
                base_uri: None,
                resource_type: None,
                resource_id: id.to_string(),
                version,
            }),
            [id, resource_type] => Some(SearchValue::Reference {
                base_uri: None,
                resource_type: Some(resource_type.to_string()),
                resource_id: id.to_string(),
                version,
            }),
            [id, resource_type, base] => Some(SearchValue::Reference {
                base_uri: Some(format!("{}/", base)),
                resource_type: Some(resource_type.to_string()),
                resource_id: id.to_string(),
                version,
            }),
            _ => None,
        }
    }

    /// Returns the parameter kind this value belongs to.
    pub fn param_type(&self) -> SearchParamType {
        match self {
            SearchValue::Number { .. } => SearchParamType::Number,
            SearchValue::DateTime { .. } => SearchParamType::Date,
            SearchValue::String { .. } => SearchParamType::String,
            SearchValue::Token { .. } => SearchParamType::Token,
            SearchValue::Reference { .. } => SearchParamType::Reference,
            SearchValue::Quantity { .. } => SearchParamType::Quantity,
            SearchValue::Uri { .. } => SearchParamType::Uri,
            SearchValue::Composite { .. } => SearchParamType::Composite,
        }
    }

    /// Returns true if this value can stand as one component of a composite.
    ///
    /// Degenerate matches such as an unbounded range or a token without
    /// either system or code are excluded.
    pub fn is_valid_as_composite_component(&self) -> bool {
        match self {
            SearchValue::Number { low, high } | SearchValue::Quantity { low, high, .. } => {
                low.is_some() || high.is_some()
            }
            SearchValue::Token { system, code, .. } => system.is_some() || code.is_some(),
            SearchValue::String { text, .. } => !text.is_empty(),
            SearchValue::Uri { uri } => !uri.is_empty(),
            SearchValue::DateTime { .. } | SearchValue::Reference { .. } => true,
            SearchValue::Composite { .. } => false,
        }
    }
}

fn write_opt(f: &mut fmt::Formatter<'_>, value: &Option<impl fmt::Display>) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{}", v),
        None => Ok(()),
    }
}

impl fmt::Display for SearchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchValue::Number { low, high } => {
                if low.is_some() && low == high {
                    write_opt(f, low)
                } else {
                    write_opt(f, low)?;
                    f.write_str("..")?;
                    write_opt(f, high)
                }
            }
            SearchValue::DateTime { start, end, .. } => write!(
                f,
                "{}..{}",
                start.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                end.format("%Y-%m-%dT%H:%M:%S%.3fZ")
            ),
            SearchValue::String { text, .. } => f.write_str(text),
            SearchValue::Token { system, code, text } => {
                if let Some(system) = system {
                    write!(f, "{}|", system)?;
                }
                match (code, text) {
                    (Some(code), _) => f.write_str(code),
                    (None, Some(text)) => f.write_str(text),
                    (None, None) => Ok(()),
                }
            }
            SearchValue::Reference {
                base_uri,
                resource_type,
                resource_id,
                version,
            } => {
                write_opt(f, base_uri)?;
                if let Some(rt) = resource_type {
                    write!(f, "{}/", rt)?;
                }
                f.write_str(resource_id)?;
                if let Some(v) = version {
                    write!(f, "/_history/{}", v)?;
                }
                Ok(())
            }
            SearchValue::Quantity {
                system,
                code,
                low,
                high,
            } => {
                if low.is_some() && low == high {
                    write_opt(f, low)?;
                } else {
                    write_opt(f, low)?;
                    f.write_str("..")?;
                    write_opt(f, high)?;
                }
                f.write_str("|")?;
                write_opt(f, system)?;
                f.write_str("|")?;
                write_opt(f, code)
            }
            SearchValue::Uri { uri } => f.write_str(uri),
            SearchValue::Composite { components } => {
                for (i, alternatives) in components.iter().enumerate() {
                    if i > 0 {
                        f.write_str("$")?;
                    }
                    for (j, value) in alternatives.iter().enumerate() {
                        if j > 0 {
                            f.write_str(",")?;
                        }
                        write!(f, "{}", value)?;
                    }
                }
                Ok(())
            }
        }
    }
}
