//! Syntactic validation of query parameters.
//!
//! [`SearchParameterValidator`] rejects malformed values before anything is
//! resolved against definitions. Result-shaping parameters (`_count`,
//! `_sort`, `_summary`, `_elements`, `_include`, `_revinclude`) come back as
//! a [`ControlParameter`]; everything else is left for the expression parser.

use std::str::FromStr;

use crate::error::SearchError;
use crate::types::{IncludeModifier, SortDirective, SummaryMode};

/// `_count`
pub const COUNT: &str = "_count";
/// `_sort`
pub const SORT: &str = "_sort";
/// `_summary`
pub const SUMMARY: &str = "_summary";
/// `_elements`
pub const ELEMENTS: &str = "_elements";
/// `_include`
pub const INCLUDE: &str = "_include";
/// `_revinclude`
pub const REVINCLUDE: &str = "_revinclude";

/// An `_include` or `_revinclude` directive as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeRequest {
    /// True for `_revinclude`.
    pub reversed: bool,
    /// `:iterate` / `:recurse` modifier.
    pub modifier: IncludeModifier,
    /// Resource type holding the reference.
    pub source_type: String,
    /// Reference parameter code, `*` for all.
    pub parameter: String,
    /// Explicit target type, if given.
    pub target_type: Option<String>,
}

/// A parameter that shapes the result rather than filtering it.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlParameter {
    /// `_count`
    Count(usize),
    /// `_sort`
    Sort(Vec<SortDirective>),
    /// `_summary`
    Summary(SummaryMode),
    /// `_elements`
    Elements(Vec<String>),
    /// `_include` / `_revinclude`
    Include(IncludeRequest),
}

/// Basic syntactic validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchParameterValidator;

impl SearchParameterValidator {
    /// Creates the validator.
    pub fn new() -> Self {
        Self
    }

    /// Validates one pair, returning the control parameter it denotes, if any.
    pub fn validate(&self, key: &str, value: &str) -> Result<Option<ControlParameter>, SearchError> {
        let (name, modifier) = match key.split_once(':') {
            Some((name, modifier)) => (name, Some(modifier)),
            None => (key, None),
        };

        let control = match name {
            COUNT => {
                reject_modifier(key, modifier)?;
                let count = value.trim().parse::<usize>().map_err(|_| {
                    SearchError::bad_request(format!(
                        "_count must be a non-negative integer, got '{}'",
                        value
                    ))
                })?;
                ControlParameter::Count(count)
            }
            SORT => {
                reject_modifier(key, modifier)?;
                let mut directives = Vec::new();
                for item in value.split(',') {
                    let directive = SortDirective::parse(item.trim());
                    if directive.parameter.is_empty() {
                        return Err(SearchError::bad_request(format!(
                            "_sort contains an empty parameter: '{}'",
                            value
                        )));
                    }
                    directives.push(directive);
                }
                ControlParameter::Sort(directives)
            }
            SUMMARY => {
                reject_modifier(key, modifier)?;
                ControlParameter::Summary(
                    SummaryMode::from_str(value).map_err(SearchError::bad_request)?,
                )
            }
            ELEMENTS => {
                reject_modifier(key, modifier)?;
                let elements: Vec<String> = value
                    .split(',')
                    .map(|e| e.trim().to_string())
                    .collect();
                if elements.iter().any(|e| !is_element_name(e)) {
                    return Err(SearchError::bad_request(format!(
                        "_elements contains an invalid element name: '{}'",
                        value
                    )));
                }
                ControlParameter::Elements(elements)
            }
            INCLUDE | REVINCLUDE => {
                let modifier = match modifier {
                    None => IncludeModifier::None,
                    Some(m) => IncludeModifier::parse(m).ok_or_else(|| {
                        SearchError::bad_request(format!("Unknown modifier on '{}'", key))
                    })?,
                };
                ControlParameter::Include(parse_include(name == REVINCLUDE, modifier, value)?)
            }
            _ => {
                if !key.chars().all(is_key_char) {
                    return Err(SearchError::bad_request(format!(
                        "'{}' is not a valid parameter name",
                        key
                    )));
                }
                return Ok(None);
            }
        };

        Ok(Some(control))
    }
}

fn reject_modifier(key: &str, modifier: Option<&str>) -> Result<(), SearchError> {
    match modifier {
        Some(_) => Err(SearchError::bad_request(format!(
            "'{}' does not accept modifiers",
            key
        ))),
        None => Ok(()),
    }
}

fn parse_include(
    reversed: bool,
    modifier: IncludeModifier,
    value: &str,
) -> Result<IncludeRequest, SearchError> {
    let parts: Vec<&str> = value.split(':').collect();
    let (source_type, parameter, target_type) = match parts.as_slice() {
        [source, parameter] => (*source, *parameter, None),
        [source, parameter, target] => (*source, *parameter, Some(target.to_string())),
        _ => {
            return Err(SearchError::bad_request(format!(
                "'{}' is not a valid include, expected SourceType:parameter[:TargetType]",
                value
            )));
        }
    };
    if parameter.is_empty() {
        return Err(SearchError::bad_request(format!(
            "Include '{}' has no parameter",
            value
        )));
    }

    Ok(IncludeRequest {
        reversed,
        modifier,
        source_type: source_type.to_string(),
        parameter: parameter.to_string(),
        target_type,
    })
}

fn is_element_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '$')
}
