//! Search-specific error types.
//!
//! This module provides error types for the write side of search:
//! - Loading and parsing SearchParameter resources
//! - Registry construction
//! - Path evaluation and value extraction

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error during SearchParameter loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoaderError {
    /// Invalid SearchParameter resource structure.
    InvalidResource {
        /// Description of what was invalid.
        message: String,
        /// URL of the problematic parameter, if known.
        url: Option<String>,
    },

    /// Missing required field in SearchParameter.
    MissingField {
        /// Name of the missing field.
        field: String,
        /// URL of the parameter.
        url: Option<String>,
    },

    /// The `type` element names no known search parameter kind.
    UnknownType {
        /// The unrecognized type code.
        type_code: String,
        /// URL of the parameter.
        url: Option<String>,
    },

    /// Failed to read a definitions file.
    FileLoadFailed {
        /// Path to the file.
        path: String,
        /// Error message.
        message: String,
    },
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::InvalidResource { message, url } => {
                if let Some(url) = url {
                    write!(f, "Invalid SearchParameter '{}': {}", url, message)
                } else {
                    write!(f, "Invalid SearchParameter: {}", message)
                }
            }
            LoaderError::MissingField { field, url } => {
                if let Some(url) = url {
                    write!(
                        f,
                        "SearchParameter '{}' missing required field '{}'",
                        url, field
                    )
                } else {
                    write!(f, "SearchParameter missing required field '{}'", field)
                }
            }
            LoaderError::UnknownType { type_code, url } => match url {
                Some(url) => write!(
                    f,
                    "SearchParameter '{}' has unknown type '{}'",
                    url, type_code
                ),
                None => write!(f, "SearchParameter has unknown type '{}'", type_code),
            },
            LoaderError::FileLoadFailed { path, message } => {
                write!(f, "Failed to load definitions from '{}': {}", path, message)
            }
        }
    }
}

impl std::error::Error for LoaderError {}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::InvalidResource {
            message: err.to_string(),
            url: None,
        }
    }
}

/// Error during registry construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryError {
    /// A definition with the same identity was already registered.
    Duplicate {
        /// URL, or `code (type): expression` for definitions without a URL.
        identity: String,
    },

    /// Definition not found in registry.
    NotFound {
        /// The URL or code that was not found.
        identifier: String,
    },

    /// Invalid parameter definition.
    InvalidDefinition {
        /// Description of the problem.
        message: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Duplicate { identity } => {
                write!(f, "SearchParameter '{}' is already registered", identity)
            }
            RegistryError::NotFound { identifier } => {
                write!(f, "SearchParameter '{}' not found", identifier)
            }
            RegistryError::InvalidDefinition { message } => {
                write!(f, "Invalid SearchParameter definition: {}", message)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Error during value extraction.
///
/// The indexer never propagates these for a single parameter; they are
/// logged and the offending fact is omitted. Only a resource that is not a
/// JSON object at all fails the whole extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtractionError {
    /// Path evaluation failed.
    EvaluationFailed {
        /// The parameter code.
        param_name: String,
        /// The path expression.
        expression: String,
        /// Error message.
        error: String,
    },

    /// Value conversion failed.
    ConversionFailed {
        /// The parameter code.
        param_name: String,
        /// The expected kind.
        expected_type: String,
        /// What was actually found.
        actual_value: String,
    },

    /// No converter exists for the element type and parameter kind.
    UnsupportedType {
        /// The parameter code.
        param_name: String,
        /// The unsupported element type.
        value_type: String,
    },

    /// A composite component definition could not be resolved.
    UnresolvedComponent {
        /// The composite parameter code.
        param_name: String,
        /// The component definition URL.
        component_url: String,
    },

    /// Resource is not a valid JSON object.
    InvalidResource {
        /// Description of the problem.
        message: String,
    },
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::EvaluationFailed {
                param_name,
                expression,
                error,
            } => {
                write!(
                    f,
                    "Failed to evaluate '{}' for parameter '{}': {}",
                    expression, param_name, error
                )
            }
            ExtractionError::ConversionFailed {
                param_name,
                expected_type,
                actual_value,
            } => {
                write!(
                    f,
                    "Cannot convert '{}' to {} for parameter '{}'",
                    actual_value, expected_type, param_name
                )
            }
            ExtractionError::UnsupportedType {
                param_name,
                value_type,
            } => {
                write!(
                    f,
                    "Unsupported value type '{}' for parameter '{}'",
                    value_type, param_name
                )
            }
            ExtractionError::UnresolvedComponent {
                param_name,
                component_url,
            } => {
                write!(
                    f,
                    "Composite parameter '{}' references unknown component '{}'",
                    param_name, component_url
                )
            }
            ExtractionError::InvalidResource { message } => {
                write!(f, "Invalid resource: {}", message)
            }
        }
    }
}

impl std::error::Error for ExtractionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_error_display() {
        let err = LoaderError::MissingField {
            field: "expression".to_string(),
            url: Some("http://example.org/SearchParameter/test".to_string()),
        };
        assert!(err.to_string().contains("expression"));
        assert!(err.to_string().contains("test"));
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::Duplicate {
            identity: "http://example.org/sp".to_string(),
        };
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_extraction_error_display() {
        let err = ExtractionError::UnresolvedComponent {
            param_name: "code-value-quantity".to_string(),
            component_url: "http://example.org/sp/missing".to_string(),
        };
        assert!(err.to_string().contains("code-value-quantity"));
        assert!(err.to_string().contains("missing"));
    }
}
