//! Sort eligibility.

use std::sync::Arc;

use super::registry::{SearchParameterDefinition, SortParameterStatus};
use crate::types::{SearchParamType, SortDirection};

/// Checks whether resolved sort keys can be sorted on.
pub trait SortingValidator: Send + Sync {
    /// Validates the requested sort keys, returning one message per problem.
    fn validate(
        &self,
        sorting: &[(Arc<SearchParameterDefinition>, SortDirection)],
    ) -> Result<(), Vec<String>>;
}

/// Accepts parameters whose sort status is enabled and whose kind has a
/// single comparable value per row.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSortingValidator;

impl DefaultSortingValidator {
    /// Creates the validator.
    pub fn new() -> Self {
        Self
    }
}

impl SortingValidator for DefaultSortingValidator {
    fn validate(
        &self,
        sorting: &[(Arc<SearchParameterDefinition>, SortDirection)],
    ) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (def, _) in sorting {
            let sortable_kind = matches!(
                def.param_type,
                SearchParamType::String
                    | SearchParamType::Date
                    | SearchParamType::Number
                    | SearchParamType::Quantity
                    | SearchParamType::Token
            );

            if !sortable_kind {
                errors.push(format!(
                    "Sorting by {} parameter '{}' is not supported",
                    def.param_type, def.code
                ));
            } else if def.sort_status != SortParameterStatus::Enabled {
                errors.push(format!("Sorting by '{}' is not enabled", def.code));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
