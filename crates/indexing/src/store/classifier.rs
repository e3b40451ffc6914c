//! Store error classification.
//!
//! Low-level store failures carry a numeric error code. The classifier maps
//! each code to a [`StoreError`] variant from a fixed table and logs the
//! classification once.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{StoreError, TruncationError};

/// A failure reported by the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseError {
    /// Store error number.
    pub code: i32,
    /// Store error message.
    pub message: String,
}

impl DatabaseError {
    /// Creates an error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for DatabaseError {}

/// Error codes by classification.
pub mod codes {
    /// Client-side execution timeout.
    pub const TIMEOUT: i32 = -2;
    /// Operation rejected by the store's method policy.
    pub const METHOD_NOT_ALLOWED: i32 = 50405;
    /// The optimizer could not produce a plan.
    pub const QUERY_PLAN_FAILURE: i32 = 8623;
    /// Login failed.
    pub const LOGIN_FAILED: i32 = 18456;
    /// Too many parameters in one request.
    pub const TOO_MANY_PARAMETERS: i32 = 8003;
    /// Customer-managed key unavailable.
    pub const CUSTOMER_MANAGED_KEY: [i32; 3] = [40925, 40926, 40927];
    /// Data would be truncated.
    pub const TRUNCATION: [i32; 2] = [8152, 2628];
    /// Deadlock, unavailability, throttling and transport failures.
    pub const TRANSIENT: [i32; 11] = [
        1205, 40613, 40501, 40197, 49918, 49919, 49920, 4060, 233, 64, 10054,
    ];
}

/// Maps store error codes to [`StoreError`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreErrorClassifier;

impl StoreErrorClassifier {
    /// Creates the classifier.
    pub fn new() -> Self {
        Self
    }

    /// Classifies a store failure.
    pub fn classify(&self, err: &DatabaseError) -> StoreError {
        let message = err.message.clone();
        let code = err.code;

        let classified = match code {
            codes::TIMEOUT => StoreError::Timeout { message },
            codes::METHOD_NOT_ALLOWED => StoreError::MethodNotAllowed { message },
            codes::QUERY_PLAN_FAILURE => StoreError::QueryPlanFailure { message },
            codes::LOGIN_FAILED => StoreError::AuthenticationFailure { message },
            codes::TOO_MANY_PARAMETERS => StoreError::RequestInvalid { message },
            c if codes::CUSTOMER_MANAGED_KEY.contains(&c) => {
                StoreError::CustomerManagedKeyFailure { code, message }
            }
            c if codes::TRUNCATION.contains(&c) => TruncationError { code, message }.into(),
            c if codes::TRANSIENT.contains(&c) => StoreError::Transient { code, message },
            _ => StoreError::Internal { code, message },
        };

        if classified.is_retriable() {
            warn!(code, error = %classified, "Store error classified as retriable");
        } else {
            error!(code, error = %classified, "Store error");
        }

        classified
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreErrorClassifier.classify(&err)
    }
}
