//! Error types for the indexing layer.
//!
//! This module defines the error hierarchy used throughout the crate. Client
//! input errors raised while compiling a search, classified store failures and
//! codec failures each get their own enum, aggregated by [`IndexingError`].
//! Indexing and loading errors live in [`crate::search::errors`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

pub use crate::search::errors::{ExtractionError, LoaderError, RegistryError};

/// The primary error type for all indexing operations.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Search compilation errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Value extraction errors
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Registry errors
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Definition loading errors
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// Resource payload encoding errors
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Classified store errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A model id is missing for a resource type or search parameter
    #[error("no {kind} id is registered for '{name}'")]
    UnknownModelId { kind: &'static str, name: String },

    /// The operation was cancelled before it started
    #[error("operation was cancelled")]
    Cancelled,
}

/// Errors raised while compiling a search request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// Malformed query syntax.
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// A structurally invalid combination of parameters or directives.
    #[error("invalid search operation: {message}")]
    InvalidSearchOperation { message: String },

    /// The resource type is not known to the server.
    #[error("resource type '{resource_type}' is not supported")]
    ResourceTypeNotSupported { resource_type: String },

    /// Recognized syntax for a feature that is not implemented.
    #[error("search operation not supported: {message}")]
    SearchOperationNotSupported { message: String },

    /// The search parameter is unknown or not supported for the resource types.
    #[error("search parameter '{name}' is not supported for resource type(s) {resource_types}")]
    SearchParameterNotSupported { name: String, resource_types: String },

    /// The continuation token could not be decoded.
    #[error("invalid continuation token")]
    InvalidContinuationToken { token: String },
}

impl SearchError {
    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        SearchError::BadRequest {
            message: message.into(),
        }
    }

    /// Creates an invalid search operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        SearchError::InvalidSearchOperation {
            message: message.into(),
        }
    }

    /// Creates a resource type not supported error.
    pub fn resource_type_not_supported(resource_type: impl Into<String>) -> Self {
        SearchError::ResourceTypeNotSupported {
            resource_type: resource_type.into(),
        }
    }

    /// Returns the HTTP status code this error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            SearchError::ResourceTypeNotSupported { .. } => 404,
            SearchError::SearchOperationNotSupported { .. } => 403,
            _ => 400,
        }
    }
}

/// Errors raised by the resource payload codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to compress resource: {0}")]
    Compress(#[source] std::io::Error),

    #[error("failed to decompress resource: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("resource payload is not valid UTF-8: {0}")]
    Encoding(#[source] std::str::Utf8Error),
}

/// A store error reporting that data would have been truncated.
///
/// Kept as a distinct type so callers can match on it without inspecting
/// codes; the store's original message is preserved verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TruncationError {
    pub code: i32,
    pub message: String,
}

/// Closed taxonomy of store failures.
///
/// Every low-level store error is mapped to one of these variants by
/// [`crate::store::StoreErrorClassifier`] before it leaves the store boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store request timed out: {message}")]
    Timeout { message: String },

    #[error("operation not allowed by the store: {message}")]
    MethodNotAllowed { message: String },

    #[error("the store could not produce a query plan: {message}")]
    QueryPlanFailure { message: String },

    #[error("authentication with the store failed: {message}")]
    AuthenticationFailure { message: String },

    #[error("request is not valid: {message}")]
    RequestInvalid { message: String },

    #[error("customer-managed key is not available ({code}): {message}")]
    CustomerManagedKeyFailure { code: i32, message: String },

    #[error(transparent)]
    Truncation(#[from] TruncationError),

    #[error("transient store failure ({code}): {message}")]
    Transient { code: i32, message: String },

    #[error("internal store error ({code}): {message}")]
    Internal { code: i32, message: String },

    #[error("store operation timed out after {timeout_ms}ms")]
    OperationTimeout { timeout_ms: u64 },

    #[error("store operation was cancelled")]
    Cancelled,
}

impl StoreError {
    /// Returns true if the retry policy may retry this error.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StoreError::Transient { .. } | StoreError::AuthenticationFailure { .. }
        )
    }
}

/// Result type alias for indexing operations.
pub type IndexingResult<T> = Result<T, IndexingError>;

/// Result type alias for search compilation.
pub type SearchResult<T> = Result<T, SearchError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
