//! Helios FHIR Server Search Indexing Layer
//!
//! This crate turns FHIR resources into typed search index facts, compiles
//! FHIR search query strings into query plans, and turns index facts into the
//! compact, deduplicated rows consumed by a relational bulk upsert.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`types`] - Search value kinds, search parameter enums and pagination tokens
//! - [`search`] - Definition registry, path evaluation, indexing and query compilation
//! - [`rows`] - Per-kind row generators, surrogate ids and batch assembly
//! - [`codec`] - Compressed resource payload encoding
//! - [`transaction`] - Ordering of transaction bundle entries
//! - [`store`] - Store error classification and retry policy
//! - [`config`] - Configuration for all of the above
//! - [`error`] - Error types for all operations
//!
//! # Write path
//!
//! ```
//! use std::sync::Arc;
//! use helios_indexing::search::{
//!     JsonPathEvaluator, SearchIndexer, SearchParameterDefinition,
//!     SearchParameterRegistryBuilder,
//! };
//! use helios_indexing::types::SearchParamType;
//! use serde_json::json;
//!
//! let mut builder = SearchParameterRegistryBuilder::new().with_core_parameters();
//! builder
//!     .register(
//!         SearchParameterDefinition::new(
//!             "http://hl7.org/fhir/SearchParameter/individual-family",
//!             "family",
//!             SearchParamType::String,
//!             "Patient.name.family",
//!         )
//!         .with_base(["Patient"]),
//!     )
//!     .unwrap();
//! let registry = Arc::new(builder.build());
//!
//! let indexer = SearchIndexer::new(registry, Arc::new(JsonPathEvaluator::new()));
//! let entries = indexer
//!     .extract(&json!({
//!         "resourceType": "Patient",
//!         "id": "p1",
//!         "name": [{"family": "Chalmers"}]
//!     }))
//!     .unwrap();
//!
//! assert!(entries.iter().any(|e| e.definition.code == "family"));
//! ```
//!
//! # Read path
//!
//! Query strings are compiled by [`search::SearchOptionsFactory`], which
//! delegates individual key/value pairs to an injected
//! [`search::SearchExpressionParser`] and recovers from unsupported parameters
//! unless strict handling is requested.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod codec;
pub mod config;
pub mod error;
pub mod rows;
pub mod search;
pub mod store;
pub mod transaction;
pub mod types;

// Re-export commonly used types at crate root
pub use codec::ResourceCodec;
pub use config::IndexingConfig;
pub use error::{IndexingError, IndexingResult, SearchError, StoreError};
pub use rows::RowBatch;
pub use search::{SearchIndexEntry, SearchIndexer, SearchOptions, SearchOptionsFactory};
pub use types::{SearchParamType, SearchValue};

/// Initializes the tracing subscriber for logging.
///
/// This should be called once at application startup.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
#[cfg(feature = "cli")]
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_indexing={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
