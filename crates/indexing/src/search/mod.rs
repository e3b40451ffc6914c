//! Search parameter definitions, indexing and query compilation.
//!
//! This module provides:
//!
//! - [`registry`] - Immutable registry of SearchParameter definitions
//! - [`loader`] - Parses SearchParameter resources and bundles
//! - [`evaluator`] - Path evaluation over JSON resources
//! - [`converters`] - Conversion from evaluated elements to [`SearchValue`](crate::types::SearchValue)s
//! - [`extractor`] - Produces the index entries for a resource
//! - [`expression`] - Filter expression tree
//! - [`parser`] - Parses one query key/value pair into an expression
//! - [`params`] - Syntactic validation of result-shaping parameters
//! - [`sort`] - Sort eligibility
//! - [`factory`] - Compiles a whole request into [`SearchOptions`]
//! - [`errors`] - Search-specific error types
//!
//! # Write and read paths
//!
//! ```text
//! resource JSON ──> SearchIndexer ──> Vec<SearchIndexEntry> ──> rows
//!
//! query string ──> SearchOptionsFactory ──> SearchOptions
//!                     ├── SearchParameterValidator
//!                     ├── SearchExpressionParser
//!                     └── SortingValidator
//! ```

pub mod converters;
pub mod errors;
pub mod evaluator;
pub mod expression;
pub mod extractor;
pub mod factory;
pub mod loader;
pub mod options;
pub mod params;
pub mod parser;
pub mod registry;
pub mod sort;

// Re-export main types
pub use converters::{Converter, ConverterRegistry};
pub use errors::{ExtractionError, LoaderError, RegistryError};
pub use evaluator::{
    ElementType, EvaluationError, ExpressionEvaluator, JsonPathEvaluator, TypedElement,
};
pub use expression::{Expression, FieldName, Operand, Operator};
pub use extractor::{SearchIndexEntry, SearchIndexer};
pub use factory::{SearchOptionsFactory, SearchRequest};
pub use loader::SearchParameterLoader;
pub use options::{IncludeExpression, IssueSeverity, SearchIssue, SearchOptions};
pub use params::{ControlParameter, IncludeRequest, SearchParameterValidator};
pub use parser::{DefaultExpressionParser, ParseOutcome, SearchExpressionParser};
pub use registry::{
    CompositeComponentDef, SearchParameterDefinition, SearchParameterDefinitionSource,
    SearchParameterRegistry, SearchParameterRegistryBuilder, SearchParameterSource,
    SearchParameterStatus, SortParameterStatus,
};
pub use sort::{DefaultSortingValidator, SortingValidator};
