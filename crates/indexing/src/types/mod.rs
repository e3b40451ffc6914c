//! Core types for the indexing layer.
//!
//! - [`SearchValue`] - Typed values produced by indexing
//! - [`SearchParamType`], [`SearchModifier`], [`SearchPrefix`] - Search parameter enums
//! - [`PartialDateTime`] - Dates written to less than full precision
//! - [`ContinuationToken`], [`ContinuationTokenCodec`] - Paging state
//!
//! # Examples
//!
//! ```
//! use helios_indexing::types::{PartialDateTime, SearchValue};
//!
//! let month: PartialDateTime = "2024-02".parse().unwrap();
//! let value = SearchValue::date(&month);
//!
//! assert_eq!(
//!     value.to_string(),
//!     "2024-02-01T00:00:00.000Z..2024-02-29T23:59:59.999Z"
//! );
//! ```

mod pagination;
mod partial_date;
mod search_params;
mod search_value;

pub use pagination::{
    Base64ContinuationTokenCodec, ContinuationToken, ContinuationTokenCodec, CursorValue,
};
pub use partial_date::{DatePrecision, PartialDateError, PartialDateTime};
pub use search_params::{
    IncludeModifier, SearchModifier, SearchParamType, SearchPrefix, SortDirection, SortDirective,
    SummaryMode, TotalMode,
};
pub use search_value::SearchValue;
