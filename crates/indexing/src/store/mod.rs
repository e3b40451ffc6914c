//! Store boundary.
//!
//! - [`classifier`] - maps store error codes to [`StoreError`](crate::error::StoreError)
//! - [`retry`] - retries retriable errors with backoff, timeouts and cancellation

pub mod classifier;
pub mod retry;

pub use classifier::{DatabaseError, StoreErrorClassifier};
pub use retry::{OperationKind, RetryPolicy};
