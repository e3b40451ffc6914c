//! Configuration for indexing, query compilation and store access.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration:
//!
//! ```json
//! {
//!   "search": { "max_item_count": 500, "include_total": "accurate" },
//!   "limits": { "string_max_indexed_length": 128 },
//!   "store": { "retry": { "max_retries": 5, "initial_delay": "250ms" } }
//! }
//! ```
//!
//! Durations use humantime notation (`"100ms"`, `"30s"`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LoaderError;
use crate::types::TotalMode;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Query compilation settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Column limits applied by row generators.
    #[serde(default)]
    pub limits: RowLimits,

    /// Store access settings.
    #[serde(default)]
    pub store: StoreConfig,
}

impl IndexingConfig {
    /// Reads a configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LoaderError::FileLoadFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| LoaderError::FileLoadFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.search.max_item_count == 0 {
            errors.push("Max item count cannot be 0".to_string());
        }
        if self.search.default_item_count == 0 {
            errors.push("Default item count cannot be 0".to_string());
        }
        if self.search.default_item_count > self.search.max_item_count {
            errors.push("Default item count cannot exceed max item count".to_string());
        }
        if self.search.include_total == TotalMode::Estimate {
            errors.push("Estimated totals are not supported".to_string());
        }
        if self.limits.string_max_indexed_length == 0 {
            errors.push("String max indexed length cannot be 0".to_string());
        }
        if self.limits.token_code_max_length == 0 {
            errors.push("Token code max length cannot be 0".to_string());
        }
        if self.limits.reference_id_max_length == 0 {
            errors.push("Reference id max length cannot be 0".to_string());
        }
        let multiplier = self.store.retry.backoff_multiplier;
        if !multiplier.is_finite() || !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&multiplier) {
            errors.push(format!(
                "Backoff multiplier must be between 1.0 and {}",
                MAX_BACKOFF_MULTIPLIER
            ));
        }
        if self.store.retry.initial_delay > self.store.retry.max_delay {
            errors.push("Initial retry delay cannot exceed max delay".to_string());
        }
        for (name, timeout) in [
            ("Command", self.store.command_timeout),
            ("Enqueue", self.store.enqueue_timeout),
            ("Dequeue", self.store.dequeue_timeout),
        ] {
            if timeout.is_zero() {
                errors.push(format!("{} timeout cannot be 0", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Query compilation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Page size when `_count` is absent.
    #[serde(default = "default_item_count")]
    pub default_item_count: usize,

    /// Ceiling applied to `_count` for interactive searches.
    #[serde(default = "default_max_item_count")]
    pub max_item_count: usize,

    /// Maximum number of included resources per page.
    #[serde(default = "default_include_count")]
    pub include_count: usize,

    /// Total mode used when the request does not ask for one.
    #[serde(default = "default_include_total")]
    pub include_total: TotalMode,

    /// Whether requests are strict unless they ask otherwise.
    #[serde(default)]
    pub strict_handling: bool,
}

fn default_item_count() -> usize {
    10
}

fn default_max_item_count() -> usize {
    1000
}

fn default_include_count() -> usize {
    1000
}

fn default_include_total() -> TotalMode {
    TotalMode::None
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_item_count: default_item_count(),
            max_item_count: default_max_item_count(),
            include_count: default_include_count(),
            include_total: default_include_total(),
            strict_handling: false,
        }
    }
}

/// Column limits applied by row generators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RowLimits {
    /// Characters of a string value stored in the indexed column.
    #[serde(default = "default_string_max_indexed_length")]
    pub string_max_indexed_length: usize,

    /// Characters of a token code stored in the indexed column.
    #[serde(default = "default_token_code_max_length")]
    pub token_code_max_length: usize,

    /// Characters of a reference target id stored.
    #[serde(default = "default_reference_id_max_length")]
    pub reference_id_max_length: usize,
}

fn default_string_max_indexed_length() -> usize {
    256
}

fn default_token_code_max_length() -> usize {
    256
}

fn default_reference_id_max_length() -> usize {
    64
}

impl Default for RowLimits {
    fn default() -> Self {
        Self {
            string_max_indexed_length: default_string_max_indexed_length(),
            token_code_max_length: default_token_code_max_length(),
            reference_id_max_length: default_reference_id_max_length(),
        }
    }
}

/// Store access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Retry behavior for retriable store errors.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Timeout for ordinary store commands.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub command_timeout: Duration,

    /// Timeout for enqueueing background work.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub enqueue_timeout: Duration,

    /// Timeout for dequeueing background work.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub dequeue_timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            command_timeout: default_timeout(),
            enqueue_timeout: default_timeout(),
            dequeue_timeout: default_timeout(),
        }
    }
}

/// Retry configuration for store operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries.
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = IndexingConfig::default();
        assert_eq!(config.search.default_item_count, 10);
        assert_eq!(config.search.max_item_count, 1000);
        assert_eq!(config.search.include_total, TotalMode::None);
        assert_eq!(config.limits.string_max_indexed_length, 256);
        assert_eq!(config.limits.reference_id_max_length, 64);
        assert_eq!(config.store.retry.max_retries, 3);
        assert_eq!(config.store.command_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: IndexingConfig = serde_json::from_str(
            r#"{
                "search": {"max_item_count": 500, "include_total": "accurate"},
                "store": {"retry": {"initial_delay": "250ms"}, "command_timeout": "1m"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.search.max_item_count, 500);
        assert_eq!(config.search.default_item_count, 10);
        assert_eq!(config.search.include_total, TotalMode::Accurate);
        assert_eq!(config.store.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.store.retry.max_delay, Duration::from_secs(5));
        assert_eq!(config.store.command_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_validate() {
        let mut config = IndexingConfig::default();
        config.search.default_item_count = 2000;
        config.store.retry.backoff_multiplier = 0.5;
        config.store.dequeue_timeout = Duration::ZERO;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("Dequeue")));

        let mut config = IndexingConfig::default();
        config.store.retry.backoff_multiplier = 1e30;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Backoff multiplier"));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"limits": {{"string_max_indexed_length": 128}}}}"#).unwrap();

        let config = IndexingConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.limits.string_max_indexed_length, 128);

        assert!(matches!(
            IndexingConfig::from_json_file("/nonexistent/config.json"),
            Err(LoaderError::FileLoadFailed { .. })
        ));
    }
}
