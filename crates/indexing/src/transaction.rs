//! Ordering of transaction bundle entries.
//!
//! Entries of a transaction bundle are executed by verb class so that later
//! entries can see the effects of earlier ones:
//!
//! ```text
//! DELETE < POST < PUT = PATCH < GET = HEAD < anything else
//! ```
//!
//! The sort is stable, so entries of the same class keep their bundle order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP method of a bundle entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BundleMethod {
    /// DELETE - Delete operation.
    Delete,
    /// POST - Create operation.
    Post,
    /// PUT - Update or create operation.
    Put,
    /// PATCH - Partial update operation.
    Patch,
    /// GET - Read operation.
    Get,
    /// HEAD - Read operation without a body.
    Head,
}

impl BundleMethod {
    /// Parses a method name, case-insensitively.
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "DELETE" => Some(BundleMethod::Delete),
            "POST" => Some(BundleMethod::Post),
            "PUT" => Some(BundleMethod::Put),
            "PATCH" => Some(BundleMethod::Patch),
            "GET" => Some(BundleMethod::Get),
            "HEAD" => Some(BundleMethod::Head),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            BundleMethod::Delete => 0,
            BundleMethod::Post => 1,
            BundleMethod::Put | BundleMethod::Patch => 2,
            BundleMethod::Get | BundleMethod::Head => 3,
        }
    }
}

impl std::fmt::Display for BundleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleMethod::Delete => write!(f, "DELETE"),
            BundleMethod::Post => write!(f, "POST"),
            BundleMethod::Put => write!(f, "PUT"),
            BundleMethod::Patch => write!(f, "PATCH"),
            BundleMethod::Get => write!(f, "GET"),
            BundleMethod::Head => write!(f, "HEAD"),
        }
    }
}

/// Rank given to methods that are not recognized.
const UNKNOWN_RANK: u8 = 4;

/// Compares two method names by execution order.
pub fn compare_methods(a: &str, b: &str) -> Ordering {
    let rank = |m: &str| BundleMethod::parse(m).map_or(UNKNOWN_RANK, BundleMethod::rank);
    rank(a).cmp(&rank(b))
}

/// One entry of a transaction bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEntry {
    /// Position in the bundle.
    pub index: usize,
    /// `request.method` as written.
    pub method: String,
    /// `request.url`.
    pub url: String,
    /// The entry's resource, if any.
    pub resource: Option<Value>,
}

impl TransactionEntry {
    /// Creates an entry.
    pub fn new(index: usize, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            index,
            method: method.into(),
            url: url.into(),
            resource: None,
        }
    }

    /// Returns the parsed method, if recognized.
    pub fn bundle_method(&self) -> Option<BundleMethod> {
        BundleMethod::parse(&self.method)
    }

    /// Reads the entries of a Bundle resource. Entries without a request
    /// get an empty method and so sort last.
    pub fn from_bundle(bundle: &Value) -> Vec<Self> {
        let Some(entries) = bundle.get("entry").and_then(Value::as_array) else {
            return Vec::new();
        };

        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let request = entry.get("request");
                let field = |name: &str| {
                    request
                        .and_then(|r| r.get(name))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                TransactionEntry {
                    index,
                    method: field("method"),
                    url: field("url"),
                    resource: entry.get("resource").cloned(),
                }
            })
            .collect()
    }
}

/// Compares two possibly absent entries.
///
/// Absent entries sort first and are equal to each other; an entry is
/// always equal to itself.
pub fn compare_entries(a: Option<&TransactionEntry>, b: Option<&TransactionEntry>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) if std::ptr::eq(a, b) => Ordering::Equal,
        (Some(a), Some(b)) => compare_methods(&a.method, &b.method),
    }
}

/// Sorts entries into execution order.
pub fn order_entries(entries: &mut [TransactionEntry]) {
    entries.sort_by(|a, b| compare_entries(Some(a), Some(b)));
}
