//! Token and token text rows.

use std::sync::Arc;

use serde::Serialize;

use super::model::ModelIdResolver;
use super::{RowGenerator, RowKey, split_indexed};
use crate::types::SearchValue;

/// A token search row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TokenRow {
    /// Shared columns.
    #[serde(flatten)]
    pub key: RowKey,
    /// Code system id.
    pub system_id: Option<i32>,
    /// Indexed code prefix.
    pub code: String,
    /// Full code when it does not fit in the indexed column.
    pub code_overflow: Option<String>,
}

/// Generates [`TokenRow`]s. Tokens without a code are declined.
#[derive(Clone)]
pub struct TokenRowGenerator {
    ids: Arc<dyn ModelIdResolver>,
    max_code_length: usize,
}

impl TokenRowGenerator {
    /// Creates a generator.
    pub fn new(ids: Arc<dyn ModelIdResolver>, max_code_length: usize) -> Self {
        Self {
            ids,
            max_code_length,
        }
    }
}

impl RowGenerator for TokenRowGenerator {
    type Row = TokenRow;

    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<TokenRow> {
        let SearchValue::Token { system, code, .. } = value else {
            return None;
        };
        let code = code.as_deref().filter(|c| !c.trim().is_empty())?;

        let (code, code_overflow) = split_indexed(code, self.max_code_length);
        Some(TokenRow {
            key,
            system_id: system.as_deref().map(|s| self.ids.system_id(s)),
            code,
            code_overflow,
        })
    }

    fn dedup_key(&self, row: &TokenRow) -> TokenRow {
        TokenRow {
            code: row.code.to_lowercase(),
            code_overflow: row.code_overflow.as_ref().map(|c| c.to_lowercase()),
            ..row.clone()
        }
    }
}

impl std::fmt::Debug for TokenRowGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRowGenerator")
            .field("max_code_length", &self.max_code_length)
            .finish_non_exhaustive()
    }
}

/// A row backing `:text` token searches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TokenTextRow {
    /// Shared columns.
    #[serde(flatten)]
    pub key: RowKey,
    /// Display text.
    pub text: String,
}

/// Generates [`TokenTextRow`]s from the display text of tokens.
#[derive(Debug, Clone, Copy)]
pub struct TokenTextRowGenerator {
    max_indexed_length: usize,
}

impl TokenTextRowGenerator {
    /// Creates a generator. Text beyond the column width is cut.
    pub fn new(max_indexed_length: usize) -> Self {
        Self { max_indexed_length }
    }
}

impl RowGenerator for TokenTextRowGenerator {
    type Row = TokenTextRow;

    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<TokenTextRow> {
        let SearchValue::Token { text, .. } = value else {
            return None;
        };
        let text = text.as_deref().filter(|t| !t.trim().is_empty())?;

        Some(TokenTextRow {
            key,
            text: split_indexed(text, self.max_indexed_length).0,
        })
    }

    fn dedup_key(&self, row: &TokenTextRow) -> TokenTextRow {
        TokenTextRow {
            key: row.key,
            text: row.text.to_lowercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::rows::model::InMemoryModelIds;

    const KEY: RowKey = RowKey {
        resource_type_id: 1,
        resource_surrogate_id: 100,
        search_param_id: 9,
    };

    fn generator() -> TokenRowGenerator {
        TokenRowGenerator::new(Arc::new(InMemoryModelIds::new()), 4)
    }

    fn token(system: Option<&str>, code: Option<&str>, text: Option<&str>) -> SearchValue {
        SearchValue::token(
            system.map(str::to_string),
            code.map(str::to_string),
            text.map(str::to_string),
        )
    }

    #[test]
    fn test_token_row() {
        let row = generator()
            .try_generate(KEY, &token(Some("http://loinc.org"), Some("8867-4"), None))
            .unwrap();
        assert!(row.system_id.is_some());
        assert_eq!(row.code, "8867");
        assert_eq!(row.code_overflow.as_deref(), Some("8867-4"));
    }

    #[test]
    fn test_token_without_code_declined() {
        let generator = generator();
        assert!(
            generator
                .try_generate(KEY, &token(Some("http://loinc.org"), None, None))
                .is_none()
        );
        assert!(
            generator
                .try_generate(KEY, &token(None, Some(" "), None))
                .is_none()
        );
    }

    #[test]
    fn test_token_dedup() {
        let generator = generator();
        let mut seen = HashSet::new();
        assert!(
            generator
                .generate(KEY, &token(None, Some("male"), None), Some(&mut seen))
                .is_some()
        );
        assert!(
            generator
                .generate(KEY, &token(None, Some("MALE"), None), Some(&mut seen))
                .is_none()
        );
    }

    #[test]
    fn test_token_text_row() {
        let generator = TokenTextRowGenerator::new(256);
        let mut seen = HashSet::new();
        let row = generator
            .generate(KEY, &token(None, Some("x"), Some("Heart rate")), Some(&mut seen))
            .unwrap();
        assert_eq!(row.text, "Heart rate");
        assert!(
            generator
                .generate(KEY, &token(None, Some("y"), Some("heart RATE")), Some(&mut seen))
                .is_none()
        );
        assert!(
            generator
                .try_generate(KEY, &token(None, Some("x"), None))
                .is_none()
        );
    }
}
