//! Composite rows.
//!
//! A composite row is assembled from component rows built by the single-kind
//! generators under the reserved component parameter id. The supported
//! layouts are fixed; [`CompositeShape::from_kinds`] maps a tuple of
//! component kinds to one of them.
//!
//! A composite value carries a list of alternatives per component. One row is
//! attempted per element of the cartesian product of those lists; if any
//! component row is declined the combination is skipped.

use std::collections::HashSet;

use serde::Serialize;

use super::date::{DateTimeRow, DateTimeRowGenerator};
use super::number::{NumberRow, NumberRowGenerator};
use super::quantity::{QuantityRow, QuantityRowGenerator};
use super::reference::{ReferenceRow, ReferenceRowGenerator};
use super::string::{StringRow, StringRowGenerator};
use super::token::{TokenRow, TokenRowGenerator};
use super::{RowGenerator, RowKey};
use crate::types::{SearchParamType, SearchValue};

/// Supported composite layouts, by component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompositeShape {
    /// reference $ token
    ReferenceToken,
    /// token $ token
    TokenToken,
    /// token $ date
    TokenDateTime,
    /// token $ quantity
    TokenQuantity,
    /// token $ string
    TokenString,
    /// token $ number $ number
    TokenNumberNumber,
}

impl CompositeShape {
    /// Returns the layout for a tuple of component kinds.
    pub fn from_kinds(kinds: &[SearchParamType]) -> Option<Self> {
        use SearchParamType::*;

        match kinds {
            [Reference, Token] => Some(CompositeShape::ReferenceToken),
            [Token, Token] => Some(CompositeShape::TokenToken),
            [Token, Date] => Some(CompositeShape::TokenDateTime),
            [Token, Quantity] => Some(CompositeShape::TokenQuantity),
            [Token, String] => Some(CompositeShape::TokenString),
            [Token, Number, Number] => Some(CompositeShape::TokenNumberNumber),
            _ => None,
        }
    }

    /// Number of components.
    pub fn arity(self) -> usize {
        match self {
            CompositeShape::TokenNumberNumber => 3,
            _ => 2,
        }
    }
}

/// Component rows of a composite, one variant per [`CompositeShape`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum CompositeComponents {
    /// reference $ token
    ReferenceToken(ReferenceRow, TokenRow),
    /// token $ token
    TokenToken(TokenRow, TokenRow),
    /// token $ date
    TokenDateTime(TokenRow, DateTimeRow),
    /// token $ quantity
    TokenQuantity(TokenRow, QuantityRow),
    /// token $ string
    TokenString(TokenRow, StringRow),
    /// token $ number $ number
    TokenNumberNumber(TokenRow, NumberRow, NumberRow),
}

impl CompositeComponents {
    /// Returns the layout.
    pub fn shape(&self) -> CompositeShape {
        match self {
            CompositeComponents::ReferenceToken(..) => CompositeShape::ReferenceToken,
            CompositeComponents::TokenToken(..) => CompositeShape::TokenToken,
            CompositeComponents::TokenDateTime(..) => CompositeShape::TokenDateTime,
            CompositeComponents::TokenQuantity(..) => CompositeShape::TokenQuantity,
            CompositeComponents::TokenString(..) => CompositeShape::TokenString,
            CompositeComponents::TokenNumberNumber(..) => CompositeShape::TokenNumberNumber,
        }
    }
}

/// A composite search row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CompositeRow {
    /// Shared columns, carrying the composite parameter's id.
    #[serde(flatten)]
    pub key: RowKey,
    /// Component rows.
    pub components: CompositeComponents,
}

enum ComponentRow {
    String(StringRow),
    Token(TokenRow),
    Number(NumberRow),
    Quantity(QuantityRow),
    DateTime(DateTimeRow),
    Reference(ReferenceRow),
}

/// Generates [`CompositeRow`]s by delegating to the single-kind generators.
#[derive(Debug, Clone)]
pub struct CompositeRowGenerator {
    string: StringRowGenerator,
    token: TokenRowGenerator,
    number: NumberRowGenerator,
    quantity: QuantityRowGenerator,
    date: DateTimeRowGenerator,
    reference: ReferenceRowGenerator,
}

impl CompositeRowGenerator {
    /// Creates a generator from the component generators.
    pub fn new(
        string: StringRowGenerator,
        token: TokenRowGenerator,
        quantity: QuantityRowGenerator,
        reference: ReferenceRowGenerator,
    ) -> Self {
        Self {
            string,
            token,
            number: NumberRowGenerator,
            quantity,
            date: DateTimeRowGenerator,
            reference,
        }
    }

    /// Generates one row per combination of component alternatives.
    ///
    /// Combinations with a declined component, and rows already in `seen`,
    /// are skipped.
    pub fn generate_all(
        &self,
        key: RowKey,
        value: &SearchValue,
        mut seen: Option<&mut HashSet<CompositeRow>>,
    ) -> Vec<CompositeRow> {
        let SearchValue::Composite { components } = value else {
            return Vec::new();
        };

        let mut rows = Vec::new();
        for combination in cartesian_product(components) {
            let single = SearchValue::Composite {
                components: combination.into_iter().map(|v| vec![v.clone()]).collect(),
            };
            if let Some(row) = self.generate(key, &single, seen.as_deref_mut()) {
                rows.push(row);
            }
        }
        rows
    }

    fn component(&self, key: RowKey, value: &SearchValue) -> Option<ComponentRow> {
        let key = key.component();
        match value {
            SearchValue::String { .. } => {
                self.string.try_generate(key, value).map(ComponentRow::String)
            }
            SearchValue::Token { .. } => {
                self.token.try_generate(key, value).map(ComponentRow::Token)
            }
            SearchValue::Number { .. } => {
                self.number.try_generate(key, value).map(ComponentRow::Number)
            }
            SearchValue::Quantity { .. } => {
                self.quantity.try_generate(key, value).map(ComponentRow::Quantity)
            }
            SearchValue::DateTime { .. } => {
                self.date.try_generate(key, value).map(ComponentRow::DateTime)
            }
            SearchValue::Reference { .. } => {
                self.reference.try_generate(key, value).map(ComponentRow::Reference)
            }
            SearchValue::Uri { .. } | SearchValue::Composite { .. } => None,
        }
    }
}

impl RowGenerator for CompositeRowGenerator {
    type Row = CompositeRow;

    /// Builds the row for a composite value holding exactly one alternative
    /// per component.
    fn try_generate(&self, key: RowKey, value: &SearchValue) -> Option<CompositeRow> {
        let SearchValue::Composite { components } = value else {
            return None;
        };
        let values = components
            .iter()
            .map(|alternatives| match alternatives.as_slice() {
                [single] => Some(single),
                _ => None,
            })
            .collect::<Option<Vec<&SearchValue>>>()?;

        let kinds: Vec<SearchParamType> = values.iter().map(|v| v.param_type()).collect();
        let shape = CompositeShape::from_kinds(&kinds)?;

        let parts = values
            .iter()
            .map(|v| self.component(key, v))
            .collect::<Option<Vec<ComponentRow>>>()?;

        Some(CompositeRow {
            key,
            components: assemble(shape, parts)?,
        })
    }
}

fn assemble(shape: CompositeShape, parts: Vec<ComponentRow>) -> Option<CompositeComponents> {
    use ComponentRow as C;

    if parts.len() != shape.arity() {
        return None;
    }
    let mut parts = parts.into_iter();
    let first = parts.next()?;
    let second = parts.next()?;

    let components = match (shape, first, second) {
        (CompositeShape::ReferenceToken, C::Reference(a), C::Token(b)) => {
            CompositeComponents::ReferenceToken(a, b)
        }
        (CompositeShape::TokenToken, C::Token(a), C::Token(b)) => {
            CompositeComponents::TokenToken(a, b)
        }
        (CompositeShape::TokenDateTime, C::Token(a), C::DateTime(b)) => {
            CompositeComponents::TokenDateTime(a, b)
        }
        (CompositeShape::TokenQuantity, C::Token(a), C::Quantity(b)) => {
            CompositeComponents::TokenQuantity(a, b)
        }
        (CompositeShape::TokenString, C::Token(a), C::String(b)) => {
            CompositeComponents::TokenString(a, b)
        }
        (CompositeShape::TokenNumberNumber, C::Token(a), C::Number(b)) => match parts.next()? {
            C::Number(c) => CompositeComponents::TokenNumberNumber(a, b, c),
            _ => return None,
        },
        _ => return None,
    };
    Some(components)
}

/// Every combination of one element from each list.
fn cartesian_product<T>(lists: &[Vec<T>]) -> Vec<Vec<&T>> {
    let mut combinations: Vec<Vec<&T>> = vec![Vec::new()];
    for list in lists {
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                list.iter().map(move |item| {
                    let mut next = prefix.clone();
                    next.push(item);
                    next
                })
            })
            .collect();
    }
    if lists.is_empty() {
        return Vec::new();
    }
    combinations
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::*;
    use crate::rows::COMPOSITE_COMPONENT_PARAM_ID;
    use crate::rows::model::InMemoryModelIds;

    const KEY: RowKey = RowKey {
        resource_type_id: 3,
        resource_surrogate_id: 100,
        search_param_id: 12,
    };

    fn generator() -> CompositeRowGenerator {
        let ids = Arc::new(InMemoryModelIds::new().with_resource_types(["Patient"]));
        CompositeRowGenerator::new(
            StringRowGenerator::new(256),
            TokenRowGenerator::new(ids.clone(), 256),
            QuantityRowGenerator::new(ids.clone()),
            ReferenceRowGenerator::new(ids, 64),
        )
    }

    fn code(c: &str) -> SearchValue {
        SearchValue::token(Some("http://loinc.org".to_string()), Some(c.to_string()), None)
    }

    fn kg(n: i64) -> SearchValue {
        SearchValue::quantity(Decimal::from(n), None, Some("kg".to_string()))
    }

    #[test]
    fn test_shapes() {
        use SearchParamType::*;
        assert_eq!(
            CompositeShape::from_kinds(&[Token, Quantity]),
            Some(CompositeShape::TokenQuantity)
        );
        assert_eq!(
            CompositeShape::from_kinds(&[Token, Number, Number]).map(CompositeShape::arity),
            Some(3)
        );
        assert_eq!(CompositeShape::from_kinds(&[Uri, Token]), None);
    }

    #[test]
    fn test_single_row() {
        let value = SearchValue::Composite {
            components: vec![vec![code("29463-7")], vec![kg(70)]],
        };
        let row = generator().try_generate(KEY, &value).unwrap();
        assert_eq!(row.key, KEY);
        match row.components {
            CompositeComponents::TokenQuantity(token, quantity) => {
                assert_eq!(token.code, "29463-7");
                assert_eq!(token.key.search_param_id, COMPOSITE_COMPONENT_PARAM_ID);
                assert_eq!(quantity.single_value, Some(Decimal::from(70)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cartesian_product() {
        let value = SearchValue::Composite {
            components: vec![vec![code("a"), code("b")], vec![kg(1), kg(2), kg(3)]],
        };
        let rows = generator().generate_all(KEY, &value, None);
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|r| r.components.shape() == CompositeShape::TokenQuantity));
    }

    #[test]
    fn test_declined_component_skips_combination() {
        let no_code = SearchValue::token(Some("http://loinc.org".to_string()), None, None);
        let value = SearchValue::Composite {
            components: vec![vec![no_code, code("b")], vec![kg(1)]],
        };
        assert_eq!(generator().generate_all(KEY, &value, None).len(), 1);

        let empty = SearchValue::Composite {
            components: vec![vec![code("a")], vec![]],
        };
        assert!(generator().generate_all(KEY, &empty, None).is_empty());
    }

    #[test]
    fn test_dedup_within_batch() {
        let generator = generator();
        let mut seen = HashSet::new();
        let value = SearchValue::Composite {
            components: vec![vec![code("a")], vec![kg(1)]],
        };
        assert_eq!(generator.generate_all(KEY, &value, Some(&mut seen)).len(), 1);
        assert!(generator.generate_all(KEY, &value, Some(&mut seen)).is_empty());
    }

    #[test]
    fn test_multiple_alternatives_need_expansion() {
        let value = SearchValue::Composite {
            components: vec![vec![code("a"), code("b")], vec![kg(1)]],
        };
        assert!(generator().try_generate(KEY, &value).is_none());
    }
}
