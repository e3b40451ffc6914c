//! Compiled search expressions.
//!
//! An [`Expression`] is a boolean tree over search parameters. Leaves compare
//! one indexed field of a parameter against an operand; the query engine
//! decides how that maps onto its storage.
//!
//! `Display` renders an S-expression, which is what logs and tests compare:
//!
//! ```text
//! (And (Param family (StringStartsWith String "smi" IgnoreCase)) (Param _type (Eq ResourceType "Patient")))
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::registry::SearchParameterDefinition;

/// An indexed field a leaf expression compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FieldName {
    /// Resource type stored on every row.
    ResourceType,
    /// Lower bound of a number.
    NumberLow,
    /// Upper bound of a number.
    NumberHigh,
    /// Start of a date range.
    DateTimeStart,
    /// End of a date range.
    DateTimeEnd,
    /// String value.
    String,
    /// Token system.
    TokenSystem,
    /// Token code.
    TokenCode,
    /// Token display text.
    TokenText,
    /// Quantity lower bound.
    QuantityLow,
    /// Quantity upper bound.
    QuantityHigh,
    /// Quantity unit system.
    QuantitySystem,
    /// Quantity unit code.
    QuantityCode,
    /// Reference service base.
    ReferenceBaseUri,
    /// Reference target type.
    ReferenceResourceType,
    /// Reference target id.
    ReferenceResourceId,
    /// URI value.
    Uri,
}

/// Comparison operator of a leaf expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operator {
    /// Equal.
    Eq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// String prefix match.
    StartsWith,
    /// String containment.
    Contains,
}

/// Operand of a leaf expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Operand {
    /// Text operand.
    String(String),
    /// Decimal operand.
    Decimal(Decimal),
    /// Instant operand.
    DateTime(DateTime<Utc>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::String(s) => write!(f, "\"{}\"", s),
            Operand::Decimal(d) => write!(f, "{}", d),
            Operand::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
        }
    }
}

/// A compiled search expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expression {
    /// Compares one field.
    Compare {
        /// Field compared.
        field: FieldName,
        /// Operator.
        op: Operator,
        /// Right-hand side.
        operand: Operand,
        /// Whether string comparison ignores case.
        ignore_case: bool,
    },

    /// Applies an expression to the values of one parameter.
    Parameter {
        /// The parameter.
        #[serde(serialize_with = "serialize_code")]
        definition: Arc<SearchParameterDefinition>,
        /// Condition on a single indexed value.
        inner: Box<Expression>,
    },

    /// Matches resources with (`missing == false`) or without a value.
    Missing {
        /// The parameter.
        #[serde(serialize_with = "serialize_code")]
        definition: Arc<SearchParameterDefinition>,
        /// True to select resources without a value.
        missing: bool,
    },

    /// Conditions on the components of one composite row.
    Composite {
        /// The composite parameter.
        #[serde(serialize_with = "serialize_code")]
        definition: Arc<SearchParameterDefinition>,
        /// One condition per component, in component order.
        components: Vec<Expression>,
    },

    /// Restricts to resources in a compartment.
    Compartment {
        /// Compartment type, e.g. `Patient`.
        compartment_type: String,
        /// Compartment owner id.
        compartment_id: String,
    },

    /// All must match.
    And(Vec<Expression>),

    /// Any must match.
    Or(Vec<Expression>),

    /// Must not match.
    Not(Box<Expression>),
}

fn serialize_code<S>(def: &Arc<SearchParameterDefinition>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&def.code)
}

impl Expression {
    /// Creates a leaf comparison.
    pub fn compare(field: FieldName, op: Operator, operand: Operand) -> Self {
        Expression::Compare {
            field,
            op,
            operand,
            ignore_case: false,
        }
    }

    /// Creates a case-insensitive leaf comparison.
    pub fn compare_ignore_case(field: FieldName, op: Operator, value: impl Into<String>) -> Self {
        Expression::Compare {
            field,
            op,
            operand: Operand::String(value.into()),
            ignore_case: true,
        }
    }

    /// Creates a string equality leaf.
    pub fn string_eq(field: FieldName, value: impl Into<String>) -> Self {
        Self::compare(field, Operator::Eq, Operand::String(value.into()))
    }

    /// Wraps a value condition with its parameter.
    pub fn parameter(definition: Arc<SearchParameterDefinition>, inner: Expression) -> Self {
        Expression::Parameter {
            definition,
            inner: Box::new(inner),
        }
    }

    /// Conjunction that collapses single-element lists.
    pub fn and(mut expressions: Vec<Expression>) -> Self {
        if expressions.len() == 1 {
            expressions.remove(0)
        } else {
            Expression::And(expressions)
        }
    }

    /// Disjunction that collapses single-element lists.
    pub fn or(mut expressions: Vec<Expression>) -> Self {
        if expressions.len() == 1 {
            expressions.remove(0)
        } else {
            Expression::Or(expressions)
        }
    }

    /// Negation.
    pub fn not(expression: Expression) -> Self {
        Expression::Not(Box::new(expression))
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, head: &str, items: &[Expression]) -> fmt::Result {
    write!(f, "({}", head)?;
    for item in items {
        write!(f, " {}", item)?;
    }
    f.write_str(")")
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Compare {
                field,
                op,
                operand,
                ignore_case,
            } => {
                let op = match op {
                    Operator::StartsWith => "StringStartsWith",
                    Operator::Contains => "StringContains",
                    Operator::Eq => "Eq",
                    Operator::Gt => "Gt",
                    Operator::Ge => "Ge",
                    Operator::Lt => "Lt",
                    Operator::Le => "Le",
                };
                write!(f, "({} {:?} {}", op, field, operand)?;
                if *ignore_case {
                    f.write_str(" IgnoreCase")?;
                }
                f.write_str(")")
            }
            Expression::Parameter { definition, inner } => {
                write!(f, "(Param {} {})", definition.code, inner)
            }
            Expression::Missing {
                definition,
                missing,
            } => write!(f, "(Missing {} {})", definition.code, missing),
            Expression::Composite {
                definition,
                components,
            } => write_list(f, &format!("Composite {}", definition.code), components),
            Expression::Compartment {
                compartment_type,
                compartment_id,
            } => write!(f, "(Compartment {} \"{}\")", compartment_type, compartment_id),
            Expression::And(items) => write_list(f, "And", items),
            Expression::Or(items) => write_list(f, "Or", items),
            Expression::Not(inner) => write!(f, "(Not {})", inner),
        }
    }
}
