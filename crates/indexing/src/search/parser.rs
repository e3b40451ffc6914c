//! Per-parameter expression parsing.
//!
//! The query compiler hands every ordinary `key=value` pair to a
//! [`SearchExpressionParser`]. Recognized-but-unimplemented input is not an
//! error: the parser answers [`ParseOutcome::Unsupported`] and the compiler
//! records the pair as a warning (or rejects it in strict mode).
//!
//! # Value syntax
//!
//! | Kind | Examples |
//! |------|----------|
//! | string | `name=smi`, `name:exact=Smith`, `name:contains=mit` |
//! | token | `code=http://loinc.org\|8867-4`, `code=\|x`, `code=x`, `code:text=heart` |
//! | number | `probability=gt0.8`, `length=100` |
//! | date | `birthdate=ge2000-01`, `date=2024-01-15T10:00:00Z` |
//! | quantity | `value-quantity=5.4\|http://unitsofmeasure.org\|mg` |
//! | reference | `subject=Patient/123`, `subject:Patient=123` |
//! | uri | `url=http://example.org/fhir/ValueSet/x` |
//! | composite | `code-value-quantity=http://loinc.org\|8480-6$gt100` |
//!
//! Commas separate alternatives (`\,` is a literal comma) and every kind
//! accepts `:missing=true|false`.

use std::sync::Arc;

use rust_decimal::Decimal;

use super::expression::{Expression, FieldName, Operand, Operator};
use super::registry::{SearchParameterDefinition, SearchParameterDefinitionSource};
use crate::error::SearchError;
use crate::types::{PartialDateTime, SearchModifier, SearchParamType, SearchPrefix, SearchValue};

/// Result of parsing one query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// The parameter compiled to an expression.
    Supported(Expression),
    /// The parameter is valid syntax but cannot be searched here.
    Unsupported {
        /// The raw key.
        key: String,
        /// The raw value.
        value: String,
    },
}

impl ParseOutcome {
    fn unsupported(key: &str, value: &str) -> Self {
        ParseOutcome::Unsupported {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Compiles one query parameter to an expression.
pub trait SearchExpressionParser: Send + Sync {
    /// Parses `key=value` for a search over `resource_types`.
    ///
    /// Malformed values are a [`SearchError::BadRequest`]; parameters that
    /// cannot be searched are [`ParseOutcome::Unsupported`].
    fn parse(
        &self,
        resource_types: &[String],
        key: &str,
        value: &str,
    ) -> Result<ParseOutcome, SearchError>;
}

/// Parser over a definition source.
pub struct DefaultExpressionParser {
    definitions: Arc<dyn SearchParameterDefinitionSource>,
}

impl DefaultExpressionParser {
    /// Creates a parser resolving parameters from `definitions`.
    pub fn new(definitions: Arc<dyn SearchParameterDefinitionSource>) -> Self {
        Self { definitions }
    }

    /// Resolves a parameter code on every type; the first resolution wins.
    fn resolve(
        &self,
        resource_types: &[String],
        code: &str,
    ) -> Option<Arc<SearchParameterDefinition>> {
        let mut first = None;
        for rt in resource_types {
            let def = self.definitions.get_param(rt, code)?;
            first.get_or_insert(def);
        }
        first
    }

    fn parse_value(
        &self,
        def: &Arc<SearchParameterDefinition>,
        modifier: Option<&SearchModifier>,
        raw: &str,
    ) -> Result<Option<Expression>, SearchError> {
        let expr = match def.param_type {
            _ if def.is_resource_type_parameter() => {
                Expression::string_eq(FieldName::ResourceType, unescape(raw))
            }
            SearchParamType::String => {
                let text = unescape(raw);
                match modifier {
                    Some(SearchModifier::Exact) => Expression::string_eq(FieldName::String, text),
                    Some(SearchModifier::Contains) => {
                        Expression::compare_ignore_case(FieldName::String, Operator::Contains, text)
                    }
                    _ => Expression::compare_ignore_case(
                        FieldName::String,
                        Operator::StartsWith,
                        text,
                    ),
                }
            }
            SearchParamType::Token => {
                if modifier == Some(&SearchModifier::Text) {
                    Expression::compare_ignore_case(
                        FieldName::TokenText,
                        Operator::StartsWith,
                        unescape(raw),
                    )
                } else {
                    parse_token(raw)?
                }
            }
            SearchParamType::Number => {
                let (prefix, number) = SearchPrefix::extract(raw);
                check_prefix(prefix, def)?;
                let value = parse_decimal(number)?;
                let (lo, hi) = decimal_bounds(prefix, value);
                range_comparison(
                    prefix,
                    (FieldName::NumberLow, FieldName::NumberHigh),
                    Operand::Decimal(lo),
                    Operand::Decimal(hi),
                )
            }
            SearchParamType::Date => {
                let (prefix, date) = SearchPrefix::extract(raw);
                check_prefix(prefix, def)?;
                let partial: PartialDateTime = date
                    .parse()
                    .map_err(|e: crate::types::PartialDateError| {
                        SearchError::bad_request(e.to_string())
                    })?;
                range_comparison(
                    prefix,
                    (FieldName::DateTimeStart, FieldName::DateTimeEnd),
                    Operand::DateTime(partial.start()),
                    Operand::DateTime(partial.end()),
                )
            }
            SearchParamType::Quantity => parse_quantity(def, raw)?,
            SearchParamType::Reference => {
                let reference = unescape(raw);
                let target_type = match modifier {
                    Some(SearchModifier::Type(t)) => Some(t.as_str()),
                    _ => None,
                };
                parse_reference(&reference, target_type)?
            }
            SearchParamType::Uri => Expression::string_eq(FieldName::Uri, unescape(raw)),
            SearchParamType::Composite => return self.parse_composite(def, raw),
            SearchParamType::Special => return Ok(None),
        };
        Ok(Some(expr))
    }

    fn parse_composite(
        &self,
        def: &Arc<SearchParameterDefinition>,
        raw: &str,
    ) -> Result<Option<Expression>, SearchError> {
        let parts = split_escaped(raw, '$');
        if parts.len() != def.component.len() {
            return Err(SearchError::bad_request(format!(
                "Composite parameter '{}' expects {} components separated by '$', got '{}'",
                def.code,
                def.component.len(),
                raw
            )));
        }

        let mut components = Vec::with_capacity(parts.len());
        for (component, part) in def.component.iter().zip(parts) {
            let Ok(component_def) = self.definitions.resolve(&component.definition) else {
                return Ok(None);
            };
            if component_def.is_composite() {
                return Ok(None);
            }
            match self.parse_value(&component_def, None, part)? {
                Some(expr) => components.push(expr),
                None => return Ok(None),
            }
        }

        Ok(Some(Expression::Composite {
            definition: Arc::clone(def),
            components,
        }))
    }
}

impl SearchExpressionParser for DefaultExpressionParser {
    fn parse(
        &self,
        resource_types: &[String],
        key: &str,
        value: &str,
    ) -> Result<ParseOutcome, SearchError> {
        // Chained and reverse-chained parameters need joins we do not plan
        if key.starts_with("_has") || key.contains('.') {
            return Ok(ParseOutcome::unsupported(key, value));
        }

        let (code, modifier_str) = match key.split_once(':') {
            Some((code, modifier)) => (code, Some(modifier)),
            None => (key, None),
        };

        let Some(def) = self.resolve(resource_types, code) else {
            return Ok(ParseOutcome::unsupported(key, value));
        };
        if !def.is_searchable || !def.is_supported {
            return Ok(ParseOutcome::unsupported(key, value));
        }

        let modifier = match modifier_str {
            None => None,
            Some(m) => {
                let modifier = SearchModifier::parse(m).ok_or_else(|| {
                    SearchError::bad_request(format!("Unknown modifier ':{}' on '{}'", m, code))
                })?;
                if !modifier.is_valid_for(def.param_type) {
                    return Err(SearchError::bad_request(format!(
                        "Modifier ':{}' is not valid for {} parameter '{}'",
                        m, def.param_type, code
                    )));
                }
                Some(modifier)
            }
        };

        match &modifier {
            Some(SearchModifier::Missing) => {
                let missing = match value {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(SearchError::bad_request(format!(
                            "':missing' expects true or false, got '{}'",
                            other
                        )));
                    }
                };
                return Ok(ParseOutcome::Supported(Expression::Missing {
                    definition: def,
                    missing,
                }));
            }
            Some(
                SearchModifier::Above
                | SearchModifier::Below
                | SearchModifier::In
                | SearchModifier::NotIn
                | SearchModifier::Identifier,
            ) => return Ok(ParseOutcome::unsupported(key, value)),
            _ => {}
        }

        let mut alternatives = Vec::new();
        for raw in split_escaped(value, ',') {
            if raw.is_empty() {
                continue;
            }
            match self.parse_value(&def, modifier.as_ref(), raw)? {
                Some(expr) => alternatives.push(expr),
                None => return Ok(ParseOutcome::unsupported(key, value)),
            }
        }
        if alternatives.is_empty() {
            return Err(SearchError::bad_request(format!(
                "Parameter '{}' has no value",
                key
            )));
        }

        let expr = if def.is_composite() {
            Expression::or(alternatives)
        } else {
            Expression::parameter(def, Expression::or(alternatives))
        };

        Ok(ParseOutcome::Supported(match modifier {
            Some(SearchModifier::Not) => Expression::not(expr),
            _ => expr,
        }))
    }
}

impl std::fmt::Debug for DefaultExpressionParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultExpressionParser").finish_non_exhaustive()
    }
}

fn check_prefix(prefix: SearchPrefix, def: &SearchParameterDefinition) -> Result<(), SearchError> {
    if prefix.is_valid_for(def.param_type) {
        Ok(())
    } else {
        Err(SearchError::bad_request(format!(
            "Prefix '{}' is not valid for {} parameter '{}'",
            prefix, def.param_type, def.code
        )))
    }
}

/// Maps a prefix onto comparisons of a stored `[low, high]` range against
/// the implicit range `[lo, hi]` of the search value.
fn range_comparison(
    prefix: SearchPrefix,
    (low_field, high_field): (FieldName, FieldName),
    lo: Operand,
    hi: Operand,
) -> Expression {
    let cmp = Expression::compare;
    match prefix {
        SearchPrefix::Eq | SearchPrefix::Ap => Expression::And(vec![
            cmp(low_field, Operator::Ge, lo),
            cmp(high_field, Operator::Le, hi),
        ]),
        SearchPrefix::Ne => Expression::not(Expression::And(vec![
            cmp(low_field, Operator::Ge, lo),
            cmp(high_field, Operator::Le, hi),
        ])),
        SearchPrefix::Gt => cmp(high_field, Operator::Gt, hi),
        SearchPrefix::Ge => cmp(high_field, Operator::Ge, lo),
        SearchPrefix::Lt => cmp(low_field, Operator::Lt, lo),
        SearchPrefix::Le => cmp(low_field, Operator::Le, hi),
        SearchPrefix::Sa => cmp(low_field, Operator::Gt, hi),
        SearchPrefix::Eb => cmp(high_field, Operator::Lt, lo),
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, SearchError> {
    s.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|_| SearchError::bad_request(format!("'{}' is not a valid number", s)))
}

/// Implicit range of a number: half a unit of its last significant digit,
/// or 10% for `ap`.
fn decimal_bounds(prefix: SearchPrefix, value: Decimal) -> (Decimal, Decimal) {
    let half_unit = Decimal::new(5, value.scale() + 1);
    let delta = if prefix == SearchPrefix::Ap {
        (value.abs() * Decimal::new(1, 1)).max(half_unit)
    } else {
        half_unit
    };
    (value - delta, value + delta)
}

fn parse_token(raw: &str) -> Result<Expression, SearchError> {
    let parts = split_escaped(raw, '|');
    let expr = match parts.as_slice() {
        [code] => Expression::string_eq(FieldName::TokenCode, unescape(code)),
        // `|code` matches codes without a system
        ["", code] => Expression::And(vec![
            Expression::string_eq(FieldName::TokenSystem, ""),
            Expression::string_eq(FieldName::TokenCode, unescape(code)),
        ]),
        [system, ""] => Expression::string_eq(FieldName::TokenSystem, unescape(system)),
        [system, code] => Expression::And(vec![
            Expression::string_eq(FieldName::TokenSystem, unescape(system)),
            Expression::string_eq(FieldName::TokenCode, unescape(code)),
        ]),
        _ => {
            return Err(SearchError::bad_request(format!(
                "'{}' is not a valid token",
                raw
            )));
        }
    };
    Ok(expr)
}

fn parse_quantity(def: &SearchParameterDefinition, raw: &str) -> Result<Expression, SearchError> {
    let parts = split_escaped(raw, '|');
    if parts.len() != 1 && parts.len() != 3 {
        return Err(SearchError::bad_request(format!(
            "'{}' is not a valid quantity, expected number|system|code",
            raw
        )));
    }

    let (prefix, number) = SearchPrefix::extract(parts[0]);
    check_prefix(prefix, def)?;
    let value = parse_decimal(number)?;
    let (lo, hi) = decimal_bounds(prefix, value);

    let mut terms = vec![range_comparison(
        prefix,
        (FieldName::QuantityLow, FieldName::QuantityHigh),
        Operand::Decimal(lo),
        Operand::Decimal(hi),
    )];
    if let [_, system, code] = parts.as_slice() {
        if !system.is_empty() {
            terms.push(Expression::string_eq(
                FieldName::QuantitySystem,
                unescape(system),
            ));
        }
        if !code.is_empty() {
            terms.push(Expression::string_eq(FieldName::QuantityCode, unescape(code)));
        }
    }
    Ok(Expression::and(terms))
}

fn parse_reference(reference: &str, target_type: Option<&str>) -> Result<Expression, SearchError> {
    let Some(SearchValue::Reference {
        base_uri,
        resource_type,
        resource_id,
        ..
    }) = SearchValue::reference(reference)
    else {
        return Err(SearchError::bad_request(format!(
            "'{}' is not a valid reference",
            reference
        )));
    };

    let mut terms = Vec::new();
    if let Some(base) = base_uri {
        terms.push(Expression::string_eq(FieldName::ReferenceBaseUri, base));
    }
    if let Some(rt) = resource_type.as_deref().or(target_type) {
        terms.push(Expression::string_eq(FieldName::ReferenceResourceType, rt));
    }
    terms.push(Expression::string_eq(
        FieldName::ReferenceResourceId,
        resource_id,
    ));
    Ok(Expression::and(terms))
}

/// Splits on `sep` unless escaped with a backslash. Escapes are kept.
fn split_escaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::registry::{SearchParameterRegistryBuilder, SortParameterStatus};

    const CODE: &str = "http://hl7.org/fhir/SearchParameter/clinical-code";
    const VALUE_QUANTITY: &str = "http://hl7.org/fhir/SearchParameter/Observation-value-quantity";

    fn parser() -> DefaultExpressionParser {
        let mut builder = SearchParameterRegistryBuilder::new().with_core_parameters();
        builder
            .register_all(vec![
                SearchParameterDefinition::new(
                    "http://hl7.org/fhir/SearchParameter/individual-family",
                    "family",
                    SearchParamType::String,
                    "Patient.name.family",
                )
                .with_base(["Patient"])
                .with_sort_status(SortParameterStatus::Enabled),
                SearchParameterDefinition::new(
                    "http://hl7.org/fhir/SearchParameter/individual-birthdate",
                    "birthdate",
                    SearchParamType::Date,
                    "Patient.birthDate",
                )
                .with_base(["Patient"]),
                SearchParameterDefinition::new(CODE, "code", SearchParamType::Token, "Observation.code")
                    .with_base(["Observation"]),
                SearchParameterDefinition::new(
                    VALUE_QUANTITY,
                    "value-quantity",
                    SearchParamType::Quantity,
                    "Observation.value.ofType(Quantity)",
                )
                .with_base(["Observation"]),
                SearchParameterDefinition::new(
                    "http://hl7.org/fhir/SearchParameter/Observation-subject",
                    "subject",
                    SearchParamType::Reference,
                    "Observation.subject",
                )
                .with_base(["Observation"]),
                SearchParameterDefinition::new(
                    "http://hl7.org/fhir/SearchParameter/Observation-code-value-quantity",
                    "code-value-quantity",
                    SearchParamType::Composite,
                    "Observation",
                )
                .with_base(["Observation"])
                .with_component(CODE, "code")
                .with_component(VALUE_QUANTITY, "value.ofType(Quantity)"),
            ])
            .unwrap();
        DefaultExpressionParser::new(Arc::new(builder.build()))
    }

    fn types(t: &str) -> Vec<String> {
        vec![t.to_string()]
    }

    fn supported(rt: &str, key: &str, value: &str) -> String {
        match parser().parse(&types(rt), key, value).unwrap() {
            ParseOutcome::Supported(expr) => expr.to_string(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_string() {
        assert_eq!(
            supported("Patient", "family", "smi"),
            "(Param family (StringStartsWith String \"smi\" IgnoreCase))"
        );
        assert_eq!(
            supported("Patient", "family:exact", "Smith"),
            "(Param family (Eq String \"Smith\"))"
        );
        assert_eq!(
            supported("Patient", "family", "a,b\\,c"),
            "(Param family (Or (StringStartsWith String \"a\" IgnoreCase) (StringStartsWith String \"b,c\" IgnoreCase)))"
        );
    }

    #[test]
    fn test_token() {
        assert_eq!(
            supported("Observation", "code", "http://loinc.org|8867-4"),
            "(Param code (And (Eq TokenSystem \"http://loinc.org\") (Eq TokenCode \"8867-4\")))"
        );
        assert_eq!(
            supported("Observation", "code:not", "x"),
            "(Not (Param code (Eq TokenCode \"x\")))"
        );
        assert_eq!(
            supported("Observation", "code:text", "heart"),
            "(Param code (StringStartsWith TokenText \"heart\" IgnoreCase))"
        );
    }

    #[test]
    fn test_date_prefixes() {
        assert_eq!(
            supported("Patient", "birthdate", "2000"),
            "(Param birthdate (And (Ge DateTimeStart 2000-01-01T00:00:00.000Z) (Le DateTimeEnd 2000-12-31T23:59:59.999Z)))"
        );
        assert_eq!(
            supported("Patient", "birthdate", "gt2000"),
            "(Param birthdate (Gt DateTimeEnd 2000-12-31T23:59:59.999Z))"
        );
        assert_eq!(
            supported("Patient", "birthdate", "sa2000"),
            "(Param birthdate (Gt DateTimeStart 2000-12-31T23:59:59.999Z))"
        );
        assert_eq!(
            supported("Patient", "birthdate", "eb2000"),
            "(Param birthdate (Lt DateTimeEnd 2000-01-01T00:00:00.000Z))"
        );
    }

    #[test]
    fn test_quantity() {
        assert_eq!(
            supported("Observation", "value-quantity", "5.4|http://unitsofmeasure.org|mg"),
            "(Param value-quantity (And (And (Ge QuantityLow 5.35) (Le QuantityHigh 5.45)) (Eq QuantitySystem \"http://unitsofmeasure.org\") (Eq QuantityCode \"mg\")))"
        );
    }

    #[test]
    fn test_reference() {
        assert_eq!(
            supported("Observation", "subject", "Patient/123"),
            "(Param subject (And (Eq ReferenceResourceType \"Patient\") (Eq ReferenceResourceId \"123\")))"
        );
        assert_eq!(
            supported("Observation", "subject:Patient", "123"),
            "(Param subject (And (Eq ReferenceResourceType \"Patient\") (Eq ReferenceResourceId \"123\")))"
        );
    }

    #[test]
    fn test_composite() {
        assert_eq!(
            supported("Observation", "code-value-quantity", "http://loinc.org|8480-6$gt100"),
            "(Composite code-value-quantity (And (Eq TokenSystem \"http://loinc.org\") (Eq TokenCode \"8480-6\")) (Gt QuantityHigh 100.5))"
        );

        let err = parser()
            .parse(&types("Observation"), "code-value-quantity", "x")
            .unwrap_err();
        assert!(matches!(err, SearchError::BadRequest { .. }));
    }

    #[test]
    fn test_missing() {
        assert_eq!(
            supported("Patient", "family:missing", "true"),
            "(Missing family true)"
        );
        assert!(
            parser()
                .parse(&types("Patient"), "family:missing", "yes")
                .is_err()
        );
    }

    #[test]
    fn test_unsupported() {
        let parser = parser();
        for (key, value) in [
            ("unknown", "x"),
            ("subject.name", "x"),
            ("_has:Observation:patient:code", "x"),
            ("code:in", "http://example.org/vs"),
        ] {
            assert_eq!(
                parser.parse(&types("Observation"), key, value).unwrap(),
                ParseOutcome::unsupported(key, value),
                "{}",
                key
            );
        }
    }

    #[test]
    fn test_malformed_values() {
        let parser = parser();
        assert!(parser.parse(&types("Patient"), "birthdate", "yesterday").is_err());
        assert!(parser.parse(&types("Patient"), "birthdate", "zz2000").is_err());
        assert!(parser.parse(&types("Patient"), "family:bogus", "x").is_err());
        assert!(parser.parse(&types("Patient"), "family:text", "x").is_err());
        assert!(parser.parse(&types("Observation"), "value-quantity", "abc").is_err());
    }

    #[test]
    fn test_parameter_must_exist_on_every_type() {
        let parser = parser();
        let both = vec!["Patient".to_string(), "Observation".to_string()];
        assert!(matches!(
            parser.parse(&both, "family", "x").unwrap(),
            ParseOutcome::Unsupported { .. }
        ));
        assert!(matches!(
            parser.parse(&both, "_id", "x").unwrap(),
            ParseOutcome::Supported(_)
        ));
    }

    #[test]
    fn test_type_parameter() {
        assert_eq!(
            supported("Resource", "_type", "Patient,Observation"),
            "(Param _type (Or (Eq ResourceType \"Patient\") (Eq ResourceType \"Observation\")))"
        );
    }
}
