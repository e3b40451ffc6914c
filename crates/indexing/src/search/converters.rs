//! Conversion of evaluated elements into search values.
//!
//! [`ConverterRegistry::lookup`] is a dispatch table keyed by
//! ([`ElementType`], [`SearchParamType`]). A missing entry means the element
//! cannot be indexed for that kind of parameter.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use super::evaluator::ElementType;
use crate::types::{PartialDateTime, SearchParamType, SearchValue};

/// System URI for currency codes on `Money`.
pub const CURRENCY_SYSTEM: &str = "urn:iso:std:iso:4217";

/// Signature of a conversion function.
pub type ConvertFn = fn(&Value) -> Result<Vec<SearchValue>, String>;

/// A converter for one (element type, parameter kind) pair.
#[derive(Clone, Copy)]
pub struct Converter {
    /// Name used in diagnostics.
    pub name: &'static str,
    convert: ConvertFn,
}

impl Converter {
    const fn new(name: &'static str, convert: ConvertFn) -> Self {
        Self { name, convert }
    }

    /// Converts one element. A converter may produce several values.
    pub fn convert(&self, value: &Value) -> Result<Vec<SearchValue>, String> {
        (self.convert)(value)
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter").field("name", &self.name).finish()
    }
}

/// Lookup table of converters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConverterRegistry;

impl ConverterRegistry {
    /// Creates the registry.
    pub fn new() -> Self {
        Self
    }

    /// Finds the converter for an element type and target kind.
    pub fn lookup(&self, element: ElementType, target: SearchParamType) -> Option<Converter> {
        use ElementType as E;
        use SearchParamType as P;

        let converter = match (target, element) {
            (P::String, E::String | E::Markdown | E::Code | E::Id | E::Uri | E::Url) => {
                Converter::new("string", string_primitive)
            }
            (P::String, E::HumanName) => Converter::new("human-name", human_name),
            (P::String, E::Address) => Converter::new("address", address),

            (P::Token, E::String | E::Code | E::Id | E::Uri | E::Url | E::Canonical) => {
                Converter::new("code", code_token)
            }
            (P::Token, E::Boolean) => Converter::new("boolean", boolean_token),
            (P::Token, E::Coding) => Converter::new("coding", coding_token),
            (P::Token, E::CodeableConcept) => {
                Converter::new("codeable-concept", codeable_concept_tokens)
            }
            (P::Token, E::Identifier) => Converter::new("identifier", identifier_token),
            (P::Token, E::ContactPoint) => Converter::new("contact-point", contact_point_token),

            (P::Date, E::String | E::Date | E::DateTime | E::Instant) => {
                Converter::new("date", date_primitive)
            }
            (P::Date, E::Period) => Converter::new("period", period),
            (P::Date, E::Timing) => Converter::new("timing", timing),

            (P::Number, E::Integer | E::Decimal) => Converter::new("number", number_primitive),
            (P::Number, E::Range) => Converter::new("number-range", number_range),

            (P::Quantity, E::Quantity) => Converter::new("quantity", quantity),
            (P::Quantity, E::Money) => Converter::new("money", money),
            (P::Quantity, E::Range) => Converter::new("quantity-range", quantity_range),

            (P::Reference, E::Reference) => Converter::new("reference", reference_object),
            (P::Reference, E::String | E::Canonical | E::Uri | E::Url) => {
                Converter::new("canonical", reference_string)
            }

            (P::Uri, E::String | E::Uri | E::Url | E::Canonical | E::Code | E::Id) => {
                Converter::new("uri", uri_primitive)
            }

            _ => return None,
        };

        Some(converter)
    }
}

fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn owned_field(value: &Value, field: &str) -> Option<String> {
    str_field(value, field).map(str::to_string)
}

fn expect_str<'a>(value: &'a Value, what: &str) -> Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected {} string, found {}", what, value))
}

fn string_primitive(value: &Value) -> Result<Vec<SearchValue>, String> {
    let text = expect_str(value, "a")?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![SearchValue::string(text)])
}

/// Collects string and string-array fields into string values.
fn collect_strings(value: &Value, fields: &[&str]) -> Vec<SearchValue> {
    let mut out = Vec::new();
    for field in fields {
        match value.get(*field) {
            Some(Value::String(s)) if !s.trim().is_empty() => out.push(SearchValue::string(s)),
            Some(Value::Array(items)) => out.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .map(SearchValue::string),
            ),
            _ => {}
        }
    }
    out
}

fn human_name(value: &Value) -> Result<Vec<SearchValue>, String> {
    Ok(collect_strings(
        value,
        &["family", "given", "text", "prefix", "suffix"],
    ))
}

fn address(value: &Value) -> Result<Vec<SearchValue>, String> {
    Ok(collect_strings(
        value,
        &[
            "line",
            "city",
            "district",
            "state",
            "postalCode",
            "country",
            "text",
        ],
    ))
}

fn code_token(value: &Value) -> Result<Vec<SearchValue>, String> {
    let code = expect_str(value, "a code")?;
    if code.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![SearchValue::token_code(code)])
}

fn boolean_token(value: &Value) -> Result<Vec<SearchValue>, String> {
    let b = value
        .as_bool()
        .ok_or_else(|| format!("expected a boolean, found {}", value))?;
    Ok(vec![SearchValue::token_code(b.to_string())])
}

fn coding(value: &Value) -> Option<SearchValue> {
    let system = owned_field(value, "system");
    let code = owned_field(value, "code");
    let display = owned_field(value, "display");
    if system.is_none() && code.is_none() && display.is_none() {
        return None;
    }
    Some(SearchValue::token(system, code, display))
}

fn coding_token(value: &Value) -> Result<Vec<SearchValue>, String> {
    Ok(coding(value).into_iter().collect())
}

fn codeable_concept_tokens(value: &Value) -> Result<Vec<SearchValue>, String> {
    let mut out: Vec<SearchValue> = value
        .get("coding")
        .and_then(Value::as_array)
        .map(|codings| codings.iter().filter_map(coding).collect())
        .unwrap_or_default();

    // Concept text is searchable via :text even without a coding
    if let Some(text) = owned_field(value, "text") {
        out.push(SearchValue::token(None, None, Some(text)));
    }
    Ok(out)
}

fn identifier_token(value: &Value) -> Result<Vec<SearchValue>, String> {
    let system = owned_field(value, "system");
    let code = owned_field(value, "value");
    if system.is_none() && code.is_none() {
        return Ok(Vec::new());
    }
    let text = value.get("type").and_then(|t| owned_field(t, "text"));
    Ok(vec![SearchValue::token(system, code, text)])
}

fn contact_point_token(value: &Value) -> Result<Vec<SearchValue>, String> {
    let code = owned_field(value, "value");
    if code.is_none() {
        return Ok(Vec::new());
    }
    Ok(vec![SearchValue::token(
        owned_field(value, "system"),
        code,
        None,
    )])
}

fn parse_partial(s: &str) -> Result<PartialDateTime, String> {
    s.parse::<PartialDateTime>().map_err(|e| e.to_string())
}

fn date_primitive(value: &Value) -> Result<Vec<SearchValue>, String> {
    let partial = parse_partial(expect_str(value, "a date")?)?;
    Ok(vec![SearchValue::date(&partial)])
}

fn period_bounds(value: &Value) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, String> {
    let start = str_field(value, "start").map(parse_partial).transpose()?;
    let end = str_field(value, "end").map(parse_partial).transpose()?;
    if start.is_none() && end.is_none() {
        return Ok(None);
    }
    Ok(Some((
        start.map_or(DateTime::<Utc>::MIN_UTC, |s| s.start()),
        end.map_or(DateTime::<Utc>::MAX_UTC, |e| e.end()),
    )))
}

fn period(value: &Value) -> Result<Vec<SearchValue>, String> {
    Ok(period_bounds(value)?
        .map(|(start, end)| SearchValue::date_range(start, end))
        .into_iter()
        .collect())
}

fn timing(value: &Value) -> Result<Vec<SearchValue>, String> {
    let mut out = Vec::new();
    if let Some(events) = value.get("event").and_then(Value::as_array) {
        for event in events.iter().filter_map(Value::as_str) {
            out.push(SearchValue::date(&parse_partial(event)?));
        }
    }
    if let Some(bounds) = value.get("repeat").and_then(|r| r.get("boundsPeriod")) {
        out.extend(period(bounds)?);
    }
    Ok(out)
}

fn decimal(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::Number(n) => {
            // Go through the textual form to keep the written precision
            Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))
                .map_err(|e| format!("'{}' is not a valid decimal: {}", n, e))
        }
        other => Err(format!("expected a number, found {}", other)),
    }
}

fn number_primitive(value: &Value) -> Result<Vec<SearchValue>, String> {
    Ok(vec![SearchValue::number(decimal(value)?)])
}

fn range_bounds(value: &Value) -> Result<(Option<Decimal>, Option<Decimal>), String> {
    let bound = |field: &str| {
        value
            .get(field)
            .and_then(|q| q.get("value"))
            .map(decimal)
            .transpose()
    };
    Ok((bound("low")?, bound("high")?))
}

fn number_range(value: &Value) -> Result<Vec<SearchValue>, String> {
    let (low, high) = range_bounds(value)?;
    if low.is_none() && high.is_none() {
        return Ok(Vec::new());
    }
    Ok(vec![SearchValue::number_range(low, high)])
}

fn quantity(value: &Value) -> Result<Vec<SearchValue>, String> {
    let Some(amount) = value.get("value") else {
        return Ok(Vec::new());
    };
    let amount = decimal(amount)?;
    let code = owned_field(value, "code").or_else(|| owned_field(value, "unit"));
    Ok(vec![SearchValue::quantity(
        amount,
        owned_field(value, "system"),
        code,
    )])
}

fn money(value: &Value) -> Result<Vec<SearchValue>, String> {
    let Some(amount) = value.get("value") else {
        return Ok(Vec::new());
    };
    Ok(vec![SearchValue::quantity(
        decimal(amount)?,
        Some(CURRENCY_SYSTEM.to_string()),
        owned_field(value, "currency"),
    )])
}

fn quantity_range(value: &Value) -> Result<Vec<SearchValue>, String> {
    let (low, high) = range_bounds(value)?;
    if low.is_none() && high.is_none() {
        return Ok(Vec::new());
    }
    // Units come from whichever bound carries them
    let unit_source = value
        .get("low")
        .filter(|q| q.get("code").is_some() || q.get("unit").is_some())
        .or_else(|| value.get("high"));
    let (system, code) = match unit_source {
        Some(q) => (
            owned_field(q, "system"),
            owned_field(q, "code").or_else(|| owned_field(q, "unit")),
        ),
        None => (None, None),
    };
    Ok(vec![SearchValue::Quantity {
        system,
        code,
        low,
        high,
    }])
}

fn reference_object(value: &Value) -> Result<Vec<SearchValue>, String> {
    Ok(str_field(value, "reference")
        .and_then(SearchValue::reference)
        .into_iter()
        .collect())
}

fn reference_string(value: &Value) -> Result<Vec<SearchValue>, String> {
    let reference = expect_str(value, "a reference")?;
    // Canonicals may carry a `|version` suffix
    let reference = reference.split('|').next().unwrap_or(reference);
    Ok(SearchValue::reference(reference).into_iter().collect())
}

fn uri_primitive(value: &Value) -> Result<Vec<SearchValue>, String> {
    let uri = expect_str(value, "a uri")?;
    if uri.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![SearchValue::uri(uri)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn convert(element: ElementType, target: SearchParamType, value: Value) -> Vec<SearchValue> {
        ConverterRegistry::new()
            .lookup(element, target)
            .unwrap()
            .convert(&value)
            .unwrap()
    }

    #[test]
    fn test_missing_converter() {
        let registry = ConverterRegistry::new();
        assert!(
            registry
                .lookup(ElementType::HumanName, SearchParamType::Token)
                .is_none()
        );
        assert!(
            registry
                .lookup(ElementType::Other, SearchParamType::String)
                .is_none()
        );
    }

    #[test]
    fn test_human_name() {
        let values = convert(
            ElementType::HumanName,
            SearchParamType::String,
            json!({"family": "Smith", "given": ["John", "Q"], "text": ""}),
        );
        assert_eq!(
            values,
            vec![
                SearchValue::string("Smith"),
                SearchValue::string("John"),
                SearchValue::string("Q"),
            ]
        );
    }

    #[test]
    fn test_codeable_concept() {
        let values = convert(
            ElementType::CodeableConcept,
            SearchParamType::Token,
            json!({
                "coding": [
                    {"system": "http://loinc.org", "code": "8867-4", "display": "Heart rate"},
                    {"code": "HR"}
                ],
                "text": "Heart rate"
            }),
        );
        assert_eq!(values.len(), 3);
        assert_eq!(values[0].to_string(), "http://loinc.org|8867-4");
        assert!(matches!(
            &values[2],
            SearchValue::Token { system: None, code: None, text: Some(t) } if t == "Heart rate"
        ));
    }

    #[test]
    fn test_boolean_and_contact_point() {
        let values = convert(ElementType::Boolean, SearchParamType::Token, json!(true));
        assert_eq!(values, vec![SearchValue::token_code("true")]);

        let values = convert(
            ElementType::ContactPoint,
            SearchParamType::Token,
            json!({"system": "phone", "value": "555-1234"}),
        );
        assert_eq!(values[0].to_string(), "phone|555-1234");
    }

    #[test]
    fn test_partial_date_expands() {
        let values = convert(ElementType::Date, SearchParamType::Date, json!("2024"));
        match &values[0] {
            SearchValue::DateTime { start, end, .. } => {
                assert_eq!(start.to_rfc3339(), "2024-01-01T00:00:00+00:00");
                assert_eq!(end.to_rfc3339(), "2024-12-31T23:59:59.999+00:00");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_open_period() {
        let values = convert(
            ElementType::Period,
            SearchParamType::Date,
            json!({"start": "2024-01-01"}),
        );
        match &values[0] {
            SearchValue::DateTime { end, .. } => assert_eq!(*end, DateTime::<Utc>::MAX_UTC),
            other => panic!("unexpected {:?}", other),
        }

        assert!(convert(ElementType::Period, SearchParamType::Date, json!({})).is_empty());
    }

    #[test]
    fn test_invalid_date_is_an_error() {
        let converter = ConverterRegistry::new()
            .lookup(ElementType::DateTime, SearchParamType::Date)
            .unwrap();
        assert!(converter.convert(&json!("not a date")).is_err());
    }

    #[test]
    fn test_quantity_and_money() {
        let values = convert(
            ElementType::Quantity,
            SearchParamType::Quantity,
            json!({"value": 5.40, "unit": "mg"}),
        );
        assert_eq!(
            values,
            vec![SearchValue::quantity(
                Decimal::new(54, 1),
                None,
                Some("mg".to_string())
            )]
        );

        let values = convert(
            ElementType::Money,
            SearchParamType::Quantity,
            json!({"value": 100, "currency": "USD"}),
        );
        assert_eq!(values[0].to_string(), "100|urn:iso:std:iso:4217|USD");
    }

    #[test]
    fn test_number_range() {
        let values = convert(
            ElementType::Range,
            SearchParamType::Number,
            json!({"low": {"value": 1}}),
        );
        assert_eq!(
            values,
            vec![SearchValue::number_range(Some(Decimal::ONE), None)]
        );
    }

    #[test]
    fn test_references() {
        let values = convert(
            ElementType::Reference,
            SearchParamType::Reference,
            json!({"reference": "Patient/123"}),
        );
        assert_eq!(values[0].to_string(), "Patient/123");

        let contained = convert(
            ElementType::Reference,
            SearchParamType::Reference,
            json!({"reference": "#p1"}),
        );
        assert!(contained.is_empty());

        let canonical = convert(
            ElementType::Canonical,
            SearchParamType::Reference,
            json!("http://example.org/fhir/Questionnaire/q1|2.0"),
        );
        assert!(matches!(
            &canonical[0],
            SearchValue::Reference { resource_id, .. } if resource_id == "q1"
        ));
    }
}
