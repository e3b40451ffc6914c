//! Path expression evaluation.
//!
//! The indexer asks an [`ExpressionEvaluator`] for the elements a search
//! parameter's expression selects. Every selected element is tagged with an
//! [`ElementType`] so converters can be chosen with a plain `match` instead of
//! inspecting the JSON again.
//!
//! [`JsonPathEvaluator`] covers the subset of path syntax used by the
//! SearchParameter definitions the server ships with:
//!
//! ```text
//! Patient.name.family | Practitioner.name.family     unions
//! Observation.value.ofType(Quantity)                  type filters (also `as`)
//! Observation.effective                               choice expansion
//! Observation.subject.where(resolve() is Patient)     filters (ignored)
//! Patient.extension('http://example.org/race').value  extension selection
//! ```

use std::fmt;

use serde_json::Value;

/// The FHIR data type of an evaluated element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// `boolean`
    Boolean,
    /// `integer`, `positiveInt`, `unsignedInt`
    Integer,
    /// `decimal`
    Decimal,
    /// A string primitive whose precise type is unknown.
    String,
    /// `markdown`
    Markdown,
    /// `code`
    Code,
    /// `id`
    Id,
    /// `uri`, `oid`, `uuid`
    Uri,
    /// `url`
    Url,
    /// `canonical`
    Canonical,
    /// `date`
    Date,
    /// `dateTime`
    DateTime,
    /// `instant`
    Instant,
    /// `time`
    Time,
    /// `Coding`
    Coding,
    /// `CodeableConcept`
    CodeableConcept,
    /// `Identifier`
    Identifier,
    /// `ContactPoint`
    ContactPoint,
    /// `HumanName`
    HumanName,
    /// `Address`
    Address,
    /// `Period`
    Period,
    /// `Range`
    Range,
    /// `Quantity` and its profiles (`Age`, `Duration`, ...)
    Quantity,
    /// `Money`
    Money,
    /// `Reference`
    Reference,
    /// `Timing`
    Timing,
    /// Anything else.
    Other,
}

impl ElementType {
    /// Maps a FHIR type name (either case of the first letter) to an element type.
    pub fn from_type_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "boolean" => ElementType::Boolean,
            "integer" | "positiveint" | "unsignedint" | "integer64" => ElementType::Integer,
            "decimal" => ElementType::Decimal,
            "string" => ElementType::String,
            "markdown" => ElementType::Markdown,
            "code" => ElementType::Code,
            "id" => ElementType::Id,
            "uri" | "oid" | "uuid" => ElementType::Uri,
            "url" => ElementType::Url,
            "canonical" => ElementType::Canonical,
            "date" => ElementType::Date,
            "datetime" => ElementType::DateTime,
            "instant" => ElementType::Instant,
            "time" => ElementType::Time,
            "coding" => ElementType::Coding,
            "codeableconcept" => ElementType::CodeableConcept,
            "identifier" => ElementType::Identifier,
            "contactpoint" => ElementType::ContactPoint,
            "humanname" => ElementType::HumanName,
            "address" => ElementType::Address,
            "period" => ElementType::Period,
            "range" => ElementType::Range,
            "quantity" | "simplequantity" | "age" | "duration" | "distance" | "count" => {
                ElementType::Quantity
            }
            "money" => ElementType::Money,
            "reference" => ElementType::Reference,
            "timing" => ElementType::Timing,
            _ => ElementType::Other,
        }
    }

    /// Infers the type of an element from its JSON shape.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ElementType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ElementType::Integer,
            Value::Number(_) => ElementType::Decimal,
            Value::String(_) => ElementType::String,
            Value::Object(obj) => {
                let has = |k: &str| obj.contains_key(k);
                if has("reference") || (has("identifier") && has("type")) {
                    ElementType::Reference
                } else if has("coding") {
                    ElementType::CodeableConcept
                } else if has("family") || has("given") {
                    ElementType::HumanName
                } else if has("line") || has("city") || has("postalCode") || has("country") {
                    ElementType::Address
                } else if has("start") || has("end") {
                    ElementType::Period
                } else if has("low") || has("high") {
                    ElementType::Range
                } else if has("repeat") || has("event") {
                    ElementType::Timing
                } else if has("currency") {
                    ElementType::Money
                } else if obj.get("value").is_some_and(Value::is_number) {
                    ElementType::Quantity
                } else if has("value") && has("system") && is_contact_system(obj.get("system"))
                {
                    ElementType::ContactPoint
                } else if has("value") {
                    ElementType::Identifier
                } else if has("code") || has("system") {
                    ElementType::Coding
                } else if has("text") {
                    ElementType::CodeableConcept
                } else {
                    ElementType::Other
                }
            }
            _ => ElementType::Other,
        }
    }

    /// Returns true if this is any of the string-based primitives.
    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            ElementType::String
                | ElementType::Markdown
                | ElementType::Code
                | ElementType::Id
                | ElementType::Uri
                | ElementType::Url
                | ElementType::Canonical
                | ElementType::Date
                | ElementType::DateTime
                | ElementType::Instant
                | ElementType::Time
        )
    }
}

fn is_contact_system(system: Option<&Value>) -> bool {
    matches!(
        system.and_then(Value::as_str),
        Some("phone" | "fax" | "email" | "pager" | "url" | "sms" | "other")
    )
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An element selected by a path expression.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedElement {
    /// The element's FHIR type.
    pub element_type: ElementType,
    /// The element's JSON value. Never an array.
    pub value: Value,
}

impl TypedElement {
    /// Wraps a value, inferring its type from its shape.
    pub fn infer(value: Value) -> Self {
        Self {
            element_type: ElementType::infer(&value),
            value,
        }
    }

    /// Wraps a value with a known type.
    pub fn typed(element_type: ElementType, value: Value) -> Self {
        Self {
            element_type,
            value,
        }
    }

    /// Returns true if the element is of the named FHIR type.
    ///
    /// A string whose precise type was not known matches every string-based
    /// primitive type name.
    pub fn is_type(&self, type_name: &str) -> bool {
        let target = ElementType::from_type_name(type_name);
        self.element_type == target
            || (self.element_type == ElementType::String && target.is_string_like())
            || (self.element_type == ElementType::Integer && target == ElementType::Decimal)
    }
}

/// Error returned when an expression cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationError {
    /// The expression being evaluated.
    pub expression: String,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot evaluate '{}': {}", self.expression, self.message)
    }
}

impl std::error::Error for EvaluationError {}

/// Evaluates search parameter path expressions.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates `expression` against `context`, which is either a whole
    /// resource or a composite root element.
    fn evaluate(&self, context: &Value, expression: &str)
    -> Result<Vec<TypedElement>, EvaluationError>;
}

/// Path evaluator working directly on resource JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPathEvaluator;

impl JsonPathEvaluator {
    /// Creates a new evaluator.
    pub fn new() -> Self {
        Self
    }

    fn evaluate_union(
        &self,
        context: &Value,
        expression: &str,
    ) -> Result<Vec<TypedElement>, String> {
        let mut results = Vec::new();
        for part in split_top_level(expression, '|')? {
            results.extend(self.evaluate_path(context, part.trim())?);
        }
        Ok(results)
    }

    fn evaluate_path(&self, context: &Value, path: &str) -> Result<Vec<TypedElement>, String> {
        if path.is_empty() {
            return Ok(Vec::new());
        }

        // `X as T` and `X is T` operators
        for op in [" as ", " is "] {
            if let Some((left, type_name)) = rsplit_top_level(path, op)? {
                let elements = self.evaluate_path(context, left.trim())?;
                let type_name = type_name.trim();
                return Ok(elements
                    .into_iter()
                    .filter(|e| e.is_type(type_name))
                    .collect());
            }
        }

        let steps = split_top_level(path, '.')?;
        let mut current = vec![TypedElement::infer(context.clone())];

        for (i, step) in steps.iter().enumerate() {
            let step = step.trim();

            if i == 0 && is_type_name(step) {
                // Leading type name selects the context only if it is that type
                let resource_type = context.get("resourceType").and_then(Value::as_str);
                let applies = matches!(step, "Resource" | "DomainResource")
                    || resource_type == Some(step);
                if !applies {
                    return Ok(Vec::new());
                }
                continue;
            }

            current = self.apply_step(current, step)?;
            if current.is_empty() {
                break;
            }
        }

        Ok(current)
    }

    fn apply_step(&self, input: Vec<TypedElement>, step: &str) -> Result<Vec<TypedElement>, String> {
        if step == "$this" {
            return Ok(input);
        }

        if let Some(inner) = step.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
            let mut out = Vec::new();
            for element in &input {
                out.extend(self.evaluate_union(&element.value, inner)?);
            }
            return Ok(out);
        }

        if let Some(open) = step.find('(') {
            let name = &step[..open];
            let arg = step[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| format!("unbalanced parentheses in '{}'", step))?
                .trim();
            return self.apply_function(input, name, arg);
        }

        let mut out = Vec::new();
        for element in &input {
            navigate(&element.value, step, &mut out);
        }
        Ok(out)
    }

    fn apply_function(
        &self,
        input: Vec<TypedElement>,
        name: &str,
        arg: &str,
    ) -> Result<Vec<TypedElement>, String> {
        match name {
            "ofType" | "as" => Ok(input.into_iter().filter(|e| e.is_type(arg)).collect()),
            // Filters that need resolution or full expression support are
            // applied after conversion (reference targets) or not at all.
            "where" | "resolve" => Ok(input),
            "first" => Ok(input.into_iter().take(1).collect()),
            "extension" => {
                let url = arg.trim_matches('\'');
                let mut out = Vec::new();
                for element in &input {
                    let mut extensions = Vec::new();
                    navigate(&element.value, "extension", &mut extensions);
                    out.extend(extensions.into_iter().filter(|ext| {
                        ext.value.get("url").and_then(Value::as_str) == Some(url)
                    }));
                }
                Ok(out)
            }
            other => Err(format!("function '{}' is not supported", other)),
        }
    }
}

impl ExpressionEvaluator for JsonPathEvaluator {
    fn evaluate(
        &self,
        context: &Value,
        expression: &str,
    ) -> Result<Vec<TypedElement>, EvaluationError> {
        self.evaluate_union(context, expression.trim())
            .map_err(|message| EvaluationError {
                expression: expression.to_string(),
                message,
            })
    }
}

/// Pushes the children named `name`, expanding arrays and choice types.
fn navigate(value: &Value, name: &str, out: &mut Vec<TypedElement>) {
    let Value::Object(obj) = value else {
        return;
    };

    let push_all = |child: &Value, element_type: Option<ElementType>, out: &mut Vec<TypedElement>| {
        let items: Vec<&Value> = match child {
            Value::Array(arr) => arr.iter().collect(),
            single => vec![single],
        };
        for item in items {
            out.push(match element_type {
                Some(t) => TypedElement::typed(t, item.clone()),
                None => TypedElement::infer(item.clone()),
            });
        }
    };

    if let Some(child) = obj.get(name) {
        push_all(child, None, out);
        return;
    }

    // Choice types: `value` selects `valueQuantity`, `valueString`, ...
    for (key, child) in obj {
        if let Some(suffix) = key.strip_prefix(name) {
            if suffix.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                let element_type = match ElementType::from_type_name(suffix) {
                    ElementType::Other => None,
                    t => Some(t),
                };
                push_all(child, element_type, out);
            }
        }
    }
}

fn is_type_name(step: &str) -> bool {
    step.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && step.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Splits on `sep` outside parentheses and quotes.
fn split_top_level(expr: &str, sep: char) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut start = 0;

    for (i, c) in expr.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("unbalanced parentheses in '{}'", expr));
                }
            }
            c if c == sep && depth == 0 && !in_quote => {
                parts.push(&expr[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if depth != 0 || in_quote {
        return Err(format!("unbalanced parentheses in '{}'", expr));
    }
    parts.push(&expr[start..]);
    Ok(parts)
}

/// Finds the last top-level occurrence of a keyword operator.
fn rsplit_top_level<'a>(expr: &'a str, op: &str) -> Result<Option<(&'a str, &'a str)>, String> {
    let mut depth = 0i32;
    let mut found = None;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ if depth == 0 && expr[i..].starts_with(op) => found = Some(i),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("unbalanced parentheses in '{}'", expr));
    }
    Ok(found.map(|i| (&expr[..i], &expr[i + op.len()..])))
}
