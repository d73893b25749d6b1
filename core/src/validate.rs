//! Pre-flight validation of query and body payloads.
//!
//! # Design
//! Field rules come from the `validator` derive on the payload type. This
//! module turns the nested `ValidationErrors` it produces into a flat list
//! of [`FieldViolation`]s with namespaced paths (`KeyRequest.uid`,
//! `DnsRecord.record_type`, `Zone.records[1].name`) and renders them into
//! one readable sentence per violation.
//!
//! Sequences validate element by element and stop at the first element that
//! fails; violations inside that one element are all reported. This holds
//! for [`Each`] and for a bare `Vec` payload, which `validator` reports as a
//! list under a placeholder field that is unwrapped here.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::error::Error;

static ALTERNATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"eq=([^=|]+)").expect("alternative regex is valid"));

/// Field name `validator` files top-level sequence errors under.
const SEQUENCE_FIELD: &str = "_tmp_validator";

/// Raw outcome of validating one value.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// Type name that roots the namespace of every reported field.
    pub root: String,
    pub errors: ValidationErrors,
}

/// A value the pipeline can check before sending it.
///
/// Implemented for every `validator::Validate` type and for [`Each`].
pub trait Validatable {
    fn check(&self) -> Result<(), Rejection>;
}

impl<T: Validate + ?Sized> Validatable for T {
    fn check(&self) -> Result<(), Rejection> {
        self.validate().map_err(|errors| match first_failing_element(&errors) {
            Some(element) => Rejection {
                root: element_type_name::<T>(),
                errors: element,
            },
            None => Rejection {
                root: short_type_name::<T>(),
                errors,
            },
        })
    }
}

/// Errors of the lowest failing element when `errors` describes a sequence.
fn first_failing_element(errors: &ValidationErrors) -> Option<ValidationErrors> {
    let fields = errors.errors();
    if fields.len() != 1 {
        return None;
    }
    match fields.get(SEQUENCE_FIELD)? {
        ValidationErrorsKind::List(items) => items.values().next().map(|inner| (**inner).clone()),
        _ => None,
    }
}

/// A sequence payload, validated one element at a time.
///
/// Serialises as a plain JSON array.
#[derive(Debug, Clone, Copy)]
pub struct Each<'a, T>(pub &'a [T]);

impl<T: Validate> Validatable for Each<'_, T> {
    fn check(&self) -> Result<(), Rejection> {
        for item in self.0 {
            if let Err(errors) = item.validate() {
                return Err(Rejection {
                    root: short_type_name::<T>(),
                    errors,
                });
            }
        }
        Ok(())
    }
}

impl<T: Serialize> Serialize for Each<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// One rule failure on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    /// Field name as declared on the struct.
    pub field: String,
    /// Path from the root type, e.g. `DnsRecord.record_type`.
    pub namespace: String,
    /// Rule code reported by the validator, e.g. `required` or `eq=A|eq=MX`.
    pub rule: String,
    /// Offending value, when the rule reported one.
    pub value: Option<Value>,
}

impl FieldViolation {
    /// Human-readable sentence for this violation.
    pub fn render(&self) -> String {
        if self.rule == "required" {
            return format!("Required field {} is missing or empty", self.field);
        }
        let alternatives: Vec<String> = ALTERNATIVE
            .captures_iter(&self.rule)
            .map(|caps| format!("\"{}\"", &caps[1]))
            .collect();
        if !alternatives.is_empty() {
            return format!(
                "Field '{}' invalid value: '{}', valid values are: {}",
                self.namespace,
                plain_value(self.value.as_ref()),
                alternatives.join(",")
            );
        }
        let value = self.value.as_ref().map(Value::to_string).unwrap_or_default();
        format!(
            "Field '{}' invalid value: '{}', validation tag was {}",
            self.namespace, value, self.rule
        )
    }
}

/// Every violation of one failing value, plus the message shown to users.
///
/// Violations are ordered by namespaced field path, not by declaration
/// order: `validator` keeps fields in a hash map, so declaration order is
/// lost. `KeyRequest.key_type` is therefore listed before `KeyRequest.uid`.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    violations: Vec<FieldViolation>,
    errors: ValidationErrors,
    message: String,
}

impl ValidationReport {
    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    /// The validator's own error tree, unmodified.
    pub fn raw(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Runs payload validation for a client.
///
/// With `raw` set the report carries the validator's own message instead of
/// the rendered sentences.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    raw: bool,
}

impl Validator {
    pub fn new(raw: bool) -> Self {
        Self { raw }
    }

    pub fn validate<V: Validatable + ?Sized>(&self, value: &V) -> Result<(), Error> {
        value.check().map_err(|rejection| Error::Validation(self.report(rejection)))
    }

    pub fn report(&self, rejection: Rejection) -> ValidationReport {
        let mut violations = Vec::new();
        collect(&rejection.root, &rejection.errors, &mut violations);
        violations.sort_by(|a, b| a.namespace.cmp(&b.namespace));

        let message = if self.raw {
            rejection.errors.to_string()
        } else {
            let rendered: Vec<String> = violations.iter().map(FieldViolation::render).collect();
            format!("Validation error: {}", rendered.join(" ; "))
        };
        ValidationReport {
            violations,
            errors: rejection.errors,
            message,
        }
    }
}

/// Accept `value` when empty or equal to one of `allowed`.
///
/// Use from a `#[validate(custom(function = ...))]` function. The failure
/// code lists the alternatives as `eq=a|eq=b`, which the rendered message
/// turns into `valid values are: "a","b"`.
pub fn one_of(value: &str, allowed: &[&str]) -> Result<(), ValidationError> {
    if value.is_empty() || allowed.contains(&value) {
        return Ok(());
    }
    let code = allowed
        .iter()
        .map(|alt| format!("eq={alt}"))
        .collect::<Vec<_>>()
        .join("|");
    let mut err = ValidationError::new("eq");
    err.code = code.into();
    err.add_param("value".into(), &value);
    Err(err)
}

fn collect(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldViolation>) {
    for (field, kind) in errors.errors() {
        let namespace = format!("{prefix}.{field}");
        match kind {
            ValidationErrorsKind::Field(failures) => {
                out.extend(failures.iter().map(|failure| FieldViolation {
                    field: field.to_string(),
                    namespace: namespace.clone(),
                    rule: failure.code.to_string(),
                    value: failure.params.get("value").cloned(),
                }));
            }
            ValidationErrorsKind::Struct(inner) => collect(&namespace, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect(&format!("{namespace}[{index}]"), inner, out);
                }
            }
        }
    }
}

fn plain_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn short_type_name<T: ?Sized>() -> String {
    short_name(std::any::type_name::<T>())
}

/// `Vec<a::Item>`, `[a::Item; 2]` and `[a::Item]` all give `Item`.
fn element_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>().trim_start_matches('&');
    let element = match full.strip_prefix('[') {
        Some(rest) => rest.split([';', ']']).next().unwrap_or(rest),
        None => match (full.find('<'), full.rfind('>')) {
            (Some(start), Some(end)) if start < end => &full[start + 1..end],
            _ => full,
        },
    };
    short_name(element)
}

fn short_name(full: &str) -> String {
    let full = full.trim_start_matches('&');
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
