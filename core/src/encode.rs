//! Query-string and request-body encoding.
//!
//! A payload is serialised through `serde_json::Value` and flattened into
//! `(key, value)` string pairs:
//!
//! - scalars become their text form, `null` fields are left out;
//! - sequences repeat the key once per element;
//! - nested structures use `parent[child]` keys.
//!
//! Pairs are sorted by key (values for the same key keep their order) and
//! percent-encoded as `application/x-www-form-urlencoded`. The same pairs
//! feed the query string and, in form mode, the request body.
//!
//! Fields that should travel as one delimited value instead of repeated keys
//! use the helpers in [`delimited`].

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::form_urlencoded;

use crate::error::Error;
use crate::validate::{Validatable, Validator};

/// Errors produced while flattening a payload into pairs.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("query encoding expects a struct or map, got {0}")]
    NotAStruct(&'static str),

    #[error("query encoding failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Anything that can be sent as a query source or request body.
///
/// Blanket-implemented for every `Serialize + Validatable` type, so callers
/// pass `&my_struct` or `&Each(&items)` where a `&dyn Payload` is expected.
pub trait Payload: Sync {
    /// Run field validation.
    fn validate_with(&self, validator: &Validator) -> Result<(), Error>;

    /// Flatten into sorted `(key, value)` pairs.
    fn pairs(&self) -> Result<Vec<(String, String)>, EncodeError>;

    /// Serialise as a JSON document.
    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error>;
}

impl<T: Serialize + Validatable + Sync + ?Sized> Payload for T {
    fn validate_with(&self, validator: &Validator) -> Result<(), Error> {
        validator.validate(self)
    }

    fn pairs(&self) -> Result<Vec<(String, String)>, EncodeError> {
        to_pairs(self)
    }

    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Flatten a struct-like value into `(key, value)` pairs sorted by key.
///
/// `None`/unit values produce no pairs at all.
pub fn to_pairs<T: Serialize + ?Sized>(value: &T) -> Result<Vec<(String, String)>, EncodeError> {
    let mut pairs = Vec::new();
    match serde_json::to_value(value)? {
        Value::Object(fields) => {
            for (key, field) in fields {
                flatten(key, field, &mut pairs);
            }
        }
        Value::Null => {}
        other => return Err(EncodeError::NotAStruct(kind_name(&other))),
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(pairs)
}

/// Percent-encode pairs as `k=v&k2=v2`. Empty input gives an empty string.
pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn flatten(key: String, value: Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((key, b.to_string())),
        Value::Number(n) => out.push((key, n.to_string())),
        Value::String(s) => out.push((key, s)),
        Value::Array(items) => {
            for item in items {
                flatten(key.clone(), item, out);
            }
        }
        Value::Object(fields) => {
            for (child, field) in fields {
                flatten(format!("{key}[{child}]"), field, out);
            }
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "map",
    }
}

/// `serialize_with` helpers that send a sequence field as one delimited value.
///
/// Each element is rendered with its `Display` impl:
///
/// ```
/// #[derive(serde::Serialize)]
/// struct Search {
///     #[serde(serialize_with = "restclient::delimited::semicolon")]
///     tags: Vec<String>,
/// }
/// ```
pub mod delimited {
    use std::fmt::Display;

    use serde::Serializer;

    pub fn comma<T: Display, S: Serializer>(items: &[T], serializer: S) -> Result<S::Ok, S::Error> {
        joined(items, ",", serializer)
    }

    pub fn space<T: Display, S: Serializer>(items: &[T], serializer: S) -> Result<S::Ok, S::Error> {
        joined(items, " ", serializer)
    }

    pub fn semicolon<T: Display, S: Serializer>(
        items: &[T],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        joined(items, ";", serializer)
    }

    fn joined<T: Display, S: Serializer>(
        items: &[T],
        delimiter: &str,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let text = items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(delimiter);
        serializer.serialize_str(&text)
    }
}
