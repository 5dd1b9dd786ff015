use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The JSON codec every CRDT in this crate implements. Documents separate
/// user data from CRDT metadata and carry a `_type` discriminator naming
/// the CRDT kind; `from_json(to_json(x)) == x` for every state.
pub trait Json: Sized {
    fn to_json(&self) -> Result<String>;
    fn from_json(input: &str) -> Result<Self>;
}

pub(crate) fn parse_object(input: &str) -> Result<Map<String, Value>> {
    let value: Value =
        serde_json::from_str(input).map_err(|e| Error::MalformedJson(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::MalformedJson(format!(
            "expected a JSON object, found {other}"
        ))),
    }
}

/// Validates the `_type` discriminator of a document against the CRDT kind
/// being decoded.
pub(crate) fn check_type(doc: &Map<String, Value>, expected: &'static str) -> Result<()> {
    match doc.get("_type").and_then(Value::as_str) {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(Error::UnexpectedType {
            expected,
            actual: actual.to_owned(),
        }),
        None => Err(Error::MalformedJson(
            "missing \"_type\" discriminator".to_owned(),
        )),
    }
}

pub(crate) fn field<'a>(doc: &'a Map<String, Value>, name: &str) -> Result<&'a Value> {
    doc.get(name)
        .ok_or_else(|| Error::MalformedJson(format!("missing field {name:?}")))
}

pub(crate) fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::MalformedJson(format!("{what} is not a JSON object")))
}

pub(crate) fn as_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| Error::MalformedJson(format!("{what} is not a JSON array")))
}

pub(crate) fn as_i32(value: &Value, what: &str) -> Result<i32> {
    value
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| Error::MalformedJson(format!("{what} is not a 32-bit integer")))
}

pub(crate) fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::MalformedJson(e.to_string()))
}

pub(crate) fn from_value<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::MalformedJson(format!("bad {what}: {e}")))
}
