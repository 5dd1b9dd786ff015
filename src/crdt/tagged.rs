use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire tag partitioning the key namespace of the map types. The same text
/// key may carry values of different types independently; an entry under
/// one tag never shadows an entry under another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Boolean,
    Double,
    Integer,
    String,
}

impl TypeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Boolean => "BOOLEAN",
            TypeTag::Double => "DOUBLE",
            TypeTag::Integer => "INTEGER",
            TypeTag::String => "STRING",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<TypeTag> {
        match raw {
            "BOOLEAN" => Some(TypeTag::Boolean),
            "DOUBLE" => Some(TypeTag::Double),
            "INTEGER" => Some(TypeTag::Integer),
            "STRING" => Some(TypeTag::String),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A map key: the text name plus the type tag of the stored value, rendered
/// `"<name>%<TAG>"` on the wire. The name itself may contain `%`; parsing
/// splits at the last one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapKey {
    name: String,
    tag: TypeTag,
}

impl MapKey {
    pub fn new(name: impl Into<String>, tag: TypeTag) -> Self {
        MapKey {
            name: name.into(),
            tag,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub(crate) fn render(&self) -> String {
        format!("{}%{}", self.name, self.tag)
    }

    pub(crate) fn parse(raw: &str) -> Option<MapKey> {
        let (name, tag) = raw.rsplit_once('%')?;
        Some(MapKey::new(name, TypeTag::parse(tag)?))
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%{}", self.name, self.tag)
    }
}

/// One of the four storable payload types of the map CRDTs. Map storage is
/// string-typed: `encode` produces the canonical string form kept inside
/// the map, and `decode` re-parses it under the key's tag on read.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Boolean(bool),
    Double(f64),
    Integer(i32),
    String(String),
}

impl ScalarValue {
    pub fn tag(&self) -> TypeTag {
        match self {
            ScalarValue::Boolean(_) => TypeTag::Boolean,
            ScalarValue::Double(_) => TypeTag::Double,
            ScalarValue::Integer(_) => TypeTag::Integer,
            ScalarValue::String(_) => TypeTag::String,
        }
    }

    /// Canonical internal string form of the payload.
    pub(crate) fn encode(&self) -> String {
        match self {
            ScalarValue::Boolean(v) => v.to_string(),
            ScalarValue::Double(v) => v.to_string(),
            ScalarValue::Integer(v) => v.to_string(),
            ScalarValue::String(v) => v.clone(),
        }
    }

    /// Re-parses an internal string under `tag`. Returns `None` when the
    /// stored form does not parse, which cannot happen for payloads written
    /// through the typed API.
    pub(crate) fn decode(tag: TypeTag, raw: &str) -> Option<ScalarValue> {
        match tag {
            TypeTag::Boolean => raw.parse().ok().map(ScalarValue::Boolean),
            TypeTag::Double => raw.parse().ok().map(ScalarValue::Double),
            TypeTag::Integer => raw.parse().ok().map(ScalarValue::Integer),
            TypeTag::String => Some(ScalarValue::String(raw.to_owned())),
        }
    }

    /// Typed JSON rendering; a non-finite double has no JSON number form
    /// and renders as null.
    pub(crate) fn to_json_value(&self) -> Value {
        match self {
            ScalarValue::Boolean(v) => Value::Bool(*v),
            ScalarValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ScalarValue::Integer(v) => Value::from(*v),
            ScalarValue::String(v) => Value::String(v.clone()),
        }
    }

    /// Reads a typed JSON value under `tag`.
    pub(crate) fn from_json_value(tag: TypeTag, value: &Value) -> Option<ScalarValue> {
        match tag {
            TypeTag::Boolean => value.as_bool().map(ScalarValue::Boolean),
            TypeTag::Double => value.as_f64().map(ScalarValue::Double),
            TypeTag::Integer => value
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(ScalarValue::Integer),
            TypeTag::String => value.as_str().map(|s| ScalarValue::String(s.to_owned())),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Double(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Integer(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::String(value.to_owned())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::String(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn map_key_render_parse() {
        let cases = vec![
            MapKey::new("k", TypeTag::Boolean),
            MapKey::new("answer", TypeTag::Integer),
            MapKey::new("pi", TypeTag::Double),
            MapKey::new("greeting", TypeTag::String),
            // a name containing the separator survives the round trip
            MapKey::new("100%legit", TypeTag::String),
        ];

        for key in cases {
            assert_eq!(MapKey::parse(&key.render()), Some(key));
        }

        assert_eq!(MapKey::parse("no-separator"), None);
        assert_eq!(MapKey::parse("k%FLOAT"), None);
    }

    #[test]
    fn scalar_encode_decode() {
        let cases = vec![
            ScalarValue::Boolean(true),
            ScalarValue::Double(3.25),
            ScalarValue::Double(-0.5),
            ScalarValue::Integer(-17),
            ScalarValue::String("hello".to_owned()),
        ];

        for value in cases {
            let raw = value.encode();
            assert_eq!(ScalarValue::decode(value.tag(), &raw), Some(value));
        }

        assert_eq!(ScalarValue::decode(TypeTag::Integer, "not-a-number"), None);
    }
}
