use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::causal::VersionVector;
use crate::crdt::{Convergent, DeltaConvergent, Materialize};
use crate::error::Result;
use crate::json::{self, Json};

/// A value that is set once and never mutated; carries no metadata.
/// Replicas of the same logical object always hold the same value, so
/// merge is the identity. Merging two `Immutable`s holding distinct values
/// means two different objects were confused for one another, which is a
/// programmer error that fails loudly rather than picking a winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Immutable<T> {
    value: T,
}

impl<T> Immutable<T> {
    pub fn new(value: T) -> Self {
        Immutable { value }
    }
}

impl<'m, T> Materialize for &'m Immutable<T> {
    type Value = &'m T;

    fn value(&self) -> Self::Value {
        &self.value
    }
}

impl<T: PartialEq> Convergent for Immutable<T> {
    fn merge(&mut self, other: &Self) -> bool {
        assert!(
            self.value == other.value,
            "Immutable::merge received a diverging value for a write-once object"
        );
        false
    }
}

impl<T: PartialEq + Clone> DeltaConvergent for Immutable<T> {
    fn delta(&self, _seen: &VersionVector) -> Option<Self> {
        Some(self.clone())
    }
}

impl<T> Json for Immutable<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_json(&self) -> Result<String> {
        let mut doc = Map::new();
        doc.insert("_type".to_owned(), Value::from("Immutable"));
        doc.insert("value".to_owned(), json::to_value(&self.value)?);
        Ok(Value::Object(doc).to_string())
    }

    fn from_json(input: &str) -> Result<Self> {
        let doc = json::parse_object(input)?;
        json::check_type(&doc, "Immutable")?;
        let value: T = json::from_value(json::field(&doc, "value")?, "value")?;
        Ok(Immutable::new(value))
    }
}
