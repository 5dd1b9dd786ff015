use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::causal::VersionVector;
use crate::crdt::{Convergent, DeltaConvergent, Materialize};
use crate::error::Result;
use crate::json::{self, Json};

/// Join-semilattice register: the value type itself carries the merge
/// operator, so no timestamps or causal context are needed. The register
/// holds the supremum (under `T`'s total order) of every value ever
/// assigned on any replica. Useful when the application value is already
/// monotone, such as a max-wins gauge or a version number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSMRegister<T: Ord> {
    value: T,
}

impl<T: Ord> JSMRegister<T> {
    pub fn new(value: T) -> Self {
        JSMRegister { value }
    }
}

impl<T: Ord + Clone> JSMRegister<T> {
    /// Lifts the register to `max(current, value)`, returning a copy as
    /// the delta when it grew.
    pub fn assign(&mut self, value: T) -> Option<Self> {
        if value > self.value {
            self.value = value;
            Some(self.clone())
        } else {
            None
        }
    }
}

impl<'m, T: Ord> Materialize for &'m JSMRegister<T> {
    type Value = &'m T;

    fn value(&self) -> Self::Value {
        &self.value
    }
}

impl<T: Ord + Clone> Convergent for JSMRegister<T> {
    fn merge(&mut self, other: &Self) -> bool {
        if other.value > self.value {
            self.value = other.value.clone();
            true
        } else {
            false
        }
    }
}

impl<T: Ord + Clone> DeltaConvergent for JSMRegister<T> {
    // monotone by construction; without causal metadata the delta is
    // always the full (single-value) state
    fn delta(&self, _seen: &VersionVector) -> Option<Self> {
        Some(self.clone())
    }
}

impl<T> Json for JSMRegister<T>
where
    T: Ord + Serialize + DeserializeOwned,
{
    fn to_json(&self) -> Result<String> {
        let mut doc = Map::new();
        doc.insert("_type".to_owned(), Value::from("JSMRegister"));
        doc.insert("value".to_owned(), json::to_value(&self.value)?);
        Ok(Value::Object(doc).to_string())
    }

    fn from_json(input: &str) -> Result<Self> {
        let doc = json::parse_object(input)?;
        json::check_type(&doc, "JSMRegister")?;
        let value: T = json::from_value(json::field(&doc, "value")?, "value")?;
        Ok(JSMRegister::new(value))
    }
}
