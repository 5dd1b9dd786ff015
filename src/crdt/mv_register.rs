use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::causal::{Timestamp, VersionVector};
use crate::crdt::{Convergent, DeltaConvergent, Materialize};
use crate::error::{Error, Result};
use crate::json::{self, Json};

type Entries<T> = SmallVec<[(T, Timestamp); 1]>;

/// Multi-value register. An assign replaces everything the replica has
/// observed, but assigns made concurrently on different replicas are all
/// retained and materialize together. The causal context records every
/// timestamp the register has observed, including overwritten ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MVRegister<T: Ord> {
    entries: Entries<T>,
    context: VersionVector,
}

impl<T: Ord> MVRegister<T> {
    pub fn new() -> Self {
        MVRegister::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The register's causal context: every timestamp it has observed.
    pub fn context(&self) -> &VersionVector {
        &self.context
    }
}

impl<T: Ord + Clone> MVRegister<T> {
    /// Replaces all currently held values with `(value, stamp)`, returning
    /// a deep copy of the register as the delta of this operation. A stamp
    /// already covered by the causal context is a defined no-op yielding
    /// the empty delta.
    pub fn assign(&mut self, value: T, stamp: Timestamp) -> Option<Self> {
        if self.context.contains(&stamp) {
            return None;
        }
        self.entries.clear();
        self.entries.push((value, stamp.clone()));
        self.context.add(&stamp);
        Some(self.clone())
    }

    fn holds(&self, stamp: &Timestamp) -> bool {
        self.entries.iter().any(|(_, t)| t == stamp)
    }
}

impl<T: Ord> Default for MVRegister<T> {
    fn default() -> Self {
        MVRegister {
            entries: SmallVec::new(),
            context: VersionVector::new(),
        }
    }
}

impl<'m, T: Ord> Materialize for &'m MVRegister<T> {
    type Value = BTreeSet<&'m T>;

    fn value(&self) -> Self::Value {
        self.entries.iter().map(|(v, _)| v).collect()
    }
}

impl<T: Ord + Clone> Convergent for MVRegister<T> {
    fn merge(&mut self, other: &Self) -> bool {
        // a local entry is discarded only when the remote side has
        // observed its timestamp and no longer lists it (assigned over it)
        let mut kept: Entries<T> = SmallVec::new();
        for (value, stamp) in self.entries.iter() {
            if !other.context.contains(stamp) || other.holds(stamp) {
                kept.push((value.clone(), stamp.clone()));
            }
        }
        for (value, stamp) in other.entries.iter() {
            if kept.iter().any(|(_, t)| t == stamp) {
                continue;
            }
            if !self.context.contains(stamp) {
                kept.push((value.clone(), stamp.clone()));
            }
        }
        kept.sort_by(|(_, a), (_, b)| a.cmp(b));

        let entries_changed = kept != self.entries;
        self.entries = kept;
        let context_changed = self.context.merge(&other.context);

        debug_assert!(self
            .entries
            .iter()
            .all(|(_, stamp)| self.context.contains(stamp)));

        entries_changed || context_changed
    }
}

impl<T: Ord + Clone> DeltaConvergent for MVRegister<T> {
    fn delta(&self, seen: &VersionVector) -> Option<Self> {
        if self.context.le(seen) {
            None
        } else {
            Some(self.clone())
        }
    }
}

impl<T> Json for MVRegister<T>
where
    T: Ord + Clone + Serialize + DeserializeOwned,
{
    fn to_json(&self) -> Result<String> {
        let mut stamps = Vec::with_capacity(self.entries.len());
        let mut values = Vec::with_capacity(self.entries.len());
        for (value, stamp) in self.entries.iter() {
            stamps.push(json::to_value(stamp)?);
            values.push(json::to_value(value)?);
        }

        let mut meta = Map::new();
        meta.insert("entries".to_owned(), Value::Array(stamps));
        meta.insert("causalContext".to_owned(), json::to_value(&self.context)?);

        let mut doc = Map::new();
        doc.insert("_type".to_owned(), Value::from("MVRegister"));
        doc.insert("_metadata".to_owned(), Value::Object(meta));
        doc.insert("value".to_owned(), Value::Array(values));
        Ok(Value::Object(doc).to_string())
    }

    fn from_json(input: &str) -> Result<Self> {
        let doc = json::parse_object(input)?;
        json::check_type(&doc, "MVRegister")?;

        let meta = json::as_object(json::field(&doc, "_metadata")?, "_metadata")?;
        let stamps = json::as_array(json::field(meta, "entries")?, "_metadata.entries")?;
        let context: VersionVector =
            json::from_value(json::field(meta, "causalContext")?, "causalContext")?;
        let values = json::as_array(json::field(&doc, "value")?, "value")?;

        if stamps.len() != values.len() {
            return Err(Error::MalformedJson(format!(
                "{} timestamps for {} values",
                stamps.len(),
                values.len()
            )));
        }

        let mut entries: Entries<T> = SmallVec::with_capacity(values.len());
        for (value, stamp) in values.iter().zip(stamps) {
            let value: T = json::from_value(value, "value entry")?;
            let stamp: Timestamp = json::from_value(stamp, "metadata entry")?;
            if !context.contains(&stamp) {
                return Err(Error::MalformedJson(format!(
                    "entry timestamp not covered by the causal context: {stamp:?}"
                )));
            }
            entries.push((value, stamp));
        }
        entries.sort_by(|(_, a), (_, b)| a.cmp(b));

        Ok(MVRegister { entries, context })
    }
}
