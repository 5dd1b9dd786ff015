use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::causal::{Timestamp, VersionVector};
use crate::crdt::tagged::{MapKey, ScalarValue, TypeTag};
use crate::crdt::{Convergent, DeltaConvergent, Materialize};
use crate::error::{Error, Result};
use crate::json::{self, Json};

type EntrySet = SmallVec<[(Option<String>, Timestamp); 1]>;

/// Map from string keys to sets of concurrently written scalar values: an
/// MV-Register per `(key, tag)` pair. A delete inserts a tombstone entry
/// (`None` payload) into the key's set, so concurrent writes survive a
/// delete while observed ones are suppressed.
///
/// All keys share a single causal context; mutating any key advances the
/// shared vector, which summarizes every operation the map has observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MVMap {
    entries: BTreeMap<MapKey, EntrySet>,
    context: VersionVector,
}

impl MVMap {
    pub fn new() -> Self {
        MVMap::default()
    }

    /// The causal context shared by every key of this map.
    pub fn context(&self) -> &VersionVector {
        &self.context
    }

    /// Replaces the set under `(key, value.tag())` with the single entry
    /// `(value, stamp)`. The delta is a fresh map holding exactly that key
    /// and a causal context of exactly `stamp`. A stamp already covered by
    /// the shared context is a defined no-op yielding the empty delta.
    pub fn put(
        &mut self,
        key: &str,
        value: impl Into<ScalarValue>,
        stamp: Timestamp,
    ) -> Option<Self> {
        let value = value.into();
        let key = MapKey::new(key, value.tag());
        self.put_entry(key, Some(value.encode()), stamp)
    }

    pub fn delete_boolean(&mut self, key: &str, stamp: Timestamp) -> Option<Self> {
        self.put_entry(MapKey::new(key, TypeTag::Boolean), None, stamp)
    }

    pub fn delete_double(&mut self, key: &str, stamp: Timestamp) -> Option<Self> {
        self.put_entry(MapKey::new(key, TypeTag::Double), None, stamp)
    }

    pub fn delete_integer(&mut self, key: &str, stamp: Timestamp) -> Option<Self> {
        self.put_entry(MapKey::new(key, TypeTag::Integer), None, stamp)
    }

    pub fn delete_string(&mut self, key: &str, stamp: Timestamp) -> Option<Self> {
        self.put_entry(MapKey::new(key, TypeTag::String), None, stamp)
    }

    fn put_entry(&mut self, key: MapKey, payload: Option<String>, stamp: Timestamp) -> Option<Self> {
        if self.context.contains(&stamp) {
            return None;
        }
        let mut set = EntrySet::new();
        set.push((payload, stamp.clone()));
        self.entries.insert(key.clone(), set.clone());
        self.context.add(&stamp);

        let mut delta = MVMap::new();
        delta.entries.insert(key, set);
        delta.context.add(&stamp);
        Some(delta)
    }

    pub fn get_boolean(&self, key: &str) -> Option<Vec<bool>> {
        self.payloads(key, TypeTag::Boolean, |raw| raw.parse().ok())
    }

    pub fn get_double(&self, key: &str) -> Option<Vec<f64>> {
        self.payloads(key, TypeTag::Double, |raw| raw.parse().ok())
    }

    pub fn get_integer(&self, key: &str) -> Option<Vec<i32>> {
        self.payloads(key, TypeTag::Integer, |raw| raw.parse().ok())
    }

    pub fn get_string(&self, key: &str) -> Option<Vec<String>> {
        self.payloads(key, TypeTag::String, |raw| Some(raw.to_owned()))
    }

    /// Projects the non-tombstone entries of a key's set, in timestamp
    /// order. A missing key or a set holding only tombstones is absent.
    fn payloads<T>(&self, key: &str, tag: TypeTag, parse: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
        let set = self.entries.get(&MapKey::new(key, tag))?;
        let values: Vec<T> = set
            .iter()
            .filter_map(|(payload, _)| payload.as_deref())
            .filter_map(|raw| parse(raw))
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }

    /// Number of keys holding at least one live value.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|set| set.iter().any(|(payload, _)| payload.is_some()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'m> Materialize for &'m MVMap {
    type Value = BTreeMap<&'m MapKey, Vec<ScalarValue>>;

    fn value(&self) -> Self::Value {
        self.entries
            .iter()
            .filter_map(|(key, set)| {
                let values: Vec<ScalarValue> = set
                    .iter()
                    .filter_map(|(payload, _)| payload.as_deref())
                    .filter_map(|raw| ScalarValue::decode(key.tag(), raw))
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some((key, values))
                }
            })
            .collect()
    }
}

impl Convergent for MVMap {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        // keys absent from `other` carry no information and stay untouched
        for (key, remote_set) in other.entries.iter() {
            let local_set = self.entries.get(key);

            let mut kept = EntrySet::new();
            if let Some(local_set) = local_set {
                for (payload, stamp) in local_set.iter() {
                    // discarded only when the remote observed the stamp and
                    // no longer lists it under this key
                    if !other.context.contains(stamp)
                        || remote_set.iter().any(|(_, t)| t == stamp)
                    {
                        kept.push((payload.clone(), stamp.clone()));
                    }
                }
            }
            for (payload, stamp) in remote_set.iter() {
                if kept.iter().any(|(_, t)| t == stamp) {
                    continue;
                }
                if !self.context.contains(stamp) {
                    kept.push((payload.clone(), stamp.clone()));
                }
            }
            kept.sort_by(|(_, a), (_, b)| a.cmp(b));

            if kept.is_empty() {
                if self.entries.remove(key).is_some() {
                    changed = true;
                }
            } else if local_set != Some(&kept) {
                self.entries.insert(key.clone(), kept);
                changed = true;
            }
        }
        let context_changed = self.context.merge(&other.context);

        debug_assert!(self
            .entries
            .values()
            .flatten()
            .all(|(_, stamp)| self.context.contains(stamp)));

        changed || context_changed
    }
}

impl DeltaConvergent for MVMap {
    fn delta(&self, seen: &VersionVector) -> Option<Self> {
        let entries: BTreeMap<MapKey, EntrySet> = self
            .entries
            .iter()
            .filter(|(_, set)| set.iter().any(|(_, stamp)| !seen.contains(stamp)))
            .map(|(key, set)| (key.clone(), set.clone()))
            .collect();
        if entries.is_empty() {
            return None;
        }
        Some(MVMap {
            entries,
            context: self.context.clone(),
        })
    }
}

// The wire form of a set entry: tombstones are null, booleans and strings
// are native JSON values, numerics travel as JSON strings carrying the
// internal storage verbatim.
fn wire_value(tag: TypeTag, payload: &Option<String>) -> Result<Value> {
    let raw = match payload {
        None => return Ok(Value::Null),
        Some(raw) => raw,
    };
    match tag {
        TypeTag::Boolean => raw
            .parse()
            .map(Value::Bool)
            .map_err(|_| Error::MalformedJson(format!("undecodable stored boolean {raw:?}"))),
        TypeTag::Double | TypeTag::Integer | TypeTag::String => Ok(Value::String(raw.clone())),
    }
}

fn wire_payload(tag: TypeTag, value: &Value) -> Result<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    let payload = match tag {
        TypeTag::Boolean => value.as_bool().map(|b| b.to_string()),
        TypeTag::Double => value
            .as_str()
            .and_then(|raw| raw.parse::<f64>().ok())
            .map(|parsed| parsed.to_string()),
        TypeTag::Integer => value
            .as_str()
            .and_then(|raw| raw.parse::<i32>().ok())
            .map(|parsed| parsed.to_string()),
        TypeTag::String => value.as_str().map(str::to_owned),
    };
    payload
        .map(Some)
        .ok_or_else(|| Error::MalformedJson(format!("value {value} does not match its {tag} tag")))
}

impl Json for MVMap {
    fn to_json(&self) -> Result<String> {
        let mut stamps = Map::new();
        let mut doc = Map::new();
        for (key, set) in self.entries.iter() {
            let rendered = key.render();
            let mut entry_stamps = Vec::with_capacity(set.len());
            let mut values = Vec::with_capacity(set.len());
            for (payload, stamp) in set.iter() {
                entry_stamps.push(json::to_value(stamp)?);
                values.push(wire_value(key.tag(), payload)?);
            }
            stamps.insert(rendered.clone(), Value::Array(entry_stamps));
            doc.insert(rendered, Value::Array(values));
        }

        let mut meta = Map::new();
        meta.insert("entries".to_owned(), Value::Object(stamps));
        meta.insert("causalContext".to_owned(), json::to_value(&self.context)?);

        doc.insert("_type".to_owned(), Value::from("MVMap"));
        doc.insert("_metadata".to_owned(), Value::Object(meta));
        Ok(Value::Object(doc).to_string())
    }

    fn from_json(input: &str) -> Result<Self> {
        let doc = json::parse_object(input)?;
        json::check_type(&doc, "MVMap")?;

        let meta = json::as_object(json::field(&doc, "_metadata")?, "_metadata")?;
        let stamps = json::as_object(json::field(meta, "entries")?, "_metadata.entries")?;
        let context: VersionVector =
            json::from_value(json::field(meta, "causalContext")?, "causalContext")?;

        let mut entries = BTreeMap::new();
        for (rendered, entry_stamps) in stamps {
            let key = MapKey::parse(rendered)
                .ok_or_else(|| Error::MalformedJson(format!("bad map key {rendered:?}")))?;
            let entry_stamps = json::as_array(entry_stamps, "entry timestamps")?;
            let values = json::as_array(json::field(&doc, rendered)?, rendered)?;
            if entry_stamps.len() != values.len() {
                return Err(Error::MalformedJson(format!(
                    "{} timestamps for {} values under {rendered:?}",
                    entry_stamps.len(),
                    values.len()
                )));
            }

            let mut set = EntrySet::with_capacity(values.len());
            for (value, stamp) in values.iter().zip(entry_stamps) {
                let stamp: Timestamp = json::from_value(stamp, "entry timestamp")?;
                if !context.contains(&stamp) {
                    return Err(Error::MalformedJson(format!(
                        "entry timestamp not covered by the causal context: {stamp:?}"
                    )));
                }
                set.push((wire_payload(key.tag(), value)?, stamp));
            }
            set.sort_by(|(_, a), (_, b)| a.cmp(b));
            entries.insert(key, set);
        }

        Ok(MVMap { entries, context })
    }
}
