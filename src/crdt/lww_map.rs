use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::causal::{Timestamp, VersionVector};
use crate::crdt::tagged::{MapKey, ScalarValue, TypeTag};
use crate::crdt::{Convergent, DeltaConvergent, Materialize};
use crate::error::{Error, Result};
use crate::json::{self, Json};

type Entry = (Option<String>, Timestamp);

/// Map from string keys to scalar values with per-key last-writer-wins
/// resolution, deletes included. A delete leaves a tombstone behind so the
/// removal propagates through merges along the same timestamp channel as
/// writes. The key namespace is partitioned by value type: `put("k", true)`
/// and `put("k", 1)` live side by side.
///
/// Storage is string-typed; the typed getters re-parse on read. The map
/// carries no causal context, so delta generation scans the entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LWWMap {
    entries: BTreeMap<MapKey, Entry>,
}

impl LWWMap {
    pub fn new() -> Self {
        LWWMap::default()
    }

    /// Stores `value` under `(key, value.tag())` iff `stamp` beats the
    /// stored entry, returning a delta holding exactly the affected entry.
    /// A stale stamp is a defined no-op yielding the empty delta.
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
        if let Some((_, stored)) = self.entries.get(&key) {
            if *stored >= stamp {
                return None;
            }
        }
        self.entries.insert(key.clone(), (payload.clone(), stamp.clone()));

        let mut delta = LWWMap::new();
        delta.entries.insert(key, (payload, stamp));
        Some(delta)
    }

    pub fn get_boolean(&self, key: &str) -> Option<bool> {
        self.payload(key, TypeTag::Boolean)?.parse().ok()
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.payload(key, TypeTag::Double)?.parse().ok()
    }

    pub fn get_integer(&self, key: &str) -> Option<i32> {
        self.payload(key, TypeTag::Integer)?.parse().ok()
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.payload(key, TypeTag::String)
    }

    fn payload(&self, key: &str, tag: TypeTag) -> Option<&str> {
        let (payload, _) = self.entries.get(&MapKey::new(key, tag))?;
        payload.as_deref()
    }

    /// Number of live (non-tombstone) entries.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|(payload, _)| payload.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'m> Materialize for &'m LWWMap {
    type Value = BTreeMap<&'m MapKey, ScalarValue>;

    fn value(&self) -> Self::Value {
        self.entries
            .iter()
            .filter_map(|(key, (payload, _))| {
                let raw = payload.as_deref()?;
                ScalarValue::decode(key.tag(), raw).map(|value| (key, value))
            })
            .collect()
    }
}

impl Convergent for LWWMap {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (key, (payload, stamp)) in other.entries.iter() {
            match self.entries.get(key) {
                // equal stamps keep local: stamps are globally unique, so
                // the payloads are equal anyway
                Some((_, stored)) if stored >= stamp => {}
                _ => {
                    self.entries
                        .insert(key.clone(), (payload.clone(), stamp.clone()));
                    changed = true;
                }
            }
        }
        changed
    }
}

impl DeltaConvergent for LWWMap {
    fn delta(&self, seen: &VersionVector) -> Option<Self> {
        let entries: BTreeMap<MapKey, Entry> = self
            .entries
            .iter()
            .filter(|(_, (_, stamp))| !seen.contains(stamp))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        if entries.is_empty() {
            None
        } else {
            Some(LWWMap { entries })
        }
    }
}

impl Json for LWWMap {
    fn to_json(&self) -> Result<String> {
        let mut stamps = Map::new();
        let mut doc = Map::new();
        for (key, (payload, stamp)) in self.entries.iter() {
            let rendered = key.render();
            stamps.insert(rendered.clone(), json::to_value(stamp)?);
            let value = match payload {
                None => Value::Null,
                Some(raw) => ScalarValue::decode(key.tag(), raw)
                    .ok_or_else(|| {
                        Error::MalformedJson(format!("undecodable stored value under {rendered}"))
                    })?
                    .to_json_value(),
            };
            doc.insert(rendered, value);
        }

        let mut meta = Map::new();
        meta.insert("entries".to_owned(), Value::Object(stamps));

        doc.insert("_type".to_owned(), Value::from("LWWMap"));
        doc.insert("_metadata".to_owned(), Value::Object(meta));
        Ok(Value::Object(doc).to_string())
    }

    fn from_json(input: &str) -> Result<Self> {
        let doc = json::parse_object(input)?;
        json::check_type(&doc, "LWWMap")?;

        let meta = json::as_object(json::field(&doc, "_metadata")?, "_metadata")?;
        let stamps = json::as_object(json::field(meta, "entries")?, "_metadata.entries")?;

        let mut entries = BTreeMap::new();
        for (rendered, stamp) in stamps {
            let key = MapKey::parse(rendered)
                .ok_or_else(|| Error::MalformedJson(format!("bad map key {rendered:?}")))?;
            let stamp: Timestamp = json::from_value(stamp, "entry timestamp")?;
            let payload = match json::field(&doc, rendered)? {
                Value::Null => None,
                value => Some(
                    ScalarValue::from_json_value(key.tag(), value)
                        .ok_or_else(|| {
                            Error::MalformedJson(format!(
                                "value under {rendered:?} does not match its {} tag",
                                key.tag()
                            ))
                        })?
                        .encode(),
                ),
            };
            entries.insert(key, (payload, stamp));
        }

        Ok(LWWMap { entries })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::causal::ReplicaId;

    fn ts(cnt: i32, name: &str) -> Timestamp {
        Timestamp::new(ReplicaId::new(name), cnt)
    }

    #[test]
    fn lww_map_put_then_get() {
        let mut a = LWWMap::new();
        a.put("flag", true, ts(1, "a"));
        a.put("count", 42, ts(2, "a"));
        a.put("ratio", 0.5, ts(3, "a"));
        a.put("name", "x", ts(4, "a"));

        assert_eq!(a.get_boolean("flag"), Some(true));
        assert_eq!(a.get_integer("count"), Some(42));
        assert_eq!(a.get_double("ratio"), Some(0.5));
        assert_eq!(a.get_string("name"), Some("x"));
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn lww_map_type_tags_partition_the_namespace() {
        let mut a = LWWMap::new();
        a.put("k", true, ts(1, "a"));
        a.put("k", 7, ts(2, "a"));

        assert_eq!(a.get_boolean("k"), Some(true));
        assert_eq!(a.get_integer("k"), Some(7));
        assert_eq!(a.get_string("k"), None);

        // deleting one partition leaves the other alone
        a.delete_boolean("k", ts(3, "a"));
        assert_eq!(a.get_boolean("k"), None);
        assert_eq!(a.get_integer("k"), Some(7));
    }

    #[test]
    fn lww_map_delete_propagates() {
        let mut a = LWWMap::new();
        let put = a.put("k", "v", ts(1, "a")).expect("fresh put");

        let mut b = LWWMap::new();
        b.merge(&put);
        assert_eq!(b.get_string("k"), Some("v"));

        let delete = a.delete_string("k", ts(2, "a")).expect("fresh delete");
        assert_eq!(a.get_string("k"), None);

        assert!(b.merge(&delete));
        assert_eq!(b.get_string("k"), None);
        assert!(b.is_empty());
    }

    #[test]
    fn lww_map_put_on_deleted_key_wins_with_greater_stamp() {
        let mut a = LWWMap::new();
        a.put("k", "v", ts(1, "a"));
        a.delete_string("k", ts(2, "a"));
        assert!(a.put("k", "stale", ts(1, "b")).is_none());
        assert_eq!(a.get_string("k"), None);

        a.put("k", "fresh", ts(3, "a"));
        assert_eq!(a.get_string("k"), Some("fresh"));
    }

    #[test]
    fn lww_map_idempotency() {
        let mut a = LWWMap::new();
        a.put("k", 1, ts(1, "a"));
        let b = a.clone();
        assert!(!a.merge(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn lww_map_commutativity() {
        let mut a = LWWMap::new();
        a.put("k", "A", ts(1, "a"));
        let mut b = LWWMap::new();
        b.put("k", "B", ts(1, "b"));

        let a2 = a.clone();

        assert!(a.merge(&b));
        assert!(b.merge(&a2));

        assert_eq!(a, b);
        assert_eq!(a.get_string("k"), Some("B"));
    }

    #[test]
    fn lww_map_associativity() {
        let mut a = LWWMap::new();
        a.put("x", 1, ts(1, "a"));
        let mut b = LWWMap::new();
        b.put("y", 2, ts(1, "b"));
        let mut c = LWWMap::new();
        c.put("x", 3, ts(2, "c"));

        let mut a2 = a.clone();
        let mut b2 = b.clone();
        let c2 = c.clone();

        assert!(a.merge(&b));
        assert!(a.merge(&c));

        assert!(b2.merge(&c2));
        assert!(a2.merge(&b2));

        assert_eq!(a, a2);
        assert_eq!(a.get_integer("x"), Some(3));
        assert_eq!(a.get_integer("y"), Some(2));
    }

    #[test]
    fn lww_map_delta_filters_by_version_vector() {
        let mut a = LWWMap::new();
        a.put("k1", "v", ts(1, "a"));
        a.put("k2", "v", ts(2, "a"));
        a.put("k3", "v", ts(3, "a"));
        a.put("k4", "v", ts(4, "a"));

        let mut seen = VersionVector::new();
        seen.add(&ts(2, "a"));

        let delta = a.delta(&seen).expect("receiver is behind");
        let mut b = LWWMap::new();
        assert!(b.merge(&delta));

        assert_eq!(b.get_string("k1"), None);
        assert_eq!(b.get_string("k2"), None);
        assert_eq!(b.get_string("k3"), Some("v"));
        assert_eq!(b.get_string("k4"), Some("v"));
    }

    #[test]
    fn lww_map_delta_carries_tombstones() {
        let mut a = LWWMap::new();
        a.put("k", "v", ts(1, "a"));
        a.delete_string("k", ts(2, "a"));

        let mut seen = VersionVector::new();
        seen.add(&ts(1, "a"));

        let delta = a.delta(&seen).expect("tombstone is unseen");
        let mut b = LWWMap::new();
        b.put("k", "v", ts(1, "a"));
        assert!(b.merge(&delta));
        assert_eq!(b.get_string("k"), None);

        seen.add(&ts(2, "a"));
        assert!(a.delta(&seen).is_none());
    }

    #[test]
    fn lww_map_materialize_skips_tombstones() {
        let mut a = LWWMap::new();
        a.put("flag", true, ts(1, "a"));
        a.put("name", "x", ts(2, "a"));
        a.delete_string("name", ts(3, "a"));

        let live = (&a).value();
        assert_eq!(live.len(), 1);
        assert_eq!(
            live.get(&MapKey::new("flag", TypeTag::Boolean)),
            Some(&ScalarValue::Boolean(true))
        );
    }

    #[test]
    fn lww_map_json_round_trip() {
        let mut a = LWWMap::new();
        a.put("flag", true, ts(1, "a"));
        a.put("count", -3, ts(2, "a"));
        a.put("ratio", 1.5, ts(3, "a"));
        a.put("name", "x", ts(4, "b"));
        a.delete_double("ratio", ts(5, "b"));

        let encoded = a.to_json().unwrap();
        assert_eq!(LWWMap::from_json(&encoded).unwrap(), a);
    }

    #[test]
    fn lww_map_json_shape() {
        let mut a = LWWMap::new();
        a.put("k", 7, ts(1, "a"));

        assert_eq!(
            a.to_json().unwrap(),
            concat!(
                r#"{"_metadata":{"entries":{"k%INTEGER":{"cnt":1,"id":{"name":"a"}}}},"#,
                r#""_type":"LWWMap","k%INTEGER":7}"#
            )
        );
    }
}
