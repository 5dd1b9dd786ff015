use std::collections::BTreeMap;
use std::fmt;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::crdt::Convergent;
use crate::error::{Error, Result};
use crate::json::Json;

/// A totally ordered, opaque name of a replica. Two replicas mutating the
/// same logical object must carry distinct names; the name participates in
/// the timestamp order and breaks counter collisions across replicas.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ReplicaId {
    name: String,
}

impl ReplicaId {
    pub fn new(name: impl Into<String>) -> Self {
        ReplicaId { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Represents a logical timestamp of a single operation. It consists of two
/// values: a monotonically increasing counter `cnt`, consistent within the
/// scope of the issuing replica, and the `id` of that replica. Timestamps
/// are ordered lexicographically on `(cnt, id)`, which is a total order:
/// counters may collide across replicas, replica names never do. Combined,
/// the two uniquely identify events across replicas, even in the face of
/// concurrent operations.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Timestamp {
    cnt: i32,
    id: ReplicaId,
}

impl Timestamp {
    pub fn new(id: ReplicaId, cnt: i32) -> Self {
        Timestamp { cnt, id }
    }

    /// Replica identifier of the creator of this timestamp.
    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    /// The counter value, monotonically increasing in the scope of `id`.
    pub fn cnt(&self) -> i32 {
        self.cnt
    }
}

impl Json for Timestamp {
    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::MalformedJson(e.to_string()))
    }

    fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| Error::MalformedJson(e.to_string()))
    }
}

/// A version vector: a summary of every timestamp a replica has observed,
/// as a mapping from replica id to the highest counter seen for it. Replicas
/// absent from the vector are treated as `-∞`, so domination checks are
/// total.
///
/// Version vectors are convergent: `merge` (pointwise maximum) is
/// commutative, associative and idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionVector {
    entries: BTreeMap<ReplicaId, i32>,
}

impl VersionVector {
    pub fn new() -> Self {
        VersionVector::default()
    }

    /// Highest counter observed for `id`; `i32::MIN` stands in for an
    /// unobserved replica.
    pub fn get(&self, id: &ReplicaId) -> i32 {
        self.entries.get(id).copied().unwrap_or(i32::MIN)
    }

    /// Checks whether `ts` has already been observed.
    pub fn contains(&self, ts: &Timestamp) -> bool {
        self.get(ts.id()) >= ts.cnt()
    }

    /// Records `ts` as observed, keeping the per-replica maximum. Returns
    /// true when the vector advanced.
    pub fn add(&mut self, ts: &Timestamp) -> bool {
        let e = self.entries.entry(ts.id().clone()).or_insert(i32::MIN);
        if ts.cnt() > *e {
            *e = ts.cnt();
            true
        } else {
            false
        }
    }

    /// True iff every entry of this vector is dominated pointwise by
    /// `other` (absent entries compare as `-∞`).
    pub fn le(&self, other: &Self) -> bool {
        self.entries.iter().all(|(id, cnt)| other.get(id) >= *cnt)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over replica ids and their highest observed counters.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, i32)> {
        self.entries.iter().map(|(id, cnt)| (id, *cnt))
    }
}

impl Convergent for VersionVector {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (id, cnt) in other.entries.iter() {
            let e = self.entries.entry(id.clone()).or_insert(i32::MIN);
            if *cnt > *e {
                *e = *cnt;
                changed = true;
            }
        }
        changed
    }
}

impl FromIterator<(ReplicaId, i32)> for VersionVector {
    fn from_iter<T: IntoIterator<Item = (ReplicaId, i32)>>(iter: T) -> Self {
        VersionVector {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Serialize for VersionVector {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entries: BTreeMap<&str, i32> = self
            .entries
            .iter()
            .map(|(id, cnt)| (id.name(), *cnt))
            .collect();
        let mut root = serializer.serialize_struct("VersionVector", 1)?;
        root.serialize_field("entries", &entries)?;
        root.end()
    }
}

impl<'de> Deserialize<'de> for VersionVector {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct Raw {
            entries: BTreeMap<String, i32>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(raw
            .entries
            .into_iter()
            .map(|(name, cnt)| (ReplicaId::new(name), cnt))
            .collect())
    }
}

impl Json for VersionVector {
    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::MalformedJson(e.to_string()))
    }

    fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| Error::MalformedJson(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ts(cnt: i32, name: &str) -> Timestamp {
        Timestamp::new(ReplicaId::new(name), cnt)
    }

    fn vv(entries: &[(&str, i32)]) -> VersionVector {
        entries
            .iter()
            .map(|(name, cnt)| (ReplicaId::new(*name), *cnt))
            .collect()
    }

    #[test]
    fn timestamp_order() {
        let cases = vec![
            (ts(1, "a"), ts(2, "a"), std::cmp::Ordering::Less),
            (ts(2, "a"), ts(1, "b"), std::cmp::Ordering::Greater),
            (ts(1, "a"), ts(1, "b"), std::cmp::Ordering::Less),
            (ts(3, "c"), ts(3, "c"), std::cmp::Ordering::Equal),
        ];

        for (left, right, expected) in cases {
            assert_eq!(left.cmp(&right), expected, "{left:?} vs {right:?}");
        }
    }

    #[test]
    fn version_vector_contains() {
        let mut v = VersionVector::new();
        assert!(!v.contains(&ts(1, "a")));

        v.add(&ts(3, "a"));
        assert!(v.contains(&ts(1, "a")));
        assert!(v.contains(&ts(3, "a")));
        assert!(!v.contains(&ts(4, "a")));
        assert!(!v.contains(&ts(1, "b")));
    }

    #[test]
    fn version_vector_add_keeps_maximum() {
        let mut v = VersionVector::new();
        assert!(v.add(&ts(2, "a")));
        assert!(!v.add(&ts(1, "a")));
        assert!(!v.add(&ts(2, "a")));
        assert!(v.add(&ts(5, "a")));
        assert_eq!(v.get(&ReplicaId::new("a")), 5);
    }

    #[test]
    fn version_vector_le() {
        let cases = vec![
            (vv(&[]), vv(&[]), true),
            (vv(&[]), vv(&[("a", 1)]), true),
            (vv(&[("a", 1)]), vv(&[]), false),
            (vv(&[("a", 1)]), vv(&[("a", 1)]), true),
            (vv(&[("a", 1)]), vv(&[("a", 2)]), true),
            (vv(&[("a", 2)]), vv(&[("a", 1)]), false),
            (vv(&[("a", 1), ("b", 1)]), vv(&[("a", 2)]), false),
            (vv(&[("a", 1)]), vv(&[("a", 1), ("b", 4)]), true),
        ];

        for (left, right, expected) in cases {
            assert_eq!(left.le(&right), expected, "{left:?} le {right:?}");
        }
    }

    #[test]
    fn version_vector_merge() {
        fn assert_merge(
            mut left: VersionVector,
            right: VersionVector,
            expected: VersionVector,
            changed: bool,
        ) {
            assert_eq!(left.merge(&right), changed);
            assert_eq!(left, expected);
        }

        assert_merge(vv(&[]), vv(&[]), vv(&[]), false);
        assert_merge(
            vv(&[("a", 2), ("b", 1)]),
            vv(&[("a", 1)]),
            vv(&[("a", 2), ("b", 1)]),
            false,
        );
        assert_merge(
            vv(&[("a", 1)]),
            vv(&[("a", 3), ("c", 2)]),
            vv(&[("a", 3), ("c", 2)]),
            true,
        );
        assert_merge(
            vv(&[("a", 1), ("b", 2)]),
            vv(&[("a", 2), ("b", 1)]),
            vv(&[("a", 2), ("b", 2)]),
            true,
        );
    }

    #[test]
    fn timestamp_json_round_trip() {
        let original = ts(7, "replica-1");
        let encoded = original.to_json().unwrap();
        assert_eq!(
            encoded,
            r#"{"cnt":7,"id":{"name":"replica-1"}}"#
        );
        assert_eq!(Timestamp::from_json(&encoded).unwrap(), original);
    }

    #[test]
    fn version_vector_json_round_trip() {
        let original = vv(&[("a", 1), ("b", 12)]);
        let encoded = original.to_json().unwrap();
        assert_eq!(encoded, r#"{"entries":{"a":1,"b":12}}"#);
        assert_eq!(VersionVector::from_json(&encoded).unwrap(), original);
    }
}
