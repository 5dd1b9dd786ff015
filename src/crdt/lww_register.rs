use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::causal::{ReplicaId, Timestamp, VersionVector};
use crate::crdt::{Convergent, DeltaConvergent, Materialize};
use crate::error::Result;
use crate::json::{self, Json};

/// Last write wins register. The entry with the greatest timestamp among
/// all observed assigns is the register's value; the `(cnt, id)` timestamp
/// order is total, so the winner is the same on every replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LWWRegister<T> {
    value: T,
    stamp: Timestamp,
}

impl<T> LWWRegister<T> {
    pub fn new(value: T, stamp: Timestamp) -> Self {
        LWWRegister { value, stamp }
    }

    pub fn stamp(&self) -> &Timestamp {
        &self.stamp
    }
}

impl<T: Clone> LWWRegister<T> {
    /// Overwrites the register iff `stamp` is greater than the stored one,
    /// returning a copy of the new state as the delta of this operation. A
    /// stale or duplicate stamp is a defined no-op yielding the empty
    /// delta, so re-delivered updates are harmless.
    pub fn assign(&mut self, value: T, stamp: Timestamp) -> Option<Self> {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            Some(self.clone())
        } else {
            None
        }
    }
}

impl<'m, T> Materialize for &'m LWWRegister<T> {
    type Value = &'m T;

    fn value(&self) -> Self::Value {
        &self.value
    }
}

impl<T: Clone> Convergent for LWWRegister<T> {
    fn merge(&mut self, other: &Self) -> bool {
        // equal stamps carry equal values (stamps are globally unique), so
        // ties keep local
        if other.stamp > self.stamp {
            self.value = other.value.clone();
            self.stamp = other.stamp.clone();
            true
        } else {
            false
        }
    }
}

impl<T: Clone> DeltaConvergent for LWWRegister<T> {
    fn delta(&self, seen: &VersionVector) -> Option<Self> {
        if seen.contains(&self.stamp) {
            None
        } else {
            Some(self.clone())
        }
    }
}

impl<T> Json for LWWRegister<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_json(&self) -> Result<String> {
        let mut meta = Map::new();
        meta.insert("uid".to_owned(), json::to_value(self.stamp.id())?);
        meta.insert("cnt".to_owned(), Value::from(self.stamp.cnt()));

        let mut doc = Map::new();
        doc.insert("_type".to_owned(), Value::from("LWWRegister"));
        doc.insert("_metadata".to_owned(), Value::Object(meta));
        doc.insert("value".to_owned(), json::to_value(&self.value)?);
        Ok(Value::Object(doc).to_string())
    }

    fn from_json(input: &str) -> Result<Self> {
        let doc = json::parse_object(input)?;
        json::check_type(&doc, "LWWRegister")?;

        let meta = json::as_object(json::field(&doc, "_metadata")?, "_metadata")?;
        let id: ReplicaId = json::from_value(json::field(meta, "uid")?, "uid")?;
        let cnt = json::as_i32(json::field(meta, "cnt")?, "cnt")?;
        let value: T = json::from_value(json::field(&doc, "value")?, "value")?;

        Ok(LWWRegister::new(value, Timestamp::new(id, cnt)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    fn ts(cnt: i32, name: &str) -> Timestamp {
        Timestamp::new(ReplicaId::new(name), cnt)
    }

    #[test]
    fn lww_register_wins_by_timestamp() {
        let mut a = LWWRegister::new("A", ts(1, "a"));
        let mut b = LWWRegister::new("B", ts(1, "b"));

        // equal counters break the tie by replica id: "a" < "b"
        assert!(a.merge(&b.clone()));
        assert!(!b.merge(&a));

        assert_eq!((&a).value(), &"B");
        assert_eq!((&b).value(), &"B");
    }

    #[test]
    fn lww_register_stale_assign_is_a_noop() {
        let mut a = LWWRegister::new("new", ts(5, "a"));
        assert!(a.assign("old", ts(3, "b")).is_none());
        assert_eq!((&a).value(), &"new");

        let delta = a.assign("newer", ts(6, "a")).expect("fresh assign");
        assert_eq!((&delta).value(), &"newer");
    }

    #[test]
    fn lww_register_idempotency() {
        let mut a = LWWRegister::new("hello", ts(1, "a"));
        let b = a.clone();

        assert!(!a.merge(&b));
        assert_eq!((&a).value(), &"hello");
    }

    #[test]
    fn lww_register_associativity() {
        let mut a = LWWRegister::new("A", ts(1, "a"));
        let mut b = LWWRegister::new("B", ts(2, "b"));
        let c = LWWRegister::new("C", ts(3, "c"));

        let mut a2 = a.clone();
        let mut b2 = b.clone();
        let c2 = c.clone();

        // (a + b) + c
        assert!(a.merge(&b));
        assert!(a.merge(&c));
        assert_eq!((&a).value(), &"C");

        // a + (b + c)
        assert!(b2.merge(&c2));
        assert!(a2.merge(&b2));
        assert_eq!((&a2).value(), &"C");

        assert!(!a.merge(&a2));
    }

    #[test]
    fn lww_register_commutativity() {
        let mut a = LWWRegister::new("A", ts(1, "a"));
        let mut b = LWWRegister::new("B", ts(2, "b"));

        let mut a2 = a.clone();
        let b2 = b.clone();

        assert!(a.merge(&b2));
        assert!(!b.merge(&a2.clone()));
        assert_eq!((&a).value(), &"B");
        assert_eq!((&b).value(), &"B");

        assert!(a2.merge(&b));
        assert_eq!((&a2).value(), &"B");
    }

    #[test]
    fn lww_register_delta() {
        let a = LWWRegister::new("A", ts(3, "a"));

        let mut seen = VersionVector::new();
        assert!(a.delta(&seen).is_some());

        seen.add(&ts(2, "a"));
        assert!(a.delta(&seen).is_some());

        seen.add(&ts(3, "a"));
        assert!(a.delta(&seen).is_none());
    }

    #[test]
    fn lww_register_json_round_trip() {
        let a = LWWRegister::new("hello".to_owned(), ts(4, "a"));
        let encoded = a.to_json().unwrap();
        assert_eq!(
            encoded,
            r#"{"_metadata":{"cnt":4,"uid":{"name":"a"}},"_type":"LWWRegister","value":"hello"}"#
        );
        assert_eq!(LWWRegister::<String>::from_json(&encoded).unwrap(), a);
    }

    #[test]
    fn lww_register_rejects_foreign_documents() {
        let foreign = r#"{"_type":"MVRegister","_metadata":{},"value":[]}"#;
        match LWWRegister::<String>::from_json(foreign) {
            Err(Error::UnexpectedType { expected, actual }) => {
                assert_eq!(expected, "LWWRegister");
                assert_eq!(actual, "MVRegister");
            }
            other => panic!("expected UnexpectedType, got {other:?}"),
        }
    }
}
