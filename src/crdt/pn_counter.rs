use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::causal::{ReplicaId, Timestamp, VersionVector};
use crate::crdt::{Convergent, DeltaConvergent, Materialize};
use crate::error::{Error, Result};
use crate::json::{self, Json};

type Row = (i32, Timestamp);

/// A positive-negative counter: a distributed, eventually consistent
/// counter that can be concurrently incremented and decremented on many
/// replicas. Each replica's row holds its running total and the stamp of
/// its latest local update; per-replica totals are monotone, so the row
/// with the greater stamp carries the full per-replica sum and merge keeps
/// it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PNCounter {
    increments: BTreeMap<ReplicaId, Row>,
    decrements: BTreeMap<ReplicaId, Row>,
}

impl PNCounter {
    pub fn new() -> Self {
        PNCounter::default()
    }

    /// Adds `amount` to the issuing replica's increment row, restamping
    /// it. The delta carries exactly that row. A stale stamp is a defined
    /// no-op yielding the empty delta.
    pub fn increment(&mut self, amount: i32, stamp: Timestamp) -> Option<Self> {
        debug_assert!(amount >= 0);
        Self::bump(&mut self.increments, amount, stamp).map(|row| PNCounter {
            increments: row,
            decrements: BTreeMap::new(),
        })
    }

    /// Counterpart of `increment` on the decrement rows.
    pub fn decrement(&mut self, amount: i32, stamp: Timestamp) -> Option<Self> {
        debug_assert!(amount >= 0);
        Self::bump(&mut self.decrements, amount, stamp).map(|row| PNCounter {
            increments: BTreeMap::new(),
            decrements: row,
        })
    }

    fn bump(
        rows: &mut BTreeMap<ReplicaId, Row>,
        amount: i32,
        stamp: Timestamp,
    ) -> Option<BTreeMap<ReplicaId, Row>> {
        let id = stamp.id().clone();
        if let Some((_, stored)) = rows.get(&id) {
            if *stored >= stamp {
                return None;
            }
        }
        let total = rows.get(&id).map(|(total, _)| *total).unwrap_or(0) + amount;
        rows.insert(id.clone(), (total, stamp.clone()));

        let mut row = BTreeMap::new();
        row.insert(id, (total, stamp));
        Some(row)
    }

    /// Net contribution of a single replica.
    pub fn get(&self, id: &ReplicaId) -> i64 {
        let inc = self.increments.get(id).map(|(total, _)| *total).unwrap_or(0);
        let dec = self.decrements.get(id).map(|(total, _)| *total).unwrap_or(0);
        inc as i64 - dec as i64
    }

    pub fn is_empty(&self) -> bool {
        self.increments.is_empty() && self.decrements.is_empty()
    }

    fn merge_rows(into: &mut BTreeMap<ReplicaId, Row>, from: &BTreeMap<ReplicaId, Row>) -> bool {
        let mut changed = false;
        for (id, (total, stamp)) in from.iter() {
            match into.get(id) {
                Some((_, stored)) if stored >= stamp => {}
                _ => {
                    into.insert(id.clone(), (*total, stamp.clone()));
                    changed = true;
                }
            }
        }
        changed
    }

    fn filter_rows(rows: &BTreeMap<ReplicaId, Row>, seen: &VersionVector) -> BTreeMap<ReplicaId, Row> {
        rows.iter()
            .filter(|(_, (_, stamp))| !seen.contains(stamp))
            .map(|(id, row)| (id.clone(), row.clone()))
            .collect()
    }
}

impl Materialize for PNCounter {
    type Value = i64;

    fn value(&self) -> Self::Value {
        let inc: i64 = self.increments.values().map(|(total, _)| *total as i64).sum();
        let dec: i64 = self.decrements.values().map(|(total, _)| *total as i64).sum();
        inc - dec
    }
}

impl Convergent for PNCounter {
    fn merge(&mut self, other: &Self) -> bool {
        let inc_changed = Self::merge_rows(&mut self.increments, &other.increments);
        let dec_changed = Self::merge_rows(&mut self.decrements, &other.decrements);
        inc_changed || dec_changed
    }
}

impl DeltaConvergent for PNCounter {
    fn delta(&self, seen: &VersionVector) -> Option<Self> {
        let increments = Self::filter_rows(&self.increments, seen);
        let decrements = Self::filter_rows(&self.decrements, seen);
        if increments.is_empty() && decrements.is_empty() {
            return None;
        }
        Some(PNCounter {
            increments,
            decrements,
        })
    }
}

fn rows_to_json(rows: &BTreeMap<ReplicaId, Row>) -> Result<Value> {
    let mut out = Map::new();
    for (id, (total, stamp)) in rows.iter() {
        let mut row = Map::new();
        row.insert("amount".to_owned(), Value::from(*total));
        row.insert("ts".to_owned(), json::to_value(stamp)?);
        out.insert(id.name().to_owned(), Value::Object(row));
    }
    Ok(Value::Object(out))
}

fn rows_from_json(value: &Value, what: &str) -> Result<BTreeMap<ReplicaId, Row>> {
    let mut rows = BTreeMap::new();
    for (name, row) in json::as_object(value, what)? {
        let row = json::as_object(row, "counter row")?;
        let total = json::as_i32(json::field(row, "amount")?, "amount")?;
        let stamp: Timestamp = json::from_value(json::field(row, "ts")?, "ts")?;
        if stamp.id().name() != name {
            return Err(Error::MalformedJson(format!(
                "row {name:?} stamped by replica {:?}",
                stamp.id().name()
            )));
        }
        rows.insert(ReplicaId::new(name.as_str()), (total, stamp));
    }
    Ok(rows)
}

impl Json for PNCounter {
    fn to_json(&self) -> Result<String> {
        let mut meta = Map::new();
        meta.insert("increments".to_owned(), rows_to_json(&self.increments)?);
        meta.insert("decrements".to_owned(), rows_to_json(&self.decrements)?);

        let mut doc = Map::new();
        doc.insert("_type".to_owned(), Value::from("PNCounter"));
        doc.insert("_metadata".to_owned(), Value::Object(meta));
        doc.insert("value".to_owned(), Value::from(self.value()));
        Ok(Value::Object(doc).to_string())
    }

    fn from_json(input: &str) -> Result<Self> {
        let doc = json::parse_object(input)?;
        json::check_type(&doc, "PNCounter")?;

        let meta = json::as_object(json::field(&doc, "_metadata")?, "_metadata")?;
        // the top-level "value" is advisory and recomputed from the rows
        Ok(PNCounter {
            increments: rows_from_json(json::field(meta, "increments")?, "increments")?,
            decrements: rows_from_json(json::field(meta, "decrements")?, "decrements")?,
        })
    }
}
