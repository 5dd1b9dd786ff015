pub mod immutable;
pub mod jsm_register;
pub mod lww_map;
pub mod lww_register;
pub mod mv_map;
pub mod mv_register;
pub mod pn_counter;
pub mod tagged;

pub use immutable::Immutable;
pub use jsm_register::JSMRegister;
pub use lww_map::LWWMap;
pub use lww_register::LWWRegister;
pub use mv_map::MVMap;
pub use mv_register::MVRegister;
pub use pn_counter::PNCounter;
pub use tagged::{MapKey, ScalarValue, TypeTag};

use crate::causal::VersionVector;

/// A convergent trait that can be used to merge data from two instances
/// together. Returns true when self has been changed in result of the merge
/// operation (there were new updates carried by `other`), or false
/// otherwise.
///
/// `merge` operation is expected to be:
/// - idempotent: `a.merge(a) <=> a`
/// - commutative: `a.merge(b) <=> b.merge(a)`
/// - associative: `a.merge(b).merge(c) <=> a.merge(b.merge(c))`
///
/// Concurrency between replicas is the domain of the merge operator itself;
/// in-process concurrent mutation of a single instance is undefined and
/// must be serialized externally.
pub trait Convergent {
    fn merge(&mut self, other: &Self) -> bool;
}

/// Extends `Convergent` with delta generation under a known receiver
/// context: a delta is a value of the same CRDT type carrying every update
/// not yet observed by `seen`, merged on the receiver with the ordinary
/// `merge`. `None` is the empty delta: the receiver is already up to date
/// and there is nothing to merge.
///
/// A delta is freshly materialized and never aliases the state it was
/// generated from; merging it twice observes no mutation through it.
pub trait DeltaConvergent: Convergent + Sized {
    fn delta(&self, seen: &VersionVector) -> Option<Self>;
}

/// Trait used to materialize a CRDT value into a user-facing state,
/// stripped of CRDT-specific metadata.
pub trait Materialize {
    type Value;
    fn value(&self) -> Self::Value;
}
