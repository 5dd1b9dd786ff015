//! Delta-state CRDTs for clients of a replicated object store: the same
//! logical object lives on many replicas, is updated without coordination
//! and converges regardless of delivery order, duplication or concurrent
//! writes.
//!
//! Every data type implements [`crdt::Convergent`], a commutative,
//! associative and idempotent merge, and [`crdt::DeltaConvergent`], which
//! produces a delta of the same CRDT type covering everything a receiver
//! (summarized by its [`causal::VersionVector`]) has not yet observed.
//! Update operations return the delta of exactly that operation, ready to
//! ship to peers. The [`json::Json`] codec carries states and deltas as
//! JSON documents separating user data from CRDT metadata.
//!
//! The library performs no I/O and holds no global state; timestamps come
//! from a per-replica [`clock::Clock`] passed in by the caller, so many
//! replicas can coexist in one process. A single instance is not
//! thread-safe and must be externally serialized.

pub mod causal;
pub mod clock;
pub mod crdt;
pub mod error;
pub mod json;

pub use crate::causal::{ReplicaId, Timestamp, VersionVector};
pub use crate::clock::{Clock, LogicalClock};
pub use crate::crdt::{
    Convergent, DeltaConvergent, Immutable, JSMRegister, LWWMap, LWWRegister, MVMap, MVRegister,
    MapKey, Materialize, PNCounter, ScalarValue, TypeTag,
};
pub use crate::error::{Error, Result};
pub use crate::json::Json;
