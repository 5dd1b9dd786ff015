use thiserror::Error;

/// Errors surfaced by the JSON codec. Every state-transition operation in
/// this crate is total; decoding foreign documents is the only fallible
/// surface.
#[derive(Debug, Error)]
pub enum Error {
    /// The document's `_type` discriminator names a different CRDT kind
    /// than the one being decoded. Merging across CRDT kinds is rejected
    /// at compile time, so this is where a mixed-up delta shows up.
    #[error("unexpected CRDT type: expected {expected}, found {actual}")]
    UnexpectedType {
        expected: &'static str,
        actual: String,
    },

    /// The document does not satisfy the required shape.
    #[error("malformed JSON: {0}")]
    MalformedJson(String),
}

pub type Result<T> = std::result::Result<T, Error>;
