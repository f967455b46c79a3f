use thiserror::Error;

use crate::codec::DecodeError;

/// Errors raised by trie views
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MptError {
    /// Bytes do not decode to a node
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A serialized trie must have an interior root
    #[error("root must be an interior node")]
    RootNotInterior,

    /// A full trie never contains stubs
    #[error("full trie contains a stub")]
    UnexpectedStub,

    /// Only delta views may leave a child out
    #[error("interior node is missing a child")]
    AbsentChild,

    /// The lookup path reaches a stub, so the proof says nothing about the key
    #[error("key is not authenticated by this proof")]
    ProofUnauthenticated,

    /// A delta leaves out a child where the proof has no subtree to keep
    #[error("delta does not apply to this proof")]
    IncompatibleUpdate,
}

/// Result alias for trie operations
pub type Result<T> = std::result::Result<T, MptError>;
