use bverify_mpt::MptError;
use bverify_primitives::{short_hex, Hash};
use bverify_wire::WireError;
use thiserror::Error;

/// Errors returned by [`crate::Client`]
#[derive(Debug, Error)]
pub enum ClientError {
    /// No reply before the deadline; the connection stays open
    #[error("timed out waiting for the server")]
    Timeout,

    /// The server answered with an `Error` frame and closed the connection
    #[error("server error: {0}")]
    Server(String),

    /// Socket failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The connection is gone
    #[error("connection closed")]
    Closed,

    /// A frame or payload did not decode
    #[error("wire error: {0}")]
    Wire(#[source] WireError),

    /// A proof or delta did not decode or apply
    #[error("proof error: {0}")]
    Mpt(#[from] MptError),

    /// An applied update does not lead to the commitment it announced
    #[error("proof update announced {} but leads to {}", short_hex(.expected), short_hex(.actual))]
    CommitmentMismatch {
        /// Commitment the server announced
        expected: Hash,
        /// Digest of the updated proof
        actual: Hash,
    },

    /// No proof has been fetched yet
    #[error("no proof is being tracked")]
    NoProof,

    /// The server replied with a message of the wrong type
    #[error("unexpected reply type {0:#04x}")]
    UnexpectedReply(u8),
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(io) => Self::Transport(io),
            other => Self::Wire(other),
        }
    }
}

/// Result alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
