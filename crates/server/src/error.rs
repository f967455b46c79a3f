use bverify_primitives::{short_hex, Hash, PrimitiveError};
use bverify_wire::{MessageType, WireError};
use thiserror::Error;

/// Reasons a connection is answered with an `Error` frame and closed
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Payload failed structural decoding
    #[error("parse error: {0}")]
    Parse(#[source] WireError),

    /// Signature does not verify under the controlling key
    #[error("bad signature: {0}")]
    BadSignature(#[source] PrimitiveError),

    /// `CreateLog` for a log id that is already registered
    #[error("log {} already exists", short_hex(.0))]
    DuplicateLog(Hash),

    /// `AppendLog` for a log id nobody created
    #[error("log {} does not exist", short_hex(.0))]
    UnknownLog(Hash),

    /// `AppendLog` index is not the next one expected
    #[error("bad index for log {}: expected {expected}, got {got}", short_hex(.log_id))]
    BadIndex {
        /// Log the statement was for
        log_id: Hash,
        /// Index the server expected
        expected: u64,
        /// Index the statement carried
        got: u64,
    },

    /// Type byte is not a known message code
    #[error("unknown message type {0:#04x}")]
    UnknownMessage(u8),

    /// Known message that clients must not send
    #[error("unexpected message {0:?}")]
    UnexpectedMessage(MessageType),

    /// Details asked for a commitment the server never made
    #[error("commitment {} not found", short_hex(.0))]
    UnknownCommitment(Hash),

    /// Nothing has been committed yet
    #[error("no commitment has been made yet")]
    NoCommitment,

    /// Answer or pushed update does not fit in one frame
    #[error("{kind:?} of {len} bytes does not fit in one frame; request fewer keys")]
    ReplyTooLarge {
        /// Message that was being built
        kind: MessageType,
        /// Its encoded payload length
        len: usize,
    },

    /// Malformed or oversize frame on the stream
    #[error("framing error: {0}")]
    Framing(#[source] WireError),

    /// Socket failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl From<WireError> for ProcessorError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(io) => Self::Transport(io),
            WireError::UnknownMessageType(code) => Self::UnknownMessage(code),
            WireError::FrameTooLarge(_) | WireError::Truncated { .. } => Self::Framing(err),
            other => Self::Parse(other),
        }
    }
}

/// Result alias for request processing
pub type Result<T> = std::result::Result<T, ProcessorError>;
