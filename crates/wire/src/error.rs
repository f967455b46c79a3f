use bverify_primitives::PrimitiveError;
use thiserror::Error;

/// Errors raised by framing and payload decoding
#[derive(Debug, Error)]
pub enum WireError {
    /// Payload does not fit the 16-bit length field
    #[error("frame payload of {0} bytes exceeds the 65535 byte limit")]
    FrameTooLarge(usize),

    /// Stream ended inside a frame
    #[error("connection closed mid-frame with {buffered} bytes buffered")]
    Truncated { buffered: usize },

    /// Type byte is not a known message code
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),

    /// A payload field failed to decode
    #[error("malformed {what}: {source}")]
    Field {
        what: &'static str,
        #[source]
        source: PrimitiveError,
    },

    /// A payload is structurally wrong
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    /// Socket read or write failed
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    pub(crate) fn field(what: &'static str) -> impl FnOnce(PrimitiveError) -> Self {
        move |source| Self::Field { what, source }
    }

    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed { what, reason: reason.into() }
    }
}

/// Result alias for wire operations
pub type Result<T> = std::result::Result<T, WireError>;
