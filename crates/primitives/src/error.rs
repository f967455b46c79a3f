use thiserror::Error;

/// Errors raised while decoding or verifying primitive values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// Input ended before a complete value was read
    #[error("unexpected end of input: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// A varint used a longer form than its value requires
    #[error("non-canonical varint encoding for {0}")]
    NonCanonicalVarInt(u64),

    /// A length-prefixed field exceeded its bound
    #[error("{field} is {len} bytes, maximum is {max}")]
    FieldTooLong { field: &'static str, len: u64, max: usize },

    /// Bytes are not a compressed secp256k1 point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Bytes are not a valid secret scalar
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// Bytes are not a compact (r, s) signature
    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,

    /// Signature does not verify under the public key
    #[error("signature verification failed")]
    BadSignature,
}

/// Result alias for primitive operations
pub type Result<T> = std::result::Result<T, PrimitiveError>;
