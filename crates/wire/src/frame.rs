//! Frames and message types

use bytes::Bytes;

use crate::{Result, WireError};

/// Frame header: type byte and big-endian u16 length
pub const HEADER_LEN: usize = 3;

/// Largest payload a frame can carry
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Message codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// C→S: signed creation of a new log
    CreateLog = 0x01,
    /// C→S: signed statement appended to a log
    AppendLog = 0x02,
    /// S→C: request accepted
    Ack = 0x03,
    /// S→C: UTF-8 reason; the connection closes after it
    Error = 0x04,
    /// C→S: proof for a list of log ids
    RequestProof = 0x05,
    /// S→C: partial trie
    Proof = 0x06,
    /// C→S: last commit's changes for a list of log ids
    RequestDeltaProof = 0x07,
    /// S→C: commitment and delta trie
    DeltaProof = 0x08,
    /// C→S: push proof updates on every commit
    SubscribeProofUpdates = 0x09,
    /// C→S: stop pushing proof updates
    UnsubscribeProofUpdates = 0x0A,
    /// S→C: unsolicited commitment and delta trie
    ProofUpdate = 0x0B,
    /// C→S: details of one commitment
    RequestCommitmentDetails = 0x0C,
    /// S→C: commitment record
    CommitmentDetails = 0x0D,
    /// C→S: commitments after a given one
    RequestCommitmentHistory = 0x0E,
    /// S→C: list of commitment records
    CommitmentHistory = 0x0F,
}

impl MessageType {
    /// Wire code
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0x01 => Self::CreateLog,
            0x02 => Self::AppendLog,
            0x03 => Self::Ack,
            0x04 => Self::Error,
            0x05 => Self::RequestProof,
            0x06 => Self::Proof,
            0x07 => Self::RequestDeltaProof,
            0x08 => Self::DeltaProof,
            0x09 => Self::SubscribeProofUpdates,
            0x0A => Self::UnsubscribeProofUpdates,
            0x0B => Self::ProofUpdate,
            0x0C => Self::RequestCommitmentDetails,
            0x0D => Self::CommitmentDetails,
            0x0E => Self::RequestCommitmentHistory,
            0x0F => Self::CommitmentHistory,
            other => return Err(WireError::UnknownMessageType(other)),
        })
    }
}

/// One message on the stream.
///
/// The type byte is kept raw so a peer sending an unknown code can be
/// answered before the connection is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: u8,
    payload: Bytes,
}

impl Frame {
    /// Frame of a known type
    pub fn new(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self { kind: kind.code(), payload: payload.into() }
    }

    /// Frame with an arbitrary type byte
    pub fn raw(kind: u8, payload: impl Into<Bytes>) -> Self {
        Self { kind, payload: payload.into() }
    }

    /// Empty `Ack`
    pub fn ack() -> Self {
        Self::new(MessageType::Ack, Bytes::new())
    }

    /// `Error` carrying `reason`
    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(MessageType::Error, reason.into().into_bytes())
    }

    /// Payload-less frame
    pub fn empty(kind: MessageType) -> Self {
        Self::new(kind, Bytes::new())
    }

    /// Raw type byte
    pub const fn kind(&self) -> u8 {
        self.kind
    }

    /// Decoded type byte
    pub fn message_type(&self) -> Result<MessageType> {
        MessageType::try_from(self.kind)
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Reason text of an `Error` frame
    pub fn error_reason(&self) -> Option<String> {
        (self.kind == MessageType::Error.code())
            .then(|| String::from_utf8_lossy(&self.payload).into_owned())
    }

    /// Header bytes, refusing payloads over [`MAX_PAYLOAD_LEN`]
    pub fn header(&self) -> Result<[u8; HEADER_LEN]> {
        let len = u16::try_from(self.payload.len())
            .map_err(|_| WireError::FrameTooLarge(self.payload.len()))?;
        let [hi, lo] = len.to_be_bytes();
        Ok([self.kind, hi, lo])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes() {
        for code in 0x01..=0x0F {
            let kind = MessageType::try_from(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(matches!(MessageType::try_from(0x00), Err(WireError::UnknownMessageType(0))));
        assert!(matches!(MessageType::try_from(0x10), Err(WireError::UnknownMessageType(0x10))));
    }

    #[test]
    fn test_header() {
        let frame = Frame::new(MessageType::Proof, vec![0u8; 0x0102]);
        assert_eq!(frame.header().unwrap(), [0x06, 0x01, 0x02]);
        let frame = Frame::new(MessageType::Proof, vec![0u8; MAX_PAYLOAD_LEN]);
        assert_eq!(frame.header().unwrap(), [0x06, 0xFF, 0xFF]);
        let frame = Frame::new(MessageType::Proof, vec![0u8; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(frame.header(), Err(WireError::FrameTooLarge(65536))));
    }

    #[test]
    fn test_error_frame() {
        let frame = Frame::error("bad index");
        assert_eq!(frame.message_type().unwrap(), MessageType::Error);
        assert_eq!(frame.error_reason().as_deref(), Some("bad index"));
        assert_eq!(Frame::ack().error_reason(), None);
        assert!(Frame::ack().payload().is_empty());
    }

    #[test]
    fn test_raw_unknown_kind() {
        let frame = Frame::raw(0x7F, vec![1, 2]);
        assert_eq!(frame.kind(), 0x7F);
        assert!(frame.message_type().is_err());
        assert_eq!(frame.into_payload().as_ref(), &[1, 2]);
    }
}
