//! Per-connection request handling

use std::sync::Arc;

use bverify_wire::{
    CommitmentHistory, CommitmentRef, Frame, KeyList, MessageType, ProofUpdate, SignedCreateLog,
    SignedLogStatement, MAX_PAYLOAD_LEN,
};
use tracing::debug;

use crate::engine::Engine;
use crate::registry::ConnectionId;
use crate::{ProcessorError, Result};

/// Turns one client's requests into replies.
///
/// Every request gets exactly one reply frame. An error ends the
/// connection after the caller sends it as an `Error` frame.
#[derive(Debug)]
pub struct LogProcessor {
    engine: Arc<Engine>,
    connection: ConnectionId,
}

impl LogProcessor {
    /// Processor for requests arriving on `connection`
    pub fn new(engine: Arc<Engine>, connection: ConnectionId) -> Self {
        Self { engine, connection }
    }

    /// Registry id that subscriptions are filed under
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Handle one request frame
    pub async fn process(&self, frame: Frame) -> Result<Frame> {
        let kind = frame.message_type()?;
        debug!(connection = self.connection, ?kind, len = frame.payload().len(), "request");
        let payload = frame.payload();
        let registry = self.engine.registry();

        match kind {
            MessageType::CreateLog => {
                let signed = SignedCreateLog::from_bytes(payload).map_err(ProcessorError::Parse)?;
                let log_id = self.engine.register_log(&signed).await?;
                registry.track(self.connection, log_id);
                Ok(Frame::ack())
            }
            MessageType::AppendLog => {
                let signed = SignedLogStatement::from_bytes(payload).map_err(ProcessorError::Parse)?;
                let log_id = self.engine.append_statement(&signed).await?;
                registry.track(self.connection, log_id);
                Ok(Frame::ack())
            }
            MessageType::RequestProof => {
                let keys = self.requested_keys(payload)?;
                let proof = self.engine.proof(&keys).await;
                let len = proof.encoded_len();
                if len > MAX_PAYLOAD_LEN {
                    return Err(ProcessorError::ReplyTooLarge { kind: MessageType::Proof, len });
                }
                let mut bytes = Vec::with_capacity(len);
                proof.encode_into(&mut bytes);
                Ok(Frame::new(MessageType::Proof, bytes))
            }
            MessageType::RequestDeltaProof => {
                let keys = self.requested_keys(payload)?;
                let (commitment, delta) = self.engine.delta_proof(&keys)?;
                let update = ProofUpdate::new(commitment, delta.to_bytes());
                reply(MessageType::DeltaProof, update.to_bytes())
            }
            MessageType::SubscribeProofUpdates => {
                registry.set_auto_update(self.connection, true);
                Ok(Frame::ack())
            }
            MessageType::UnsubscribeProofUpdates => {
                registry.set_auto_update(self.connection, false);
                Ok(Frame::ack())
            }
            MessageType::RequestCommitmentDetails => {
                let CommitmentRef(wanted) = CommitmentRef::from_bytes(payload).map_err(ProcessorError::Parse)?;
                let record = self.engine.commitment_details(wanted)?;
                reply(MessageType::CommitmentDetails, record.to_bytes())
            }
            MessageType::RequestCommitmentHistory => {
                let CommitmentRef(since) = CommitmentRef::from_bytes(payload).map_err(ProcessorError::Parse)?;
                let history = CommitmentHistory(self.engine.commitment_history(since));
                let (bytes, sent) = history.to_frame_bytes();
                if sent < history.0.len() {
                    debug!(connection = self.connection, sent, total = history.0.len(), "history truncated to one frame");
                }
                Ok(Frame::new(MessageType::CommitmentHistory, bytes))
            }
            other => Err(ProcessorError::UnexpectedMessage(other)),
        }
    }

    /// Keys named in a proof request; an empty list means every log this
    /// connection has touched
    fn requested_keys(&self, payload: &[u8]) -> Result<Vec<bverify_primitives::Key>> {
        let KeyList(keys) = KeyList::from_bytes(payload).map_err(ProcessorError::Parse)?;
        if keys.is_empty() {
            return Ok(self.engine.registry().tracked_keys(self.connection));
        }
        Ok(keys)
    }
}

/// Wrap `payload` in a reply frame, refusing what the codec could not send
fn reply(kind: MessageType, payload: Vec<u8>) -> Result<Frame> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProcessorError::ReplyTooLarge { kind, len: payload.len() });
    }
    Ok(Frame::new(kind, payload))
}
