//! Connection to a b_verify server

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bverify_mpt::{DeltaMpt, PartialMpt};
use bverify_primitives::{short_hex, Hash, Key, PrivateKey};
use bverify_wire::{
    Commitment, CommitmentHistory, CommitmentRef, Frame, FrameCodec, KeyList, MessageType, ProofUpdate,
    SignedCreateLog, SignedLogStatement,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream, ToSocketAddrs,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::{ClientConfig, ClientError, Result};

/// Pushed proof updates kept while nobody is reading them
const UPDATE_BUFFER: usize = 64;

/// A proof update as received, after it was checked against the tracked
/// proof when there is one
#[derive(Debug, Clone)]
pub struct VerifiedUpdate {
    /// Commitment the update moves to
    pub commitment: Hash,
    /// Changes along the subscribed keys
    pub delta: DeltaMpt,
    /// Whether the update was applied to the tracked proof
    pub applied: bool,
}

#[derive(Debug, Default)]
struct InFlight {
    /// Reply slot of the request being waited on
    slot: Option<oneshot::Sender<Frame>>,
    /// Replies still owed to requests that timed out
    stale: usize,
}

#[derive(Debug, Default)]
struct Shared {
    in_flight: SyncMutex<InFlight>,
    /// Set once the receive loop has stopped
    closed: AtomicBool,
}

/// Client connection.
///
/// One request is in flight at a time. Proof updates pushed by the server
/// are queued separately and read with [`Client::next_proof_update`].
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    writer: Mutex<FramedWrite<OwnedWriteHalf, FrameCodec>>,
    shared: Arc<Shared>,
    updates: Mutex<mpsc::Receiver<ProofUpdate>>,
    /// Proof kept in step with pushed updates
    proof: SyncMutex<Option<PartialMpt>>,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Connect to a server
    pub async fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared::default());
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
        let receiver = tokio::spawn(receive_loop(
            FramedRead::new(read_half, FrameCodec),
            Arc::clone(&shared),
            updates_tx,
        ));
        info!(%peer, "connected");

        Ok(Self {
            config,
            writer: Mutex::new(FramedWrite::new(write_half, FrameCodec)),
            shared,
            updates: Mutex::new(updates_rx),
            proof: SyncMutex::new(None),
            receiver,
        })
    }

    /// Settings the client was connected with
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `frame` and wait for the reply
    async fn request(&self, frame: Frame, timeout: Duration) -> Result<Frame> {
        // holding the writer keeps a single request in flight
        let mut writer = self.writer.lock().await;
        let (tx, rx) = oneshot::channel();
        self.shared.in_flight.lock().slot = Some(tx);
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.in_flight.lock().slot = None;
            return Err(ClientError::Closed);
        }

        if let Err(err) = writer.send(frame).await {
            self.shared.in_flight.lock().slot = None;
            return Err(err.into());
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => match reply.error_reason() {
                Some(reason) => Err(ClientError::Server(reason)),
                None => Ok(reply),
            },
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                // the server still answers this request, skip that answer
                let mut in_flight = self.shared.in_flight.lock();
                if in_flight.slot.take().is_some() {
                    in_flight.stale += 1;
                }
                Err(ClientError::Timeout)
            }
        }
    }

    async fn expect_reply(&self, frame: Frame, reply: MessageType, timeout: Duration) -> Result<Frame> {
        let frame = self.request(frame, timeout).await?;
        if frame.kind() != reply.code() {
            return Err(ClientError::UnexpectedReply(frame.kind()));
        }
        Ok(frame)
    }

    async fn expect_ack(&self, frame: Frame) -> Result<()> {
        self.expect_reply(frame, MessageType::Ack, self.config.ack_timeout).await.map(drop)
    }

    /// Open a log controlled by `key`. Returns its log id.
    pub async fn create_log(&self, key: &PrivateKey, initial_statement: impl Into<Vec<u8>>) -> Result<Hash> {
        let signed = SignedCreateLog::sign(key, initial_statement)?;
        self.expect_ack(Frame::new(MessageType::CreateLog, signed.to_bytes())).await?;
        let log_id = signed.log_id();
        debug!(log = %short_hex(&log_id), "log created");
        Ok(log_id)
    }

    /// Append statement `index` to a log. Returns the witness the server stores.
    pub async fn append_log(
        &self,
        key: &PrivateKey,
        log_id: Hash,
        index: u64,
        statement: impl Into<Vec<u8>>,
    ) -> Result<Hash> {
        let signed = SignedLogStatement::sign(key, log_id, index, statement)?;
        self.expect_ack(Frame::new(MessageType::AppendLog, signed.to_bytes())).await?;
        Ok(signed.witness())
    }

    /// Proof for `keys` against the server's current trie; an empty list
    /// asks for every log this connection touched. The proof becomes the
    /// tracked proof.
    pub async fn request_proof(&self, keys: &[Key]) -> Result<PartialMpt> {
        let frame = Frame::new(MessageType::RequestProof, KeyList::new(keys.to_vec()).to_bytes());
        let reply = self.expect_reply(frame, MessageType::Proof, self.config.proof_timeout).await?;
        let proof = PartialMpt::from_bytes(reply.payload())?;
        *self.proof.lock() = Some(proof.clone());
        Ok(proof)
    }

    /// Changes the last commit made along `keys`, with the commitment they
    /// lead to
    pub async fn request_delta_proof(&self, keys: &[Key]) -> Result<(Hash, DeltaMpt)> {
        let frame = Frame::new(MessageType::RequestDeltaProof, KeyList::new(keys.to_vec()).to_bytes());
        let reply = self.expect_reply(frame, MessageType::DeltaProof, self.config.proof_timeout).await?;
        let update = ProofUpdate::from_bytes(reply.payload())?;
        Ok((update.commitment, DeltaMpt::from_bytes(&update.delta)?))
    }

    /// Ask for a proof update on every commit
    pub async fn subscribe(&self) -> Result<()> {
        self.expect_ack(Frame::empty(MessageType::SubscribeProofUpdates)).await
    }

    /// Stop pushed proof updates
    pub async fn unsubscribe(&self) -> Result<()> {
        self.expect_ack(Frame::empty(MessageType::UnsubscribeProofUpdates)).await
    }

    /// Record of `commitment`, or of the newest commitment when `None`
    pub async fn commitment_details(&self, commitment: Option<Hash>) -> Result<Commitment> {
        let frame = Frame::new(MessageType::RequestCommitmentDetails, CommitmentRef(commitment).to_bytes().to_vec());
        let reply = self.expect_reply(frame, MessageType::CommitmentDetails, self.config.ack_timeout).await?;
        Ok(Commitment::from_bytes(reply.payload())?)
    }

    /// Included commitments after `since`, oldest first. The server sends
    /// at most one frame's worth; ask again after the last one for more.
    pub async fn commitment_history(&self, since: Option<Hash>) -> Result<Vec<Commitment>> {
        let frame = Frame::new(MessageType::RequestCommitmentHistory, CommitmentRef(since).to_bytes().to_vec());
        let reply = self.expect_reply(frame, MessageType::CommitmentHistory, self.config.ack_timeout).await?;
        Ok(CommitmentHistory::from_bytes(reply.payload())?.0)
    }

    /// Wait for the next pushed proof update and apply it to the tracked
    /// proof.
    ///
    /// Fails with [`ClientError::CommitmentMismatch`] when the updated proof
    /// does not hash to the announced commitment; the tracked proof is left
    /// as it was.
    pub async fn next_proof_update(&self) -> Result<VerifiedUpdate> {
        let update = {
            let mut updates = self.updates.lock().await;
            match tokio::time::timeout(self.config.proof_timeout, updates.recv()).await {
                Ok(Some(update)) => update,
                Ok(None) => return Err(ClientError::Closed),
                Err(_) => return Err(ClientError::Timeout),
            }
        };
        let delta = DeltaMpt::from_bytes(&update.delta)?;

        let mut tracked = self.proof.lock();
        let applied = match tracked.as_ref() {
            Some(current) => {
                let mut next = current.clone();
                next.process_updates(&delta)?;
                let actual = next.commitment();
                if actual != update.commitment {
                    return Err(ClientError::CommitmentMismatch { expected: update.commitment, actual });
                }
                *tracked = Some(next);
                true
            }
            None => false,
        };
        Ok(VerifiedUpdate { commitment: update.commitment, delta, applied })
    }

    /// Copy of the tracked proof
    pub fn proof(&self) -> Result<PartialMpt> {
        self.proof.lock().clone().ok_or(ClientError::NoProof)
    }

    /// Value the tracked proof authenticates for `key`
    pub fn proven_value(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let tracked = self.proof.lock();
        let proof = tracked.as_ref().ok_or(ClientError::NoProof)?;
        Ok(proof.get(key)?.map(<[u8]>::to_vec))
    }

    /// Flush and close the sending side
    pub async fn close(&self) -> Result<()> {
        self.writer.lock().await.close().await?;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

/// Route replies to the request in flight and proof updates to the queue
async fn receive_loop(
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
    shared: Arc<Shared>,
    updates: mpsc::Sender<ProofUpdate>,
) {
    while let Some(frame) = reader.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "connection failed");
                break;
            }
        };
        if frame.kind() == MessageType::ProofUpdate.code() {
            match ProofUpdate::from_bytes(frame.payload()) {
                Ok(update) => {
                    if updates.try_send(update).is_err() {
                        warn!("proof update queue full, dropping update");
                    }
                }
                Err(err) => warn!(error = %err, "malformed proof update"),
            }
            continue;
        }
        let mut in_flight = shared.in_flight.lock();
        let waiting = if in_flight.stale > 0 {
            in_flight.stale -= 1;
            None
        } else {
            in_flight.slot.take()
        };
        match waiting {
            Some(reply) => {
                let _ = reply.send(frame);
            }
            None => match frame.error_reason() {
                Some(reason) => warn!(%reason, "server closed the connection"),
                None => debug!(kind = frame.kind(), "late or unrequested reply dropped"),
            },
        }
    }
    // fails the request in flight with `Closed`
    shared.closed.store(true, Ordering::SeqCst);
    shared.in_flight.lock().slot = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bverify_primitives::sha256;
    use bverify_server::{LoopbackPublisher, Server, ServerConfig};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    async fn start_server() -> (Arc<Server>, SocketAddr) {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            auto_commit: false,
            ..Default::default()
        };
        let server = Arc::new(Server::new(config, Arc::new(LoopbackPublisher::new())).await.unwrap());
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = Arc::clone(&server);
        tokio::spawn(async move { serving.serve(listener).await });
        (server, addr)
    }

    fn quick() -> ClientConfig {
        ClientConfig { ack_timeout: Duration::from_secs(5), proof_timeout: Duration::from_secs(5) }
    }

    #[tokio::test]
    async fn test_create_append_and_follow_updates() {
        let (server, addr) = start_server().await;
        let client = Client::connect(addr, quick()).await.unwrap();
        let key = PrivateKey::generate();

        let log_id = client.create_log(&key, b"hello".to_vec()).await.unwrap();
        client.append_log(&key, log_id, 1, b"one".to_vec()).await.unwrap();
        let witness = client.append_log(&key, log_id, 2, b"two".to_vec()).await.unwrap();
        client.subscribe().await.unwrap();

        let commitment = server.commit().await.unwrap();
        let update = client.next_proof_update().await.unwrap();
        assert_eq!(update.commitment, commitment);
        assert!(!update.applied);
        assert_eq!(update.delta.get(&log_id).unwrap(), Some(witness.as_slice()));

        let proof = client.request_proof(&[]).await.unwrap();
        assert_eq!(proof.commitment(), commitment);
        assert_eq!(client.proven_value(&log_id).unwrap(), Some(witness.to_vec()));

        let witness = client.append_log(&key, log_id, 3, b"three".to_vec()).await.unwrap();
        let next = server.commit().await.unwrap();
        let update = client.next_proof_update().await.unwrap();
        assert!(update.applied);
        assert_eq!(update.commitment, next);
        assert_eq!(client.proof().unwrap().commitment(), next);
        assert_eq!(client.proven_value(&log_id).unwrap(), Some(witness.to_vec()));

        let (announced, delta) = client.request_delta_proof(&[log_id]).await.unwrap();
        assert_eq!(announced, next);
        assert_eq!(delta.get(&log_id).unwrap(), Some(witness.as_slice()));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_a_server_error() {
        let (_server, addr) = start_server().await;
        let key = PrivateKey::generate();
        let first = Client::connect(addr, quick()).await.unwrap();
        first.create_log(&key, b"same".to_vec()).await.unwrap();

        let second = Client::connect(addr, quick()).await.unwrap();
        let err = second.create_log(&key, b"same".to_vec()).await.unwrap_err();
        assert!(matches!(err, ClientError::Server(reason) if reason.contains("already exists")));
        assert!(matches!(second.subscribe().await, Err(ClientError::Closed | ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn test_bad_index() {
        let (_server, addr) = start_server().await;
        let client = Client::connect(addr, quick()).await.unwrap();
        let key = PrivateKey::generate();
        let log_id = client.create_log(&key, b"hello".to_vec()).await.unwrap();
        let err = client.append_log(&key, log_id, 0, b"zero".to_vec()).await.unwrap_err();
        assert!(matches!(err, ClientError::Server(reason) if reason.contains("bad index")));
    }

    #[tokio::test]
    async fn test_commitment_queries() {
        let (server, addr) = start_server().await;
        let client = Client::connect(addr, quick()).await.unwrap();
        let maiden = client.commitment_details(None).await.unwrap();
        assert_eq!(maiden.commitment, server.engine().current_commitment().await);

        let key = PrivateKey::generate();
        client.create_log(&key, b"x".to_vec()).await.unwrap();
        let second = server.commit().await.unwrap();

        let mut history = Vec::new();
        for _ in 0..100 {
            history = client.commitment_history(None).await.unwrap();
            if history.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(history.iter().map(|c| c.commitment).collect::<Vec<_>>(), vec![maiden.commitment, second]);
        assert!(client.commitment_history(Some(second)).await.unwrap().is_empty());

        let err = client.commitment_details(Some([6u8; 32])).await.unwrap_err();
        assert!(matches!(err, ClientError::Server(_)));
    }

    #[tokio::test]
    async fn test_no_proof_tracked() {
        let (_server, addr) = start_server().await;
        let client = Client::connect(addr, quick()).await.unwrap();
        assert!(matches!(client.proof(), Err(ClientError::NoProof)));
        assert!(matches!(client.proven_value(&[0u8; 32]), Err(ClientError::NoProof)));
    }

    #[tokio::test]
    async fn test_timeout_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Framed::new(stream, FrameCodec);
            // answer the first request only once the second is in,
            // with a frame the second could not accept
            conn.next().await.unwrap().unwrap();
            conn.next().await.unwrap().unwrap();
            conn.send(Frame::new(MessageType::Proof, vec![0])).await.unwrap();
            conn.send(Frame::ack()).await.unwrap();
            conn
        });

        let config = ClientConfig { ack_timeout: Duration::from_millis(100), proof_timeout: Duration::from_millis(100) };
        let client = Client::connect(addr, config).await.unwrap();
        assert!(matches!(client.subscribe().await, Err(ClientError::Timeout)));
        client.unsubscribe().await.unwrap();
        assert!(matches!(client.next_proof_update().await, Err(ClientError::Timeout)));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_mismatched_update_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut full = bverify_mpt::FullMpt::new();
        full.insert([1u8; 32], vec![1]);
        full.insert([0x80; 32], vec![2]);
        full.reset();
        let proof = PartialMpt::from_full(&full, &[[1u8; 32]]);
        full.insert([1u8; 32], vec![3]);
        let delta = DeltaMpt::from_full(&full).updates_for_key(&[1u8; 32]);
        let honest = full.commitment();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Framed::new(stream, FrameCodec);
            conn.next().await.unwrap().unwrap();
            conn.send(Frame::new(MessageType::Proof, proof.to_bytes())).await.unwrap();
            let bogus = ProofUpdate::new(sha256(b"bogus"), delta.to_bytes());
            conn.send(Frame::new(MessageType::ProofUpdate, bogus.to_bytes())).await.unwrap();
            let good = ProofUpdate::new(honest, delta.to_bytes());
            conn.send(Frame::new(MessageType::ProofUpdate, good.to_bytes())).await.unwrap();
            conn
        });

        let client = Client::connect(addr, quick()).await.unwrap();
        let before = client.request_proof(&[[1u8; 32]]).await.unwrap().commitment();
        assert!(matches!(client.next_proof_update().await, Err(ClientError::CommitmentMismatch { .. })));
        assert_eq!(client.proof().unwrap().commitment(), before);

        let update = client.next_proof_update().await.unwrap();
        assert!(update.applied);
        assert_eq!(client.proven_value(&[1u8; 32]).unwrap(), Some(vec![3]));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_server_gone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });
        let client = Client::connect(addr, quick()).await.unwrap();
        let err = client.subscribe().await.unwrap_err();
        assert!(matches!(err, ClientError::Closed | ClientError::Transport(_)));
        assert!(matches!(client.next_proof_update().await, Err(ClientError::Closed)));
    }
}
