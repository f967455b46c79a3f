//! Connections that receive proof updates

use std::collections::{BTreeSet, HashMap};

use bverify_mpt::DeltaMpt;
use bverify_primitives::{short_hex, Hash, Key};
use bverify_wire::{Frame, MessageType, ProofUpdate, MAX_PAYLOAD_LEN};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::ProcessorError;

/// Identifies one client connection
pub type ConnectionId = u64;

#[derive(Debug)]
struct Subscriber {
    keys: BTreeSet<Key>,
    auto_update: bool,
    sender: mpsc::Sender<Frame>,
    /// Told why the registry dropped this connection
    evict: Option<oneshot::Sender<ProcessorError>>,
}

#[derive(Debug, Default)]
struct Inner {
    subscribers: HashMap<ConnectionId, Subscriber>,
    next_id: ConnectionId,
}

/// Per-connection key sets and outbound queues
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    inner: Mutex<Inner>,
}

impl SubscriberRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection whose frames go to `sender`
    pub fn register(&self, sender: mpsc::Sender<Frame>) -> ConnectionId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .subscribers
            .insert(id, Subscriber { keys: BTreeSet::new(), auto_update: false, sender, evict: None });
        id
    }

    /// Resolves with the reason if the registry drops `id` on its own.
    /// Closes without a value when the connection is removed normally.
    pub fn eviction(&self, id: ConnectionId) -> oneshot::Receiver<ProcessorError> {
        let (tx, rx) = oneshot::channel();
        if let Some(subscriber) = self.inner.lock().subscribers.get_mut(&id) {
            subscriber.evict = Some(tx);
        }
        rx
    }

    /// Forget a connection and drop its queue handle
    pub fn remove(&self, id: ConnectionId) {
        self.inner.lock().subscribers.remove(&id);
    }

    /// Add `key` to the keys `id` follows
    pub fn track(&self, id: ConnectionId, key: Key) {
        if let Some(subscriber) = self.inner.lock().subscribers.get_mut(&id) {
            subscriber.keys.insert(key);
        }
    }

    /// Turn pushed proof updates on or off for `id`
    pub fn set_auto_update(&self, id: ConnectionId, on: bool) {
        if let Some(subscriber) = self.inner.lock().subscribers.get_mut(&id) {
            subscriber.auto_update = on;
        }
    }

    /// Keys `id` follows, in key order
    pub fn tracked_keys(&self, id: ConnectionId) -> Vec<Key> {
        self.inner
            .lock()
            .subscribers
            .get(&id)
            .map(|subscriber| subscriber.keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Whether no connection is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue the projection of `delta` for every subscribed connection.
    ///
    /// Never waits: a connection whose queue is full misses this update.
    /// A connection whose update does not fit in a frame can never be kept
    /// in sync, so it is evicted. Returns how many updates were queued.
    pub fn broadcast(&self, commitment: Hash, delta: &DeltaMpt) -> usize {
        let mut inner = self.inner.lock();
        let mut queued = 0;
        let mut oversize = Vec::new();
        for (id, subscriber) in &inner.subscribers {
            if !subscriber.auto_update || subscriber.keys.is_empty() {
                continue;
            }
            let keys: Vec<Key> = subscriber.keys.iter().copied().collect();
            let update = ProofUpdate::new(commitment, delta.updates_for_keys(&keys).to_bytes()).to_bytes();
            if update.len() > MAX_PAYLOAD_LEN {
                warn!(connection = id, len = update.len(), keys = keys.len(), "proof update exceeds frame limit, dropping subscriber");
                oversize.push((*id, update.len()));
                continue;
            }
            match subscriber.sender.try_send(Frame::new(MessageType::ProofUpdate, update)) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = id, commitment = %short_hex(&commitment), "send buffer full, dropping proof update");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = id, "connection closing, proof update discarded");
                }
            }
        }
        for (id, len) in oversize {
            if let Some(evict) = inner.subscribers.remove(&id).and_then(|subscriber| subscriber.evict) {
                let _ = evict.send(ProcessorError::ReplyTooLarge { kind: MessageType::ProofUpdate, len });
            }
        }
        queued
    }
}
