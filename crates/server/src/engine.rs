//! Commit engine.
//!
//! Owns the full trie and the per-log metadata. Mutations take the
//! dictionary write lock; proofs take the read lock. Commits are
//! serialized by a separate mutex and walk
//! `Idle -> Updating -> Committing -> Publishing -> Idle`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use bverify_mpt::{DeltaMpt, FullMpt, PartialMpt};
use bverify_primitives::{short_hex, Hash, Key, PublicKey};
use bverify_wire::{Commitment, SignedCreateLog, SignedLogStatement};
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::publisher::{ChainPublisher, Inclusion, Publication};
use crate::registry::SubscriberRegistry;
use crate::storage::{Snapshot, SnapshotStore};
use crate::{ProcessorError, Result};

/// Delay before the first publication retry; doubles on every attempt
const PUBLISH_RETRY_BASE: Duration = Duration::from_millis(500);

/// Where the engine is in its commit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    /// Nothing changed since the last commit
    Idle,
    /// Uncommitted changes are waiting
    Updating,
    /// Building the delta and resetting the trie
    Committing,
    /// Sending proof updates and handing the digest to the publisher
    Publishing,
}

#[derive(Debug, Clone, Copy)]
struct LogEntry {
    owner: PublicKey,
    next_index: u64,
}

#[derive(Debug, Default)]
struct Dictionary {
    tree: FullMpt,
    logs: HashMap<Hash, LogEntry>,
}

impl Dictionary {
    fn snapshot(&self) -> Snapshot {
        Snapshot::new(&self.tree, self.logs.iter().map(|(id, entry)| (id, &entry.owner, entry.next_index)))
    }
}

/// Result of the most recent commit
#[derive(Debug)]
struct LastCommit {
    commitment: Hash,
    delta: DeltaMpt,
}

/// Log dictionary, commit cycle and commitment history
#[derive(Debug)]
pub struct Engine {
    dictionary: RwLock<Dictionary>,
    /// Last committed digest; held for the whole commit
    commit_lock: Mutex<Option<Hash>>,
    last_commit: SyncRwLock<Option<Arc<LastCommit>>>,
    history: SyncRwLock<Vec<Commitment>>,
    phase: SyncMutex<CommitPhase>,
    registry: Arc<SubscriberRegistry>,
    publisher: Arc<dyn ChainPublisher>,
    publish_retries: u32,
    store: Option<SnapshotStore>,
    /// Committed trie and logs of the last commit, ready to write
    snapshot_base: SyncMutex<Option<Snapshot>>,
    persist_lock: Mutex<()>,
}

impl Engine {
    /// Build an engine, restoring the snapshot in `config.data_dir` if one
    /// exists and chasing commitments it left unconfirmed
    pub async fn open(config: &ServerConfig, publisher: Arc<dyn ChainPublisher>) -> AnyResult<Arc<Self>> {
        let store = config.data_dir.as_ref().map(SnapshotStore::new);
        let mut dictionary = Dictionary::default();
        let mut history = Vec::new();
        let mut last_commitment = None;
        let mut snapshot_base = None;

        if let Some(store) = &store {
            if let Some(snapshot) = store.load().await? {
                let restored = snapshot.restore()?;
                dictionary.tree = restored.tree;
                dictionary.logs = restored
                    .logs
                    .into_iter()
                    .map(|(log_id, owner, next_index)| (log_id, LogEntry { owner, next_index }))
                    .collect();
                history = restored.history;
                last_commitment = Some(dictionary.tree.commitment());
                info!(
                    path = %store.path().display(),
                    logs = dictionary.logs.len(),
                    commitments = history.len(),
                    "restored server state"
                );
                snapshot_base = Some(snapshot);
            }
        }

        let engine = Arc::new(Self {
            dictionary: RwLock::new(dictionary),
            commit_lock: Mutex::new(last_commitment),
            last_commit: SyncRwLock::new(None),
            history: SyncRwLock::new(history),
            phase: SyncMutex::new(CommitPhase::Idle),
            registry: Arc::new(SubscriberRegistry::new()),
            publisher,
            publish_retries: config.publish_retries.max(1),
            store,
            snapshot_base: SyncMutex::new(snapshot_base),
            persist_lock: Mutex::new(()),
        });
        engine.recover_pending(config.rescan_blocks).await;
        Ok(engine)
    }

    /// Connections receiving proof updates
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Where the commit cycle currently stands
    pub fn phase(&self) -> CommitPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: CommitPhase) {
        *self.phase.lock() = phase;
    }

    fn mark_updating(&self) {
        let mut phase = self.phase.lock();
        if *phase == CommitPhase::Idle {
            *phase = CommitPhase::Updating;
        }
    }

    /// Register a new log and store the witness of its creation.
    ///
    /// The creation occupies index 0, so the first append must use index 1.
    pub async fn register_log(&self, signed: &SignedCreateLog) -> Result<Hash> {
        signed.verify().map_err(ProcessorError::BadSignature)?;
        let log_id = signed.log_id();

        let mut dictionary = self.dictionary.write().await;
        if dictionary.logs.contains_key(&log_id) {
            return Err(ProcessorError::DuplicateLog(log_id));
        }
        dictionary.logs.insert(log_id, LogEntry { owner: signed.create.owner, next_index: 1 });
        dictionary.tree.insert(log_id, signed.witness());
        drop(dictionary);

        self.mark_updating();
        debug!(log = %short_hex(&log_id), "log created");
        Ok(log_id)
    }

    /// Verify and store the next statement of an existing log
    pub async fn append_statement(&self, signed: &SignedLogStatement) -> Result<Hash> {
        let log_id = signed.log_id();
        let owner = self
            .dictionary
            .read()
            .await
            .logs
            .get(&log_id)
            .map(|entry| entry.owner)
            .ok_or(ProcessorError::UnknownLog(log_id))?;
        signed.verify(&owner).map_err(ProcessorError::BadSignature)?;

        let mut dictionary = self.dictionary.write().await;
        let Dictionary { tree, logs } = &mut *dictionary;
        let entry = logs.get_mut(&log_id).ok_or(ProcessorError::UnknownLog(log_id))?;
        if signed.index() != entry.next_index {
            return Err(ProcessorError::BadIndex {
                log_id,
                expected: entry.next_index,
                got: signed.index(),
            });
        }
        entry.next_index += 1;
        tree.insert(log_id, signed.witness());
        drop(dictionary);

        self.mark_updating();
        debug!(log = %short_hex(&log_id), index = signed.index(), "statement appended");
        Ok(log_id)
    }

    /// Index the next statement of `log_id` must carry
    pub async fn next_index(&self, log_id: &Hash) -> Option<u64> {
        self.dictionary.read().await.logs.get(log_id).map(|entry| entry.next_index)
    }

    /// Digest of the current, possibly uncommitted, trie
    pub async fn current_commitment(&self) -> Hash {
        self.dictionary.read().await.tree.commitment()
    }

    /// Proof for `keys` against the current trie
    pub async fn proof(&self, keys: &[Key]) -> PartialMpt {
        PartialMpt::from_full(&self.dictionary.read().await.tree, keys)
    }

    /// Changes of the last commit along the paths of `keys`, with the
    /// digest they lead to
    pub fn delta_proof(&self, keys: &[Key]) -> Result<(Hash, DeltaMpt)> {
        let last = self.last_commit.read().clone().ok_or(ProcessorError::NoCommitment)?;
        Ok((last.commitment, last.delta.updates_for_keys(keys)))
    }

    /// Commit the current trie.
    ///
    /// Returns the new digest, or `None` when the root has not moved since
    /// the previous commit.
    pub async fn commit(self: &Arc<Self>) -> Option<Hash> {
        let mut last_commitment = self.commit_lock.lock().await;
        self.set_phase(CommitPhase::Committing);

        let height = self.publisher.block_height();
        let (commitment, delta) = {
            let mut dictionary = self.dictionary.write().await;
            let commitment = dictionary.tree.commitment();
            if *last_commitment == Some(commitment) {
                dictionary.tree.reset();
                drop(dictionary);
                self.set_phase(CommitPhase::Idle);
                debug!(commitment = %short_hex(&commitment), "no changes to commit");
                return None;
            }
            let delta = DeltaMpt::from_full(&dictionary.tree);
            dictionary.tree.reset();
            self.record_commitment(Commitment::pending(commitment, height));
            if self.store.is_some() {
                *self.snapshot_base.lock() = Some(dictionary.snapshot());
            }
            (commitment, delta)
        };
        *last_commitment = Some(commitment);

        self.set_phase(CommitPhase::Publishing);
        let last = Arc::new(LastCommit { commitment, delta });
        *self.last_commit.write() = Some(Arc::clone(&last));
        let queued = self.registry.broadcast(commitment, &last.delta);
        info!(commitment = %short_hex(&commitment), height, queued, "committed");

        self.persist().await;
        self.spawn_publication(commitment);

        let pending = self.dictionary.read().await.tree.has_changes();
        self.set_phase(if pending { CommitPhase::Updating } else { CommitPhase::Idle });
        drop(last_commitment);
        Some(commitment)
    }

    /// Append to the history. A digest the trie returns to is a new commit
    /// and gets its own entry; lookups by digest find the newest one.
    fn record_commitment(&self, record: Commitment) {
        self.history.write().push(record);
    }

    /// Details of `commitment`, or of the newest one when `None`
    pub fn commitment_details(&self, commitment: Option<Hash>) -> Result<Commitment> {
        let history = self.history.read();
        match commitment {
            None => history.last().cloned().ok_or(ProcessorError::NoCommitment),
            Some(wanted) => history
                .iter()
                .rev()
                .find(|record| record.commitment == wanted)
                .cloned()
                .ok_or(ProcessorError::UnknownCommitment(wanted)),
        }
    }

    /// Included commitments made after `since`, oldest first. An unknown or
    /// missing `since` returns the whole history.
    pub fn commitment_history(&self, since: Option<Hash>) -> Vec<Commitment> {
        let history = self.history.read();
        let start = since
            .and_then(|since| history.iter().rposition(|record| record.commitment == since))
            .map_or(0, |index| index + 1);
        history[start..].iter().filter(|record| record.is_included()).cloned().collect()
    }

    /// Mark `commitment` as included in a block. Returns false when the
    /// commitment is unknown.
    pub async fn record_inclusion(&self, commitment: Hash, inclusion: Inclusion) -> bool {
        let found = {
            let mut history = self.history.write();
            match history.iter_mut().rev().find(|record| record.commitment == commitment) {
                Some(record) => {
                    record.included_in_block = Some(inclusion.block_hash);
                    record.merkle_proof = inclusion.merkle_proof;
                    true
                }
                None => false,
            }
        };
        if found {
            info!(commitment = %short_hex(&commitment), block = %short_hex(&inclusion.block_hash), "commitment confirmed");
            self.persist().await;
        }
        found
    }

    async fn record_publication(&self, commitment: Hash, publication: Publication) {
        {
            let mut history = self.history.write();
            if let Some(record) = history.iter_mut().rev().find(|record| record.commitment == commitment) {
                record.tx_hash = Some(publication.tx_hash);
                record.raw_tx = publication.raw_tx;
                if let Some(inclusion) = publication.inclusion {
                    record.included_in_block = Some(inclusion.block_hash);
                    record.merkle_proof = inclusion.merkle_proof;
                }
            }
        }
        info!(commitment = %short_hex(&commitment), tx = %short_hex(&publication.tx_hash), "commitment published");
        self.persist().await;
    }

    fn spawn_publication(self: &Arc<Self>, commitment: Hash) {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.publish_with_retries(commitment).await });
    }

    async fn publish_with_retries(&self, commitment: Hash) {
        let mut delay = PUBLISH_RETRY_BASE;
        for attempt in 1..=self.publish_retries {
            match self.publisher.publish(commitment).await {
                Ok(publication) => {
                    self.record_publication(commitment, publication).await;
                    return;
                }
                Err(err) => {
                    warn!(commitment = %short_hex(&commitment), attempt, error = %err, "failed to publish commitment");
                    if attempt < self.publish_retries {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        error!(commitment = %short_hex(&commitment), attempts = self.publish_retries, "giving up on publishing commitment");
    }

    /// Chase restored commitments that never made it into a block
    async fn recover_pending(self: &Arc<Self>, rescan_blocks: u32) {
        let pending: Vec<(Hash, Option<Hash>)> = self
            .history
            .read()
            .iter()
            .filter(|record| !record.is_included())
            .map(|record| (record.commitment, record.tx_hash))
            .collect();

        for (commitment, tx_hash) in pending {
            match tx_hash {
                None => self.spawn_publication(commitment),
                Some(tx_hash) => match self.publisher.lookup(tx_hash, rescan_blocks).await {
                    Ok(Some(inclusion)) => {
                        self.record_inclusion(commitment, inclusion).await;
                    }
                    Ok(None) => {
                        debug!(commitment = %short_hex(&commitment), "commitment still unconfirmed");
                    }
                    Err(err) => {
                        warn!(commitment = %short_hex(&commitment), error = %err, "chain lookup failed");
                    }
                },
            }
        }
    }

    /// Write the last committed state and the current history
    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let Some(mut snapshot) = self.snapshot_base.lock().clone() else {
            return;
        };
        snapshot.set_history(&self.history.read());
        if let Err(err) = store.save(&snapshot).await {
            error!(path = %store.path().display(), error = ?err, "failed to write snapshot");
        }
    }
}
