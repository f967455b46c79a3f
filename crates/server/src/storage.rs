//! On-disk snapshot of server state.
//!
//! Written after every commit as JSON with hex-encoded bytes. The file is
//! written next to its final name and renamed into place, so a crash
//! leaves either the old snapshot or the new one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bverify_mpt::FullMpt;
use bverify_primitives::{Hash, PublicKey};
use bverify_wire::Commitment;
use serde::{Deserialize, Serialize};

const SNAPSHOT_FILE: &str = "server-state.json";

/// Registered log as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Hex log id
    pub log_id: String,
    /// Hex compressed controlling key
    pub owner: String,
    /// Next statement index the log accepts
    pub next_index: u64,
}

/// Everything needed to resume after a restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Hex-encoded committed trie
    pub tree: String,
    /// Registered logs
    pub logs: Vec<LogRecord>,
    /// Hex-encoded commitment records, oldest first
    pub history: Vec<String>,
}

/// Decoded form of a [`Snapshot`]
#[derive(Debug)]
pub struct RestoredState {
    /// Committed dictionary
    pub tree: FullMpt,
    /// Log id, owner key and next statement index
    pub logs: Vec<(Hash, PublicKey, u64)>,
    /// Commitments, oldest first
    pub history: Vec<Commitment>,
}

impl Snapshot {
    /// Encode a committed trie and its logs. History is filled in by
    /// [`Self::set_history`].
    pub fn new<'a>(tree: &FullMpt, logs: impl IntoIterator<Item = (&'a Hash, &'a PublicKey, u64)>) -> Self {
        Self {
            tree: hex::encode(tree.to_bytes()),
            logs: logs
                .into_iter()
                .map(|(log_id, owner, next_index)| LogRecord {
                    log_id: hex::encode(log_id),
                    owner: hex::encode(owner.as_bytes()),
                    next_index,
                })
                .collect(),
            history: Vec::new(),
        }
    }

    /// Replace the stored commitment records
    pub fn set_history(&mut self, history: &[Commitment]) {
        self.history = history.iter().map(|record| hex::encode(record.to_bytes())).collect();
    }

    /// Decode and validate every field
    pub fn restore(&self) -> Result<RestoredState> {
        let tree_bytes = hex::decode(&self.tree).context("snapshot tree is not hex")?;
        let tree = FullMpt::from_bytes(&tree_bytes).context("snapshot tree does not decode")?;

        let logs = self
            .logs
            .iter()
            .map(|record| {
                let log_id: Hash = hex::decode(&record.log_id)
                    .ok()
                    .and_then(|bytes| bytes.try_into().ok())
                    .with_context(|| format!("bad log id {}", record.log_id))?;
                let owner = hex::decode(&record.owner)
                    .context("owner key is not hex")
                    .and_then(|bytes| PublicKey::from_bytes(&bytes).context("invalid owner key"))?;
                Ok((log_id, owner, record.next_index))
            })
            .collect::<Result<Vec<_>>>()?;

        let history = self
            .history
            .iter()
            .map(|entry| {
                let bytes = hex::decode(entry).context("commitment record is not hex")?;
                Commitment::from_bytes(&bytes).context("commitment record does not decode")
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RestoredState { tree, logs, history })
    }
}

/// Snapshot file inside a data directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store `snapshot.json` under `data_dir`
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self { path: data_dir.as_ref().join(SNAPSHOT_FILE) }
    }

    /// File the snapshot lives in
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, `None` if none was ever written
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("reading {}", self.path.display())),
        };
        let snapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    /// Replace the snapshot on disk
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp, raw).await.with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming {}", tmp.display()))?;
        Ok(())
    }
}
