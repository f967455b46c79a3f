//! Configuration

use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, time::Duration};

/// Server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP address to accept clients on
    pub listen_addr: String,
    /// Commit on a timer; when off, commits only happen through `Server::commit`
    pub auto_commit: bool,
    /// Seconds between timed commits
    pub commit_interval_secs: u64,
    /// Frames queued per connection before proof updates are dropped
    pub subscriber_buffer: usize,
    /// Seconds allowed for writing one frame to a client
    pub write_timeout_secs: u64,
    /// Attempts made to publish a commitment on chain
    pub publish_retries: u32,
    /// Directory holding the state snapshot; no persistence when unset
    pub data_dir: Option<PathBuf>,
    /// Blocks to search for unconfirmed commitments at startup
    pub rescan_blocks: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9100".to_string(),
            auto_commit: true,
            commit_interval_secs: 600,
            subscriber_buffer: 64,
            write_timeout_secs: 30,
            publish_retries: 5,
            data_dir: None,
            rescan_blocks: 0,
        }
    }
}

impl ServerConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: env::var("BVERIFY_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            auto_commit: env::var("BVERIFY_AUTO_COMMIT")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.auto_commit),
            commit_interval_secs: env::var("BVERIFY_COMMIT_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.commit_interval_secs),
            subscriber_buffer: env::var("BVERIFY_SUBSCRIBER_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.subscriber_buffer),
            write_timeout_secs: env::var("BVERIFY_WRITE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.write_timeout_secs),
            publish_retries: env::var("BVERIFY_PUBLISH_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.publish_retries),
            data_dir: env::var("BVERIFY_DATA_DIR").ok().map(PathBuf::from),
            rescan_blocks: defaults.rescan_blocks,
        }
    }

    /// Set the startup rescan depth (given on the command line)
    pub const fn with_rescan_blocks(mut self, rescan_blocks: u32) -> Self {
        self.rescan_blocks = rescan_blocks;
        self
    }

    /// Interval between timed commits
    pub const fn commit_interval(&self) -> Duration {
        Duration::from_secs(self.commit_interval_secs)
    }

    /// Per-frame write deadline
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:9100");
        assert!(config.auto_commit);
        assert_eq!(config.commit_interval(), Duration::from_secs(600));
        assert_eq!(config.subscriber_buffer, 64);
        assert_eq!(config.write_timeout(), Duration::from_secs(30));
        assert_eq!(config.publish_retries, 5);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_with_rescan_blocks() {
        let config = ServerConfig::default().with_rescan_blocks(12);
        assert_eq!(config.rescan_blocks, 12);
    }
}
