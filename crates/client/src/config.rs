//! Configuration

use serde::{Deserialize, Serialize};
use std::{env, time::Duration};

/// Client deadlines
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Wait for the reply to a request
    pub ack_timeout: Duration,
    /// Wait for a proof or a pushed proof update
    pub proof_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { ack_timeout: Duration::from_secs(10), proof_timeout: Duration::from_secs(60) }
    }
}

impl ClientConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let ack_secs = env::var("BVERIFY_ACK_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let proof_secs = env::var("BVERIFY_PROOF_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        Self { ack_timeout: Duration::from_secs(ack_secs), proof_timeout: Duration::from_secs(proof_secs) }
    }
}
