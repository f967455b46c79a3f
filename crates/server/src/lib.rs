//! b_verify server.
//!
//! Clients register logs and append signed statements; the server keeps the
//! witness of each log's latest statement in a Merkle prefix trie, commits
//! the trie's root on a timer, pushes proof updates to subscribers and hands
//! every new root to a [`ChainPublisher`].

pub mod config;
pub mod engine;
mod error;
pub mod processor;
pub mod publisher;
pub mod registry;
pub mod server;
pub mod storage;

pub use config::ServerConfig;
pub use engine::{CommitPhase, Engine};
pub use error::{ProcessorError, Result};
pub use processor::LogProcessor;
pub use publisher::{ChainPublisher, Inclusion, LoopbackPublisher, Publication};
pub use registry::{ConnectionId, SubscriberRegistry};
pub use server::Server;
pub use storage::{Snapshot, SnapshotStore};
