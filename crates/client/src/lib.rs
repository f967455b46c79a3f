//! Client for the b_verify log server.
//!
//! [`Client`] opens and appends to logs, fetches proofs for them and keeps a
//! proof in step with the updates the server pushes after each commit.

mod client;
pub mod config;
mod error;

pub use client::{Client, VerifiedUpdate};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
