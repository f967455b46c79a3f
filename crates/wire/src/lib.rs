//! Wire protocol between b_verify clients and the server
//!
//! - [`frame`]: `[type u8][len u16 BE][payload]` frames and message codes
//! - [`codec`]: tokio codec reading and writing frames on a byte stream
//! - [`log`]: signed CreateLog / AppendLog statements
//! - [`message`]: proof request and proof update payloads
//! - [`commitment`]: published commitment records and history

pub mod codec;
pub mod commitment;
mod error;
pub mod frame;
pub mod log;
pub mod message;

pub use codec::FrameCodec;
pub use commitment::{Commitment, CommitmentHistory, MerkleProof};
pub use error::{Result, WireError};
pub use frame::{Frame, MessageType, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use log::{CreateLog, LogStatement, SignedCreateLog, SignedLogStatement};
pub use message::{CommitmentRef, KeyList, ProofUpdate};
