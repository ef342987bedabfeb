//! Durable checkpoint storage for resumable transfers.
//!
//! One JSON record per (local, remote) pair, keyed by a SHA-256 fingerprint,
//! stored under a state directory. Writes are atomic (temp file + rename) so
//! a crash mid-write never leaves a half-written record behind.

mod checkpoint;
mod store;

pub use checkpoint::Checkpoint;
pub use store::{CheckpointStore, fingerprint};

/// Errors produced by checkpoint storage.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
