//! Chunked resumable uploads.
//!
//! The engine sends a file to the remote storage service in aligned chunks,
//! checkpointing progress through [`nimbus_state::CheckpointStore`] so an
//! interrupted upload resumes near the interruption point instead of
//! restarting, and never re-sends bytes the server has already accepted.

mod chunked;
mod engine;

pub use chunked::ChunkReader;
pub use engine::{UploadEngine, UploadEvent, UploadOutcome};

pub use nimbus_protocol::{CHUNK_ALIGNMENT, DEFAULT_CHUNK_SIZE};

use nimbus_remote::RemoteError;

/// Errors produced by the upload engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The local source cannot be opened. Fatal; no checkpoint is written.
    #[error("cannot read source {path}: {source}")]
    SourceUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size {0} is not a positive multiple of {CHUNK_ALIGNMENT} bytes")]
    MisalignedChunkSize(u64),

    #[error("checkpoint storage error: {0}")]
    State(#[from] nimbus_state::StateError),

    /// A chunk was not accepted. The checkpoint is preserved; re-invoking
    /// the upload resumes from the reported offset.
    #[error("chunk rejected at offset {offset} ({offset} bytes durably completed): {source}")]
    ChunkRejected {
        offset: u64,
        #[source]
        source: RemoteError,
    },

    /// The upload session expired and a fresh one could not be established.
    #[error("upload session expired and could not be re-established")]
    SessionExpired,

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}
