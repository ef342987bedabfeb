//! Wire types for the remote storage API.
//!
//! Plain serde structs matching the JSON the service speaks: upload session
//! descriptors, accepted-range bookkeeping, remote item descriptors, and
//! async job status payloads. No I/O lives here.

pub mod jobs;
pub mod session;
pub mod types;

pub use jobs::{JobError, JobState, JobStatus};
pub use session::{UploadSession, UploadSessionStatus, parse_range_start};
pub use types::RemoteItem;

/// Chunk alignment unit required by the upload protocol.
///
/// Every non-final chunk must span a multiple of this many bytes.
pub const CHUNK_ALIGNMENT: u64 = 320 * 1024;

/// Default chunk size: 10 alignment units (3,276,800 bytes).
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * CHUNK_ALIGNMENT;
