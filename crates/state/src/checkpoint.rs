use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resumable state of one chunked upload.
///
/// `bytes_completed` is the offset of the next byte to send. It is only ever
/// advanced to counts the server has acknowledged, never speculatively; on
/// resume the server's accepted-byte watermark overrides it if they disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Local source path.
    pub local_path: String,
    /// Intended remote destination path.
    pub remote_path: String,
    /// Opaque session URL issued by the server.
    pub session_url: String,
    /// Instant after which `session_url` is invalid.
    pub session_expiry: DateTime<Utc>,
    /// Offset of the next byte to send.
    pub bytes_completed: u64,
}

impl Checkpoint {
    /// Returns `true` if the session this checkpoint refers to has expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.session_expiry <= now
    }
}
