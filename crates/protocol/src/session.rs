//! Upload session payloads.
//!
//! A session is an opaque URL plus an expiry; the server reports accepted
//! progress as a list of byte ranges it still expects, of which the first
//! entry's start is the authoritative accepted-byte watermark.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An open upload session issued by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// Opaque URL that identifies the session; chunks are sent to it.
    pub upload_url: String,
    /// Absolute instant after which the session is invalid.
    pub expiration_date_time: DateTime<Utc>,
    /// Byte ranges the server still expects, e.g. `["26214400-"]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_expected_ranges: Vec<String>,
}

impl UploadSession {
    /// Returns the offset of the next byte the server expects, if reported.
    pub fn next_offset(&self) -> Option<u64> {
        self.next_expected_ranges
            .first()
            .and_then(|r| parse_range_start(r))
    }
}

/// Status of an open session, as returned by a session status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionStatus {
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
    /// Empty once every byte has been accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_expected_ranges: Vec<String>,
}

impl UploadSessionStatus {
    /// Accepted-byte watermark: start of the first still-expected range.
    ///
    /// `None` means the server expects nothing more (upload complete).
    pub fn next_offset(&self) -> Option<u64> {
        self.next_expected_ranges
            .first()
            .and_then(|r| parse_range_start(r))
    }
}

/// Parses the leading offset out of a range expression like `"12345-"`
/// or `"12345-67890"`. Returns `None` for malformed input.
pub fn parse_range_start(range: &str) -> Option<u64> {
    let start = range.split('-').next()?;
    start.parse().ok()
}
