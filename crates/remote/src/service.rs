//! The remote storage service contract.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use nimbus_protocol::{JobStatus, RemoteItem, UploadSession, UploadSessionStatus};

use crate::RemoteError;

/// Result of sending one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// The chunk was accepted; more bytes are expected.
    ///
    /// `renewed` carries refreshed session details (expiry, expected ranges)
    /// when the server chose to extend the session.
    Accepted { renewed: Option<UploadSessionStatus> },
    /// The final chunk was accepted and the item now exists remotely.
    Completed(RemoteItem),
}

/// Result of a session status query.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    /// The session is open; `next_offset` is the accepted-byte watermark.
    Active {
        next_offset: u64,
        expiry: Option<DateTime<Utc>>,
    },
    /// Every byte has been accepted.
    Complete,
}

/// Abstract connection to the remote storage service.
///
/// Object-safe with boxed-future methods so the engine and poller stay
/// decoupled from the transport and testable with mocks.
pub trait RemoteService: Send + Sync {
    /// Opens a resumable upload session for a remote destination.
    fn open_upload_session<'a>(
        &'a self,
        remote_path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadSession, RemoteError>> + Send + 'a>>;

    /// Sends one chunk covering bytes `[start, end]` of `total_size`.
    fn send_chunk<'a>(
        &'a self,
        session_url: &'a str,
        start: u64,
        end: u64,
        total_size: u64,
        data: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<ChunkOutcome, RemoteError>> + Send + 'a>>;

    /// Queries the accepted-byte watermark of an open session.
    fn upload_session_status<'a>(
        &'a self,
        session_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SessionStatus, RemoteError>> + Send + 'a>>;

    /// Abandons an open session. Best-effort; already-gone is success.
    fn cancel_upload_session<'a>(
        &'a self,
        session_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RemoteError>> + Send + 'a>>;

    /// Fetches the status snapshot of a server-side background job.
    fn query_job<'a>(
        &'a self,
        job_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<JobStatus, RemoteError>> + Send + 'a>>;
}
