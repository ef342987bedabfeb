//! The resumable upload engine.

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nimbus_protocol::RemoteItem;
use nimbus_remote::{ChunkOutcome, RemoteError, RemoteService, SessionStatus};
use nimbus_state::{Checkpoint, CheckpointStore, fingerprint};

use crate::{CHUNK_ALIGNMENT, ChunkReader, DEFAULT_CHUNK_SIZE, TransferError};

/// Progress events emitted while an upload runs.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Progress {
        bytes_completed: u64,
        total_size: u64,
    },
}

/// Terminal result of an upload invocation that did not error.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Every byte was accepted and the checkpoint removed.
    ///
    /// Zero-length uploads and sessions the server had already finished
    /// produce no item descriptor.
    Completed(Option<RemoteItem>),
    /// Cancellation was observed between chunks. The checkpoint is
    /// persisted; re-invoking with the same arguments resumes here.
    Interrupted { bytes_completed: u64 },
}

/// Outcome of session establishment.
enum Established {
    Open {
        url: String,
        expiry: DateTime<Utc>,
        start_offset: u64,
    },
    /// The server reports the prior session already accepted every byte.
    AlreadyComplete,
}

/// Uploads a file in aligned chunks, resumable across process restarts.
///
/// One chunk is in flight at a time, in strictly increasing offset order.
/// The checkpoint is only ever advanced to byte counts the server has
/// acknowledged; on resume the server's watermark wins over local state.
pub struct UploadEngine<'a> {
    remote: &'a dyn RemoteService,
    store: &'a CheckpointStore,
    chunk_size: u64,
    cancel: CancellationToken,
}

impl<'a> UploadEngine<'a> {
    /// Creates an engine with the default chunk size.
    pub fn new(
        remote: &'a dyn RemoteService,
        store: &'a CheckpointStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel,
        }
    }

    /// Sets the chunk size, which must be a positive multiple of the
    /// 320 KiB alignment unit.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 || !chunk_size.is_multiple_of(CHUNK_ALIGNMENT) {
            return Err(TransferError::MisalignedChunkSize(chunk_size));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Uploads `local_path` to `remote_path`.
    ///
    /// If a usable checkpoint exists for the pair, the existing session is
    /// resumed and no second session is opened. A session that expired
    /// mid-transfer is restarted once with the checkpoint discarded; every
    /// other failure surfaces to the caller with the checkpoint preserved.
    pub async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadOutcome, TransferError> {
        let local = local_path.display().to_string();
        let fp = fingerprint(&local, remote_path);

        let mut force_fresh = false;
        loop {
            match self
                .run_once(local_path, remote_path, &fp, force_fresh, events_tx)
                .await
            {
                Err(TransferError::SessionExpired) if !force_fresh => {
                    warn!(remote_path, "upload session expired mid-transfer, restarting fresh");
                    force_fresh = true;
                }
                other => return other,
            }
        }
    }

    async fn run_once(
        &self,
        local_path: &Path,
        remote_path: &str,
        fp: &str,
        force_fresh: bool,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadOutcome, TransferError> {
        // Open the source before touching any state: a file that cannot be
        // read must not leave a checkpoint behind.
        let path_buf = local_path.to_path_buf();
        let mut reader = tokio::task::spawn_blocking(move || ChunkReader::open(&path_buf))
            .await
            .map_err(join_err)?
            .map_err(|e| TransferError::SourceUnreadable {
                path: local_path.display().to_string(),
                source: e,
            })?;
        let total_size = reader.total_size();

        let (session_url, mut session_expiry, mut bytes_completed) = match self
            .establish(local_path, remote_path, fp, force_fresh)
            .await?
        {
            Established::Open {
                url,
                expiry,
                start_offset,
            } => (url, expiry, start_offset.min(total_size)),
            Established::AlreadyComplete => {
                self.cleanup(fp);
                return Ok(UploadOutcome::Completed(None));
            }
        };

        if bytes_completed > 0 {
            info!(remote_path, offset = bytes_completed, "resuming upload");
        }
        self.emit(events_tx, bytes_completed, total_size).await;

        let mut final_item = None;
        while bytes_completed < total_size {
            // Cancellation is advisory: honored between chunks only, so an
            // in-flight request always completes or fails first.
            if self.cancel.is_cancelled() {
                info!(remote_path, bytes_completed, "upload interrupted");
                self.persist(local_path, remote_path, &session_url, session_expiry, bytes_completed);
                return Ok(UploadOutcome::Interrupted { bytes_completed });
            }

            let chunk_end = (bytes_completed + self.chunk_size - 1).min(total_size - 1);
            let len = (chunk_end - bytes_completed + 1) as usize;

            let offset = bytes_completed;
            let (returned, read) = tokio::task::spawn_blocking(move || {
                let read = reader.read_range(offset, len);
                (reader, read)
            })
            .await
            .map_err(join_err)?;
            reader = returned;
            let data = match read {
                Ok(data) => data,
                Err(e) => {
                    self.persist(local_path, remote_path, &session_url, session_expiry, bytes_completed);
                    return Err(e.into());
                }
            };

            match self
                .remote
                .send_chunk(&session_url, bytes_completed, chunk_end, total_size, data)
                .await
            {
                Ok(ChunkOutcome::Accepted { renewed }) => {
                    bytes_completed = chunk_end + 1;
                    if let Some(renewed) = renewed {
                        if let Some(expiry) = renewed.expiration_date_time {
                            session_expiry = expiry;
                        }
                        // The server's expected-range start is authoritative,
                        // but never past the end of the file.
                        if let Some(next) = renewed.next_offset() {
                            bytes_completed = next.min(total_size);
                        }
                    }
                    self.persist(local_path, remote_path, &session_url, session_expiry, bytes_completed);
                    self.emit(events_tx, bytes_completed, total_size).await;
                }
                Ok(ChunkOutcome::Completed(item)) => {
                    bytes_completed = total_size;
                    final_item = Some(item);
                    self.emit(events_tx, bytes_completed, total_size).await;
                }
                Err(RemoteError::SessionGone) => {
                    return Err(TransferError::SessionExpired);
                }
                Err(e) => {
                    self.persist(local_path, remote_path, &session_url, session_expiry, bytes_completed);
                    return Err(TransferError::ChunkRejected {
                        offset: bytes_completed,
                        source: e,
                    });
                }
            }
        }

        self.cleanup(fp);
        Ok(UploadOutcome::Completed(final_item))
    }

    /// Resolves the session to upload into: a resumed one when a usable
    /// checkpoint exists, otherwise a freshly opened one whose checkpoint is
    /// persisted before the first byte is sent.
    async fn establish(
        &self,
        local_path: &Path,
        remote_path: &str,
        fp: &str,
        force_fresh: bool,
    ) -> Result<Established, TransferError> {
        if let Some(cp) = self.store.load(fp) {
            if force_fresh || cp.is_expired(Utc::now()) {
                debug!(remote_path, "discarding stale checkpoint");
                self.abandon_session(&cp.session_url).await;
                self.store.delete(fp)?;
            } else {
                match self.remote.upload_session_status(&cp.session_url).await {
                    Ok(SessionStatus::Active {
                        next_offset,
                        expiry,
                    }) => {
                        if next_offset != cp.bytes_completed {
                            info!(
                                checkpoint = cp.bytes_completed,
                                server = next_offset,
                                "server watermark differs from checkpoint, trusting server"
                            );
                        }
                        return Ok(Established::Open {
                            url: cp.session_url,
                            expiry: expiry.unwrap_or(cp.session_expiry),
                            start_offset: next_offset,
                        });
                    }
                    Ok(SessionStatus::Complete) => {
                        return Ok(Established::AlreadyComplete);
                    }
                    Err(RemoteError::SessionGone) => {
                        debug!(remote_path, "session gone on server, starting fresh");
                        self.store.delete(fp)?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let session = self.remote.open_upload_session(remote_path).await?;
        let cp = Checkpoint {
            local_path: local_path.display().to_string(),
            remote_path: remote_path.to_string(),
            session_url: session.upload_url.clone(),
            session_expiry: session.expiration_date_time,
            bytes_completed: 0,
        };
        // Persisted before the first chunk so even a crash on byte one is
        // resumable. This save failing is fatal: without it, the opened
        // session would be unreachable after a restart.
        self.store.save(&cp)?;

        Ok(Established::Open {
            url: session.upload_url,
            expiry: session.expiration_date_time,
            start_offset: 0,
        })
    }

    /// Saves the checkpoint at the given offset. The server watermark is
    /// authoritative on resume, so a failed save degrades resume accuracy
    /// but never correctness; it is logged, not surfaced.
    fn persist(
        &self,
        local_path: &Path,
        remote_path: &str,
        session_url: &str,
        session_expiry: DateTime<Utc>,
        bytes_completed: u64,
    ) {
        let cp = Checkpoint {
            local_path: local_path.display().to_string(),
            remote_path: remote_path.to_string(),
            session_url: session_url.to_string(),
            session_expiry,
            bytes_completed,
        };
        if let Err(e) = self.store.save(&cp) {
            warn!(error = %e, bytes_completed, "failed to save checkpoint");
        }
    }

    /// Deletes the checkpoint after a completed upload. A failed delete
    /// never turns a successful upload into a failure.
    fn cleanup(&self, fp: &str) {
        if let Err(e) = self.store.delete(fp) {
            warn!(error = %e, "failed to delete checkpoint after completed upload");
        }
    }

    /// Best-effort server-side cancel of an abandoned session.
    async fn abandon_session(&self, session_url: &str) {
        if let Err(e) = self.remote.cancel_upload_session(session_url).await {
            debug!(error = %e, "failed to cancel abandoned session");
        }
    }

    async fn emit(&self, events_tx: &mpsc::Sender<UploadEvent>, bytes_completed: u64, total_size: u64) {
        let _ = events_tx
            .send(UploadEvent::Progress {
                bytes_completed,
                total_size,
            })
            .await;
    }
}

fn join_err(e: tokio::task::JoinError) -> TransferError {
    TransferError::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::Mutex;
    use chrono::Duration;
    use tempfile::TempDir;
    use nimbus_protocol::{JobStatus, UploadSession, UploadSessionStatus};

    const ALIGN: u64 = CHUNK_ALIGNMENT;

    #[derive(Default)]
    struct MockState {
        sessions_opened: usize,
        status_queries: usize,
        cancelled_sessions: Vec<String>,
        /// (start, end, data length) per received chunk.
        chunks: Vec<(u64, u64, usize)>,
        /// Offsets at which send_chunk fails once with an HTTP 500.
        reject_once_at: HashSet<u64>,
        /// Offset at which send_chunk reports the session gone, once.
        gone_once_at: Option<u64>,
        /// Accept the chunk at the offset with a renewed session status
        /// whose next expected range starts at the given offset.
        renew_next_at: Option<(u64, u64)>,
        /// Answer for status queries; None means the session is gone.
        watermark: Option<u64>,
        /// Status queries report the session fully accepted.
        status_complete: bool,
        /// Cancel this token right after accepting the chunk at the offset.
        cancel_after: Option<(u64, CancellationToken)>,
    }

    struct MockRemote {
        state: Mutex<MockState>,
    }

    impl MockRemote {
        fn new(state: MockState) -> Self {
            Self {
                state: Mutex::new(state),
            }
        }

        fn chunks(&self) -> Vec<(u64, u64, usize)> {
            self.state.lock().unwrap().chunks.clone()
        }

        fn sessions_opened(&self) -> usize {
            self.state.lock().unwrap().sessions_opened
        }
    }

    impl RemoteService for MockRemote {
        fn open_upload_session<'a>(
            &'a self,
            _remote_path: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<UploadSession, RemoteError>> + Send + 'a>> {
            Box::pin(async {
                let mut s = self.state.lock().unwrap();
                s.sessions_opened += 1;
                let n = s.sessions_opened;
                Ok(UploadSession {
                    upload_url: format!("https://storage.test/sessions/s{n}"),
                    expiration_date_time: Utc::now() + Duration::hours(1),
                    next_expected_ranges: vec!["0-".into()],
                })
            })
        }

        fn send_chunk<'a>(
            &'a self,
            _session_url: &'a str,
            start: u64,
            end: u64,
            total_size: u64,
            data: Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<ChunkOutcome, RemoteError>> + Send + 'a>> {
            Box::pin(async move {
                let mut s = self.state.lock().unwrap();
                if s.reject_once_at.remove(&start) {
                    return Err(RemoteError::Http {
                        status: 500,
                        message: "storage backend unavailable".into(),
                    });
                }
                if s.gone_once_at == Some(start) {
                    s.gone_once_at = None;
                    return Err(RemoteError::SessionGone);
                }

                s.chunks.push((start, end, data.len()));
                if let Some((offset, token)) = &s.cancel_after
                    && *offset == start
                {
                    token.cancel();
                }

                if let Some((offset, next)) = s.renew_next_at
                    && offset == start
                {
                    return Ok(ChunkOutcome::Accepted {
                        renewed: Some(UploadSessionStatus {
                            expiration_date_time: None,
                            next_expected_ranges: vec![format!("{next}-")],
                        }),
                    });
                }

                if end + 1 == total_size {
                    Ok(ChunkOutcome::Completed(RemoteItem {
                        id: "item-1".into(),
                        name: "uploaded.bin".into(),
                        size: total_size,
                        e_tag: String::new(),
                    }))
                } else {
                    Ok(ChunkOutcome::Accepted { renewed: None })
                }
            })
        }

        fn upload_session_status<'a>(
            &'a self,
            _session_url: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<SessionStatus, RemoteError>> + Send + 'a>> {
            Box::pin(async {
                let mut s = self.state.lock().unwrap();
                s.status_queries += 1;
                if s.status_complete {
                    return Ok(SessionStatus::Complete);
                }
                match s.watermark {
                    Some(next_offset) => Ok(SessionStatus::Active {
                        next_offset,
                        expiry: None,
                    }),
                    None => Err(RemoteError::SessionGone),
                }
            })
        }

        fn cancel_upload_session<'a>(
            &'a self,
            session_url: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), RemoteError>> + Send + 'a>> {
            Box::pin(async move {
                self.state
                    .lock()
                    .unwrap()
                    .cancelled_sessions
                    .push(session_url.to_string());
                Ok(())
            })
        }

        fn query_job<'a>(
            &'a self,
            _job_url: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<JobStatus, RemoteError>> + Send + 'a>> {
            unimplemented!("not used by the upload engine")
        }
    }

    fn create_file(dir: &std::path::Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![7u8; size]).unwrap();
        path
    }

    fn events() -> (mpsc::Sender<UploadEvent>, mpsc::Receiver<UploadEvent>) {
        mpsc::channel(1024)
    }

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path().join("state")).unwrap()
    }

    #[tokio::test]
    async fn upload_completes_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", (2 * ALIGN + 100) as usize);
        let store = store(&dir);
        let remote = MockRemote::new(MockState::default());

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, mut rx) = events();
        let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();

        let UploadOutcome::Completed(Some(item)) = outcome else {
            panic!("expected completed outcome with item");
        };
        assert_eq!(item.id, "item-1");

        // Three chunks, strictly increasing, final one short.
        let chunks = remote.chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], (0, ALIGN - 1, ALIGN as usize));
        assert_eq!(chunks[1], (ALIGN, 2 * ALIGN - 1, ALIGN as usize));
        assert_eq!(chunks[2], (2 * ALIGN, 2 * ALIGN + 99, 100));

        // Checkpoint removed after success.
        let fp = fingerprint(&path.display().to_string(), "/remote/a.bin");
        assert!(store.load(&fp).is_none());

        // Progress reached the total.
        drop(tx);
        let mut last = 0;
        while let Some(UploadEvent::Progress {
            bytes_completed, ..
        }) = rx.recv().await
        {
            assert!(bytes_completed >= last, "progress must not regress");
            last = bytes_completed;
        }
        assert_eq!(last, 2 * ALIGN + 100);
    }

    #[tokio::test]
    async fn checkpoint_exists_before_first_chunk() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", ALIGN as usize);
        let store = store(&dir);

        // First chunk rejected: the only state ever written is the pre-send
        // checkpoint at offset 0.
        let mut state = MockState::default();
        state.reject_once_at.insert(0);
        let remote = MockRemote::new(state);

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, _rx) = events();
        let err = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap_err();
        assert!(matches!(err, TransferError::ChunkRejected { offset: 0, .. }));

        let fp = fingerprint(&path.display().to_string(), "/remote/a.bin");
        let cp = store.load(&fp).unwrap();
        assert_eq!(cp.bytes_completed, 0);
    }

    #[tokio::test]
    async fn failed_chunk_resumes_at_failure_offset() {
        // Spec example: 10,000,000 bytes, chunk 3,276,800; chunk 3 (offset
        // 6,553,600) fails; re-invocation resumes exactly there.
        const TOTAL: usize = 10_000_000;
        const CHUNK: u64 = 3_276_800;
        const FAIL_AT: u64 = 6_553_600;

        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "big.bin", TOTAL);
        let store = store(&dir);

        let mut state = MockState::default();
        state.reject_once_at.insert(FAIL_AT);
        state.watermark = Some(FAIL_AT);
        let remote = MockRemote::new(state);

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(CHUNK)
            .unwrap();
        let (tx, _rx) = events();

        let err = engine.upload(&path, "/remote/big.bin", &tx).await.unwrap_err();
        match err {
            TransferError::ChunkRejected { offset, .. } => assert_eq!(offset, FAIL_AT),
            other => panic!("unexpected error: {other}"),
        }

        let fp = fingerprint(&path.display().to_string(), "/remote/big.bin");
        assert_eq!(store.load(&fp).unwrap().bytes_completed, FAIL_AT);

        // Second invocation: resumes the session, never reopens.
        let outcome = engine.upload(&path, "/remote/big.bin", &tx).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Completed(Some(_))));
        assert_eq!(remote.sessions_opened(), 1);

        // No byte below the failure offset was re-sent.
        let chunks = remote.chunks();
        let resumed = &chunks[2..];
        assert_eq!(resumed[0].0, FAIL_AT);
        assert!(resumed.iter().all(|&(start, _, _)| start >= FAIL_AT));
        assert_eq!(resumed.last().unwrap().1, TOTAL as u64 - 1);
        assert!(store.load(&fp).is_none());
    }

    #[tokio::test]
    async fn server_watermark_overrides_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", (4 * ALIGN) as usize);
        let store = store(&dir);

        // Local checkpoint claims one chunk done; the server says three. A
        // prior attempt's chunk was accepted but the local save never landed.
        let cp = Checkpoint {
            local_path: path.display().to_string(),
            remote_path: "/remote/a.bin".into(),
            session_url: "https://storage.test/sessions/s1".into(),
            session_expiry: Utc::now() + Duration::hours(1),
            bytes_completed: ALIGN,
        };
        store.save(&cp).unwrap();

        let mut state = MockState::default();
        state.watermark = Some(3 * ALIGN);
        let remote = MockRemote::new(state);

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, _rx) = events();
        let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Completed(Some(_))));

        // Only the final chunk was sent; nothing reopened.
        assert_eq!(remote.sessions_opened(), 0);
        assert_eq!(remote.chunks(), vec![(3 * ALIGN, 4 * ALIGN - 1, ALIGN as usize)]);
    }

    #[tokio::test]
    async fn session_gone_on_resume_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", ALIGN as usize);
        let store = store(&dir);

        let cp = Checkpoint {
            local_path: path.display().to_string(),
            remote_path: "/remote/a.bin".into(),
            session_url: "https://storage.test/sessions/dead".into(),
            session_expiry: Utc::now() + Duration::hours(1),
            bytes_completed: 0,
        };
        store.save(&cp).unwrap();

        // watermark None: status query answers SessionGone.
        let remote = MockRemote::new(MockState::default());

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, _rx) = events();
        let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Completed(Some(_))));
        assert_eq!(remote.sessions_opened(), 1);
        assert_eq!(remote.chunks()[0].0, 0);
    }

    #[tokio::test]
    async fn session_gone_mid_transfer_restarts_once() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", (2 * ALIGN) as usize);
        let store = store(&dir);

        let mut state = MockState::default();
        state.gone_once_at = Some(ALIGN);
        let remote = MockRemote::new(state);

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, _rx) = events();
        let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Completed(Some(_))));

        // First session died after one chunk; a second was opened and the
        // whole file re-sent through it.
        assert_eq!(remote.sessions_opened(), 2);
        let chunks = remote.chunks();
        assert_eq!(chunks[0].0, 0);
        assert_eq!(chunks[1].0, 0);
        assert_eq!(chunks.last().unwrap().1, 2 * ALIGN - 1);
    }

    #[tokio::test]
    async fn expired_checkpoint_is_purged() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", ALIGN as usize);
        let store = store(&dir);

        let cp = Checkpoint {
            local_path: path.display().to_string(),
            remote_path: "/remote/a.bin".into(),
            session_url: "https://storage.test/sessions/expired".into(),
            session_expiry: Utc::now() - Duration::hours(1),
            bytes_completed: 42,
        };
        store.save(&cp).unwrap();

        let remote = MockRemote::new(MockState::default());
        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, _rx) = events();
        let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Completed(Some(_))));

        // Fresh session opened from offset 0, expired one cancelled remotely.
        assert_eq!(remote.sessions_opened(), 1);
        assert_eq!(remote.chunks()[0].0, 0);
        assert_eq!(
            remote.state.lock().unwrap().cancelled_sessions,
            vec!["https://storage.test/sessions/expired".to_string()]
        );
    }

    #[tokio::test]
    async fn resumed_session_already_complete() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", ALIGN as usize);
        let store = store(&dir);

        let cp = Checkpoint {
            local_path: path.display().to_string(),
            remote_path: "/remote/a.bin".into(),
            session_url: "https://storage.test/sessions/s1".into(),
            session_expiry: Utc::now() + Duration::hours(1),
            bytes_completed: ALIGN,
        };
        store.save(&cp).unwrap();

        let mut state = MockState::default();
        state.status_complete = true;
        let remote = MockRemote::new(state);

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, _rx) = events();
        let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();
        assert_eq!(outcome, UploadOutcome::Completed(None));

        // Nothing sent, checkpoint cleaned up.
        assert!(remote.chunks().is_empty());
        let fp = fingerprint(&path.display().to_string(), "/remote/a.bin");
        assert!(store.load(&fp).is_none());
    }

    #[tokio::test]
    async fn renewed_watermark_beyond_total_is_clamped() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", (2 * ALIGN) as usize);
        let store = store(&dir);

        // A malformed renewal claims the server expects bytes past the end
        // of the file. The adopted watermark must be clamped to the total,
        // never driving progress arithmetic past it.
        let mut state = MockState::default();
        state.renew_next_at = Some((0, 10 * ALIGN));
        let remote = MockRemote::new(state);

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, mut rx) = events();
        let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();
        assert_eq!(outcome, UploadOutcome::Completed(None));

        assert_eq!(remote.chunks().len(), 1);
        let fp = fingerprint(&path.display().to_string(), "/remote/a.bin");
        assert!(store.load(&fp).is_none());

        drop(tx);
        while let Some(UploadEvent::Progress {
            bytes_completed,
            total_size,
        }) = rx.recv().await
        {
            assert!(bytes_completed <= total_size);
        }
    }

    #[tokio::test]
    async fn zero_length_upload_terminates() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "empty.bin", 0);
        let store = store(&dir);
        let remote = MockRemote::new(MockState::default());

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, _rx) = events();
        let outcome = engine.upload(&path, "/remote/empty.bin", &tx).await.unwrap();
        assert_eq!(outcome, UploadOutcome::Completed(None));

        // Session opened, zero chunks sent, checkpoint cleaned up.
        assert_eq!(remote.sessions_opened(), 1);
        assert!(remote.chunks().is_empty());
        let fp = fingerprint(&path.display().to_string(), "/remote/empty.bin");
        assert!(store.load(&fp).is_none());
    }

    #[tokio::test]
    async fn cancellation_is_interrupted_not_error() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", (3 * ALIGN) as usize);
        let store = store(&dir);

        let cancel = CancellationToken::new();
        let mut state = MockState::default();
        state.cancel_after = Some((0, cancel.clone()));
        let remote = MockRemote::new(state);

        let engine = UploadEngine::new(&remote, &store, cancel)
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, _rx) = events();
        let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();

        // The in-flight chunk completed; cancellation honored at the next
        // loop boundary with the checkpoint persisted.
        assert_eq!(outcome, UploadOutcome::Interrupted { bytes_completed: ALIGN });
        assert_eq!(remote.chunks().len(), 1);

        let fp = fingerprint(&path.display().to_string(), "/remote/a.bin");
        assert_eq!(store.load(&fp).unwrap().bytes_completed, ALIGN);
    }

    #[tokio::test]
    async fn interrupted_upload_resumes_from_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = create_file(dir.path(), "a.bin", (3 * ALIGN) as usize);
        let store = store(&dir);

        let cancel = CancellationToken::new();
        let mut state = MockState::default();
        state.cancel_after = Some((0, cancel.clone()));
        state.watermark = Some(ALIGN);
        let remote = MockRemote::new(state);

        {
            let engine = UploadEngine::new(&remote, &store, cancel)
                .with_chunk_size(ALIGN)
                .unwrap();
            let (tx, _rx) = events();
            let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();
            assert!(matches!(outcome, UploadOutcome::Interrupted { .. }));
        }

        // Fresh invocation, fresh token: picks up at the watermark.
        let engine = UploadEngine::new(&remote, &store, CancellationToken::new())
            .with_chunk_size(ALIGN)
            .unwrap();
        let (tx, _rx) = events();
        let outcome = engine.upload(&path, "/remote/a.bin", &tx).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Completed(Some(_))));

        assert_eq!(remote.sessions_opened(), 1);
        let chunks = remote.chunks();
        assert_eq!(chunks[1].0, ALIGN);
        assert!(chunks[1..].iter().all(|&(start, _, _)| start >= ALIGN));
    }

    #[tokio::test]
    async fn unreadable_source_writes_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let remote = MockRemote::new(MockState::default());

        let engine = UploadEngine::new(&remote, &store, CancellationToken::new());
        let (tx, _rx) = events();
        let missing = dir.path().join("missing.bin");
        let err = engine.upload(&missing, "/remote/missing.bin", &tx).await.unwrap_err();
        assert!(matches!(err, TransferError::SourceUnreadable { .. }));

        assert_eq!(remote.sessions_opened(), 0);
        let fp = fingerprint(&missing.display().to_string(), "/remote/missing.bin");
        assert!(store.load(&fp).is_none());
    }

    #[test]
    fn misaligned_chunk_size_rejected() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let remote = MockRemote::new(MockState::default());

        for bad in [0u64, 1, ALIGN - 1, ALIGN + 1, ALIGN * 2 + 5] {
            let result = UploadEngine::new(&remote, &store, CancellationToken::new())
                .with_chunk_size(bad);
            assert!(matches!(
                result,
                Err(TransferError::MisalignedChunkSize(b)) if b == bad
            ));
        }

        assert!(
            UploadEngine::new(&remote, &store, CancellationToken::new())
                .with_chunk_size(ALIGN * 3)
                .is_ok()
        );
    }
}
