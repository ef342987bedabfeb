//! reqwest-backed [`RemoteService`] implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use nimbus_auth::RefreshGuard;
use nimbus_protocol::{JobStatus, RemoteItem, UploadSession, UploadSessionStatus};

use crate::service::{ChunkOutcome, RemoteService, SessionStatus};
use crate::RemoteError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenSessionRequest<'a> {
    remote_path: &'a str,
}

/// HTTP client for the storage service.
///
/// Every request obtains its bearer token through the [`RefreshGuard`], so
/// silent token refreshes are detected and persisted on whichever request
/// happens to observe them first.
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
    guard: Arc<RefreshGuard>,
}

impl HttpRemote {
    pub fn new(base_url: String, guard: Arc<RefreshGuard>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            guard,
        }
    }

    async fn bearer(&self) -> Result<String, RemoteError> {
        let cred = self.guard.current().await?;
        Ok(cred.access_token)
    }

    /// Maps a non-success response to an error, reading the body for detail.
    async fn http_error(resp: reqwest::Response) -> RemoteError {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        RemoteError::Http { status, message }
    }

    async fn open_session(&self, remote_path: &str) -> Result<UploadSession, RemoteError> {
        let token = self.bearer().await?;
        let url = format!("{}/upload-sessions", self.base_url);
        debug!(remote_path, "opening upload session");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&OpenSessionRequest { remote_path })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::http_error(resp).await);
        }
        Ok(resp.json::<UploadSession>().await?)
    }

    async fn put_chunk(
        &self,
        session_url: &str,
        start: u64,
        end: u64,
        total_size: u64,
        data: Vec<u8>,
    ) -> Result<ChunkOutcome, RemoteError> {
        let token = self.bearer().await?;
        trace!(start, end, total_size, "sending chunk");

        let resp = self
            .http
            .put(session_url)
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{total_size}"),
            )
            .body(data)
            .send()
            .await?;

        match resp.status().as_u16() {
            // Chunk accepted, session still open.
            202 => {
                let renewed = resp.json::<UploadSessionStatus>().await.ok();
                Ok(ChunkOutcome::Accepted { renewed })
            }
            // Final chunk accepted, item created or replaced.
            200 | 201 => {
                let item = resp.json::<RemoteItem>().await?;
                Ok(ChunkOutcome::Completed(item))
            }
            404 => Err(RemoteError::SessionGone),
            _ => Err(Self::http_error(resp).await),
        }
    }

    async fn session_status(&self, session_url: &str) -> Result<SessionStatus, RemoteError> {
        let token = self.bearer().await?;

        let resp = self.http.get(session_url).bearer_auth(token).send().await?;
        match resp.status().as_u16() {
            200 => {
                let status = resp.json::<UploadSessionStatus>().await?;
                Ok(match status.next_offset() {
                    Some(next_offset) => SessionStatus::Active {
                        next_offset,
                        expiry: status.expiration_date_time,
                    },
                    None => SessionStatus::Complete,
                })
            }
            404 => Err(RemoteError::SessionGone),
            _ => Err(Self::http_error(resp).await),
        }
    }

    async fn cancel_session(&self, session_url: &str) -> Result<(), RemoteError> {
        let token = self.bearer().await?;
        debug!(session_url, "cancelling upload session");

        let resp = self
            .http
            .delete(session_url)
            .bearer_auth(token)
            .send()
            .await?;
        // Already-gone counts as cancelled.
        if resp.status().is_success() || resp.status().as_u16() == 404 {
            Ok(())
        } else {
            Err(Self::http_error(resp).await)
        }
    }

    async fn job_status(&self, job_url: &str) -> Result<JobStatus, RemoteError> {
        let token = self.bearer().await?;

        let resp = self.http.get(job_url).bearer_auth(token).send().await?;
        if !resp.status().is_success() {
            return Err(Self::http_error(resp).await);
        }
        Ok(resp.json::<JobStatus>().await?)
    }
}

impl RemoteService for HttpRemote {
    fn open_upload_session<'a>(
        &'a self,
        remote_path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadSession, RemoteError>> + Send + 'a>> {
        Box::pin(self.open_session(remote_path))
    }

    fn send_chunk<'a>(
        &'a self,
        session_url: &'a str,
        start: u64,
        end: u64,
        total_size: u64,
        data: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<ChunkOutcome, RemoteError>> + Send + 'a>> {
        Box::pin(self.put_chunk(session_url, start, end, total_size, data))
    }

    fn upload_session_status<'a>(
        &'a self,
        session_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SessionStatus, RemoteError>> + Send + 'a>> {
        Box::pin(self.session_status(session_url))
    }

    fn cancel_upload_session<'a>(
        &'a self,
        session_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RemoteError>> + Send + 'a>> {
        Box::pin(self.cancel_session(session_url))
    }

    fn query_job<'a>(
        &'a self,
        job_url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<JobStatus, RemoteError>> + Send + 'a>> {
        Box::pin(self.job_status(job_url))
    }
}
