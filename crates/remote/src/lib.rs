//! Remote storage service contract and HTTP implementation.
//!
//! [`RemoteService`] is the seam between long-running-operation logic and
//! the wire: the upload engine and job poller only ever see this trait, so
//! tests substitute mocks and the binary plugs in [`HttpRemote`].

mod http;
mod service;

pub use http::HttpRemote;
pub use service::{ChunkOutcome, RemoteService, SessionStatus};

/// Errors from remote service calls.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("upload session no longer exists on the server")]
    SessionGone,

    #[error("credential error: {0}")]
    Auth(#[from] nimbus_auth::AuthError),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}
