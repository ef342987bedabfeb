//! Credential handling for the remote storage API.
//!
//! A [`Credential`] is a bearer token pair with an absolute expiry. The
//! [`TokenSource`] trait abstracts the refresh-capable provider;
//! [`RefreshGuard`] wraps a source, detects silent refreshes by comparing
//! access tokens, and pushes replacements through a persistence callback so
//! the on-disk copy never lags the in-memory one for longer than one call.

mod credential;
mod guard;
mod source;
mod store;

pub use credential::Credential;
pub use guard::{PersistFn, RefreshGuard};
pub use source::{HttpTokenSource, TokenSource};
pub use store::CredentialStore;

/// Errors from credential operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token refresh rejected (HTTP {status}): {message}")]
    RefreshRejected { status: u16, message: String },

    #[error("no stored credential; run the authorization flow first")]
    NoCredential,
}
