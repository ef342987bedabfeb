//! Refresh-capable credential sources.

use std::future::Future;
use std::pin::Pin;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{AuthError, Credential};

/// Refresh the access token this long before it actually expires.
const EXPIRY_SKEW_SECS: i64 = 300;

/// A provider of the current credential.
///
/// Implementations may perform a network round trip when the cached
/// credential is near expiry. Object-safe so callers can hold a
/// `dyn TokenSource` and tests can substitute a fake.
pub trait TokenSource: Send + Sync {
    fn credential(&self) -> Pin<Box<dyn Future<Output = Result<Credential, AuthError>> + Send + '_>>;
}

/// Token endpoint response for a refresh grant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Rotated refresh token; absent means the old one stays valid.
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Token source backed by an OAuth-style token endpoint.
///
/// Holds the current credential behind an async mutex so concurrent callers
/// never race two refresh requests for the same expiring token.
pub struct HttpTokenSource {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    current: tokio::sync::Mutex<Credential>,
}

impl HttpTokenSource {
    /// Creates a source seeded with a previously stored credential.
    pub fn new(token_endpoint: String, client_id: String, initial: Credential) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_endpoint,
            client_id,
            current: tokio::sync::Mutex::new(initial),
        }
    }

    async fn obtain(&self) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;

        if !current.expires_within(Utc::now(), Duration::seconds(EXPIRY_SKEW_SECS)) {
            return Ok(current.clone());
        }

        debug!("access token near expiry, refreshing");
        let resp = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = resp.json().await?;
        let refreshed = Credential {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| current.refresh_token.clone()),
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        };

        info!(expires_at = %refreshed.expires_at, "access token refreshed");
        *current = refreshed.clone();
        Ok(refreshed)
    }
}

impl TokenSource for HttpTokenSource {
    fn credential(&self) -> Pin<Box<dyn Future<Output = Result<Credential, AuthError>> + Send + '_>> {
        Box::pin(self.obtain())
    }
}
