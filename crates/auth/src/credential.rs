use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Bearer token pair with an absolute expiry.
///
/// Two credentials are considered the same value iff their `access_token`
/// matches; the refresh token and expiry are carried along but do not
/// participate in change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    /// Opaque refresh capability.
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Returns `true` if the access token expires within `skew` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at <= now + skew
    }
}
