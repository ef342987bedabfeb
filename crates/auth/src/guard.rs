//! Refresh detection and persistence.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::{AuthError, Credential, TokenSource};

/// Persistence callback invoked with each newly observed credential.
pub type PersistFn = Box<dyn Fn(&Credential) -> Result<(), AuthError> + Send + Sync>;

/// Wraps a [`TokenSource`] and persists refreshed credentials.
///
/// The underlying source may refresh the token on any call, outside this
/// module's control. The guard compares each obtained access token against
/// the last one it saw (under a lock, since concurrent requests all pass
/// through here) and fires the persistence callback exactly once per
/// observed change.
///
/// Persistence failure is logged and swallowed: the in-memory credential is
/// still valid for this process, and failing an in-flight request over a
/// durability problem would be a worse outcome. A failure of the source
/// itself is propagated, since then no usable credential exists.
pub struct RefreshGuard {
    source: Arc<dyn TokenSource>,
    last_seen: Mutex<Option<String>>,
    persist: PersistFn,
}

impl RefreshGuard {
    pub fn new(source: Arc<dyn TokenSource>, persist: PersistFn) -> Self {
        Self {
            source,
            last_seen: Mutex::new(None),
            persist,
        }
    }

    /// Returns the current credential, persisting it first if it changed.
    pub async fn current(&self) -> Result<Credential, AuthError> {
        let cred = self.source.credential().await?;

        let changed = {
            let mut last = self.last_seen.lock().unwrap();
            if last.as_deref() != Some(cred.access_token.as_str()) {
                *last = Some(cred.access_token.clone());
                true
            } else {
                false
            }
        };

        if changed {
            debug!("credential changed, persisting");
            if let Err(e) = (self.persist)(&cred) {
                warn!(error = %e, "failed to persist refreshed credential; continuing with in-memory value");
            }
        }

        Ok(cred)
    }
}
