//! Durable credential storage.

use std::path::PathBuf;

use tracing::debug;

use crate::{AuthError, Credential};

/// File-backed credential store.
///
/// The credential is a secret, so the file is written with mode 0600 on
/// Unix. Writes go through a temp file + rename so a crash never leaves a
/// truncated credential behind.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the stored credential.
    ///
    /// A missing file is [`AuthError::NoCredential`]; the caller is expected
    /// to direct the user through the authorization flow.
    pub fn load(&self) -> Result<Credential, AuthError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::NoCredential);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    /// Durably replaces the stored credential.
    pub fn save(&self, cred: &Credential) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(cred)?;
        std::fs::write(&tmp, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "credential persisted");
        Ok(())
    }
}
