use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{Checkpoint, StateError};

/// Computes the stable fingerprint for a (local, remote) pair.
///
/// SHA-256 over both identifiers joined by a NUL byte, which cannot occur
/// inside a path, so `("ab", "c")` and `("a", "bc")` hash differently.
pub fn fingerprint(local_path: &str, remote_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(local_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(remote_path.as_bytes());
    hex::encode(hasher.finalize())
}

/// File-backed checkpoint store: one JSON record per fingerprint.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Creates a store rooted at `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Loads the checkpoint for a fingerprint.
    ///
    /// Returns `None` when no record exists or when the record is unreadable
    /// or corrupt; corruption is logged and treated as absence so a damaged
    /// state file never blocks a fresh upload.
    pub fn load(&self, fp: &str) -> Option<Checkpoint> {
        let path = self.record_path(fp);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkpoint unreadable, ignoring");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(cp) => Some(cp),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkpoint corrupt, ignoring");
                None
            }
        }
    }

    /// Durably writes the checkpoint for its fingerprint, overwriting any
    /// previous record.
    ///
    /// Atomic: the record is written to a temp file and renamed into place,
    /// so a crash mid-write leaves the previous record intact.
    pub fn save(&self, cp: &Checkpoint) -> Result<(), StateError> {
        let fp = fingerprint(&cp.local_path, &cp.remote_path);
        let path = self.record_path(&fp);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(cp)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;

        debug!(
            fingerprint = %fp,
            bytes_completed = cp.bytes_completed,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Removes the checkpoint for a fingerprint. Already-absent is success.
    pub fn delete(&self, fp: &str) -> Result<(), StateError> {
        let path = self.record_path(fp);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(fingerprint = %fp, "checkpoint deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn record_path(&self, fp: &str) -> PathBuf {
        self.dir.join(format!("{fp}.json"))
    }

    /// Returns the state directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
