//! Client configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/nimbus/config.toml`
//! - Windows: `%APPDATA%/nimbus/config.toml`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use nimbus_protocol::DEFAULT_CHUNK_SIZE;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the storage service API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// OAuth token endpoint used to refresh expiring credentials.
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,

    /// OAuth client identifier.
    #[serde(default)]
    pub client_id: String,

    /// Upload chunk size in bytes. Must be a multiple of 320 KiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Directory for transfer checkpoints. Empty means the default
    /// data directory.
    #[serde(default)]
    pub state_dir: String,
}

fn default_base_url() -> String {
    "https://storage.example.com/api/v1".into()
}

fn default_token_endpoint() -> String {
    "https://login.example.com/oauth2/token".into()
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_endpoint: default_token_endpoint(),
            client_id: String::new(),
            chunk_size: default_chunk_size(),
            state_dir: String::new(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Saves the current configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Directory holding transfer checkpoints.
    pub fn state_dir(&self) -> PathBuf {
        if self.state_dir.is_empty() {
            data_dir().join("checkpoints")
        } else {
            PathBuf::from(&self.state_dir)
        }
    }

    /// Path of the persisted credential file.
    pub fn credential_path(&self) -> PathBuf {
        data_dir().join("credential.json")
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    config_root().join("config.toml")
}

fn config_root() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("nimbus")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config").join("nimbus")
    }
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        config_root()
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("nimbus")
    }
}
