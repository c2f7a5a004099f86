//! CLI configuration.
//!
//! Stored as JSON in `~/.config/cipherpart/config.json`. Every field has a
//! default so a partial or older file still loads.

use std::path::{Path, PathBuf};

use cipherpart_crypto::AccountKeys;
use cipherpart_queue::QueueSettings;
use cipherpart_transfer::{DownloadConfig, UploadConfig};
use serde::{Deserialize, Serialize};

const DEFAULT_NODE_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CliConfig {
    /// Storage node base URL.
    pub node_url: String,

    /// Hex-encoded 32-byte account seed. Empty until first run.
    pub account_seed: String,

    /// Concurrent part uploads.
    pub upload_concurrency: usize,

    /// Concurrent ranged fetches.
    pub download_concurrency: usize,

    /// Concurrent block decryptions.
    pub decrypt_concurrency: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        let upload = UploadConfig::default();
        let download = DownloadConfig::default();
        Self {
            node_url: DEFAULT_NODE_URL.into(),
            account_seed: String::new(),
            upload_concurrency: upload.network.concurrency,
            download_concurrency: download.network.concurrency,
            decrypt_concurrency: download.crypto.concurrency,
        }
    }
}

impl CliConfig {
    /// Loads the config from the default path.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads the config from `path`, falling back to defaults when the file
    /// is missing or unreadable as JSON.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        set_permissions_0600(path);
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Returns the account keys, generating a seed when none is stored.
    ///
    /// The second value is true when a new seed was generated and the
    /// config needs saving.
    pub fn account_keys(&mut self) -> anyhow::Result<(AccountKeys, bool)> {
        if self.account_seed.is_empty() {
            let keys = AccountKeys::generate();
            self.account_seed = keys.seed_hex();
            return Ok((keys, true));
        }
        let keys = AccountKeys::from_hex(&self.account_seed)?;
        Ok((keys, false))
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            network: QueueSettings::unbounded(self.upload_concurrency.max(1)),
            ..UploadConfig::default()
        }
    }

    pub fn download_config(&self) -> DownloadConfig {
        let fetches = self.download_concurrency.max(1);
        DownloadConfig {
            network: QueueSettings::new(fetches, fetches as u64),
            crypto: QueueSettings::unbounded(self.decrypt_concurrency.max(1)),
            ..DownloadConfig::default()
        }
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("cipherpart").join("config.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home).join(".config"))
    }
}
