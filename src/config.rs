//! ALFA Media Vault - Configuration
//!
//! JSON settings for the media store. Relative paths resolve against the
//! directory holding the config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_BLOCK_SIZE;
use crate::error::{VaultError, VaultResult};
use crate::thumbs::DEFAULT_THUMB_SIZE;

/// Default config file name
pub const CONFIG_FILE: &str = "alfa-media.json";

/// Media store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Base directory of local albums
    pub local_root: PathBuf,
    /// Local view of the remote container, if any
    pub remote_root: Option<PathBuf>,
    /// Directory holding full copies of remote files
    pub cloud_mirror: Option<PathBuf>,
    /// Decrypted scratch files
    pub scratch_dir: PathBuf,
    /// Secret store file
    pub keys_file: PathBuf,
    /// Plaintext bytes per container block
    pub block_size: usize,
    /// Thumbnail edge length
    pub thumb_size: u32,
    /// Give up waiting for a download after this many seconds (0 = wait forever)
    pub download_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("albums"),
            remote_root: None,
            cloud_mirror: None,
            scratch_dir: PathBuf::from("scratch"),
            keys_file: PathBuf::from("keys.json"),
            block_size: DEFAULT_BLOCK_SIZE,
            thumb_size: DEFAULT_THUMB_SIZE,
            download_timeout_secs: 300,
        }
    }
}

impl StoreConfig {
    /// Load `path`, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> VaultResult<Self> {
        let config: Self = if path.exists() {
            let data = std::fs::read(path)?;
            serde_json::from_slice(&data)
                .map_err(|e| VaultError::InvalidConfig(format!("{}: {}", path.display(), e)))?
        } else {
            info!("No config at {}, using defaults", path.display());
            Self::default()
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.resolved_against(base))
    }

    pub fn save(&self, path: &Path) -> VaultResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Rooted copy with relative paths joined onto `base`
    pub fn resolved_against(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        resolve(&mut self.local_root);
        resolve(&mut self.scratch_dir);
        resolve(&mut self.keys_file);
        if let Some(p) = self.remote_root.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.cloud_mirror.as_mut() {
            resolve(p);
        }
        self
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        match self.download_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
