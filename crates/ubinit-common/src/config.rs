//! Boot configuration model.
//!
//! Every field has a default matching the stock image, so an empty JSON
//! document (or no document at all) yields a working configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants;
use crate::error::{InitError, Result};

/// Root configuration for the boot sequence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Where the authenticated root filesystem is mounted before the switch.
    pub new_root: PathBuf,
    /// Init binary to execute inside the new root.
    pub init: PathBuf,
    /// Special filesystems moved from the old root into the new one.
    pub live_mounts: Vec<PathBuf>,
    /// Authenticated root filesystem description.
    pub rootfs: RootfsConfig,
    /// Kernel keyring entry for the filesystem authentication key.
    pub key: KeyConfig,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            new_root: PathBuf::from(constants::DEFAULT_NEW_ROOT),
            init: PathBuf::from(constants::DEFAULT_INIT),
            live_mounts: constants::LIVE_MOUNTS.iter().map(PathBuf::from).collect(),
            rootfs: RootfsConfig::default(),
            key: KeyConfig::default(),
        }
    }
}

/// The filesystem that becomes `/` after the switch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RootfsConfig {
    /// Block/flash device or image path. Usually supplied on the command line.
    pub device: String,
    /// Filesystem type passed to `mount(2)`.
    pub fstype: String,
    /// Mount read-only.
    pub read_only: bool,
    /// Filesystem-specific options, joined with commas.
    pub options: Vec<String>,
}

impl Default for RootfsConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            fstype: constants::DEFAULT_ROOTFS_TYPE.into(),
            read_only: true,
            options: constants::DEFAULT_ROOTFS_OPTIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Keyring naming of the authentication key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Kernel key type.
    pub key_type: String,
    /// Key description, referenced by the root filesystem's mount options.
    pub description: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            key_type: constants::AUTH_KEY_TYPE.into(),
            description: constants::AUTH_KEY_DESCRIPTION.into(),
        }
    }
}

impl BootConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| InitError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that all paths are absolute and the key is named.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let paths = [("new_root", &self.new_root), ("init", &self.init)];
        for (field, path) in paths {
            if !path.is_absolute() {
                return Err(InitError::Config {
                    message: format!("{field} must be absolute: {}", path.display()),
                });
            }
        }
        if let Some(rel) = self.live_mounts.iter().find(|p| !p.is_absolute()) {
            return Err(InitError::Config {
                message: format!("live mount must be absolute: {}", rel.display()),
            });
        }
        if self.key.key_type.is_empty() || self.key.description.is_empty() {
            return Err(InitError::Config {
                message: "key type and description must not be empty".into(),
            });
        }
        Ok(())
    }
}
