//! Kernel keyring provisioning for the root filesystem authentication key.
//!
//! The authenticated root filesystem looks its key up by description in the
//! session keyring, so the key must be inserted before that filesystem's
//! contents are trusted.

#![allow(unsafe_code)]

#[cfg(target_os = "linux")]
use std::ffi::CString;
use std::fmt;

use nix::errno::Errno;
use thiserror::Error;
use ubinit_common::config::KeyConfig;

/// `KEY_SPEC_SESSION_KEYRING` from `<linux/keyctl.h>`.
#[cfg(target_os = "linux")]
const KEY_SPEC_SESSION_KEYRING: libc::c_long = -3;

/// Serial number the kernel assigned to an inserted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySerial(i32);

impl KeySerial {
    /// Wraps a raw key serial.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for KeySerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while provisioning a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyringError {
    /// No key material was supplied.
    #[error("no key material for {description}")]
    MissingKey {
        /// Key description.
        description: String,
    },

    /// Type or description contains an interior NUL byte.
    #[error("invalid key name {name:?}")]
    InvalidName {
        /// Offending name.
        name: String,
    },

    /// `add_key(2)` failed.
    #[error("unable to add {key_type} key {description}: {source}")]
    AddKey {
        /// Key type.
        key_type: String,
        /// Key description.
        description: String,
        /// Kernel error.
        source: Errno,
    },
}

/// Insertion of keys into the session keyring.
pub trait KeyringOps {
    /// Adds a key and returns its serial.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed insertion.
    fn add_session_key(&self, key_type: &str, description: &str, payload: &[u8])
    -> nix::Result<KeySerial>;
}

/// [`KeyringOps`] through the `add_key(2)` syscall.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxKeyring;

#[cfg(target_os = "linux")]
impl KeyringOps for LinuxKeyring {
    fn add_session_key(
        &self,
        key_type: &str,
        description: &str,
        payload: &[u8],
    ) -> nix::Result<KeySerial> {
        let key_type = CString::new(key_type).map_err(|_| Errno::EINVAL)?;
        let description = CString::new(description).map_err(|_| Errno::EINVAL)?;
        // SAFETY: both names are NUL-terminated, `payload` is valid for
        // `payload.len()` bytes, and the kernel copies it before returning.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_add_key,
                key_type.as_ptr(),
                description.as_ptr(),
                payload.as_ptr().cast::<libc::c_void>(),
                payload.len(),
                KEY_SPEC_SESSION_KEYRING,
            )
        };
        let serial = Errno::result(ret)?;
        i32::try_from(serial)
            .map(KeySerial::new)
            .map_err(|_| Errno::ERANGE)
    }
}

/// Inserts the filesystem authentication key described by `config`.
///
/// Logs the serial on success and the error on failure.
///
/// # Errors
///
/// Returns an error if `key` is empty, a name is invalid, or the kernel
/// refuses the key.
pub fn provision_key<K: KeyringOps>(
    keyring: &K,
    config: &KeyConfig,
    key: &[u8],
) -> Result<KeySerial, KeyringError> {
    let result = add_key(keyring, config, key);
    match &result {
        Ok(serial) => tracing::info!(
            description = %config.description,
            serial = %serial,
            "added filesystem authentication key"
        ),
        Err(err) => tracing::error!(error = %err, "unable to add filesystem authentication key"),
    }
    result
}

fn add_key<K: KeyringOps>(
    keyring: &K,
    config: &KeyConfig,
    key: &[u8],
) -> Result<KeySerial, KeyringError> {
    if key.is_empty() {
        return Err(KeyringError::MissingKey {
            description: config.description.clone(),
        });
    }
    for name in [&config.key_type, &config.description] {
        if name.contains('\0') {
            return Err(KeyringError::InvalidName { name: name.clone() });
        }
    }
    keyring
        .add_session_key(&config.key_type, &config.description, key)
        .map_err(|source| KeyringError::AddKey {
            key_type: config.key_type.clone(),
            description: config.description.clone(),
            source,
        })
}
