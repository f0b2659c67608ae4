//! Filesystem operations for the root transition.
//!
//! Every kernel-facing action of the switch goes through [`FsOps`], so the
//! mount applier, the deleter, and the switch-root state machine can run
//! against `memory::MemoryFs` in tests (with the `testing` feature outside
//! this crate) and against [`linux::LinuxFs`] at boot.

pub mod delete;
pub mod error;
#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod mount;
pub mod relocate;
pub mod switch_root;

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::Path;

use nix::Result;

use self::mount::MountSpec;

/// Device number of the filesystem backing a directory.
///
/// Only ever compared for equality to detect mount-point boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Wraps a raw `st_dev` value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The syscalls the root transition is built from.
///
/// `Dir` is an owned directory handle: dropping it releases the underlying
/// descriptor, which is how every exit path of the deleter closes what it
/// opened.
pub trait FsOps {
    /// Owned handle to an open directory.
    type Dir;

    /// Mounts a filesystem as described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed `mount(2)`.
    fn mount(&self, spec: &MountSpec) -> Result<()>;

    /// Moves the mount at `from` to `to` without unmounting it.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed `mount(2)` with `MS_MOVE`.
    fn move_mount(&self, from: &Path, to: &Path) -> Result<()>;

    /// Opens the current root directory.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed open.
    fn open_root(&self) -> Result<Self::Dir>;

    /// Returns the device identity of an open directory.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed `fstat(2)`.
    fn stat_device(&self, dir: &Self::Dir) -> Result<DeviceId>;

    /// Lists the names of all entries in `dir`, excluding `.` and `..`.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed enumeration.
    fn read_dir_names(&self, dir: &Self::Dir) -> Result<Vec<OsString>>;

    /// Opens `name` relative to `parent` as a directory, refusing symlinks.
    ///
    /// # Errors
    ///
    /// Fails with `ENOTDIR` when `name` is a symlink or not a directory.
    fn open_dir_no_follow(&self, parent: &Self::Dir, name: &OsStr) -> Result<Self::Dir>;

    /// Unlinks the non-directory `name` relative to `parent`.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed `unlinkat(2)`.
    fn unlink_at(&self, parent: &Self::Dir, name: &OsStr) -> Result<()>;

    /// Removes the empty directory `name` relative to `parent`.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed `unlinkat(2)` with `AT_REMOVEDIR`.
    fn remove_dir_at(&self, parent: &Self::Dir, name: &OsStr) -> Result<()>;

    /// Changes the working directory.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed `chdir(2)`.
    fn chdir(&self, path: &Path) -> Result<()>;

    /// Changes the root directory.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed `chroot(2)`.
    fn chroot(&self, path: &Path) -> Result<()>;

    /// Replaces the process image with `program`, with `argv = [program]`
    /// and an empty environment.
    ///
    /// The kernel-backed implementation only returns on failure.
    ///
    /// # Errors
    ///
    /// Returns the errno of the failed `execve(2)`.
    fn exec(&self, program: &Path) -> Result<()>;
}
