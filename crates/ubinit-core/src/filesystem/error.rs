//! Errors raised by filesystem operations during the root transition.
//!
//! None of these abort the boot sequence on their own. Callers decide the
//! severity: the deleter treats [`FsError::Stat`] and [`FsError::ReadDir`] as
//! fatal for a subtree, everything else as logged and skipped.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use thiserror::Error;

/// A failed syscall together with the path it was applied to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// `mount(2)` failed.
    #[error("unable to mount file system {target}: {source}")]
    Mount {
        /// Mount destination.
        target: PathBuf,
        /// Kernel error.
        source: Errno,
    },

    /// `mount(2)` with `MS_MOVE` failed.
    #[error("failed to move mount {from} to {to}: {source}")]
    MoveMount {
        /// Current location of the mount.
        from: PathBuf,
        /// Requested location.
        to: PathBuf,
        /// Kernel error.
        source: Errno,
    },

    /// A directory could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Directory path.
        path: PathBuf,
        /// Kernel error.
        source: Errno,
    },

    /// The device identity of a directory could not be read.
    #[error("unable to get underlying device for {path}: {source}")]
    Stat {
        /// Directory path.
        path: PathBuf,
        /// Kernel error.
        source: Errno,
    },

    /// A directory could not be enumerated.
    #[error("unable to read directory {path}: {source}")]
    ReadDir {
        /// Directory path.
        path: PathBuf,
        /// Kernel error.
        source: Errno,
    },

    /// A non-directory entry could not be unlinked.
    #[error("unable to remove file {path}: {source}")]
    Unlink {
        /// Entry path.
        path: PathBuf,
        /// Kernel error.
        source: Errno,
    },

    /// A directory could not be removed.
    #[error("unable to remove directory {path}: {source}")]
    RemoveDir {
        /// Directory path.
        path: PathBuf,
        /// Kernel error.
        source: Errno,
    },

    /// `chdir(2)` failed.
    #[error("failed to change directory to {path}: {source}")]
    Chdir {
        /// Target directory.
        path: PathBuf,
        /// Kernel error.
        source: Errno,
    },

    /// `chroot(2)` failed.
    #[error("failed to chroot into {path}: {source}")]
    Chroot {
        /// New root directory.
        path: PathBuf,
        /// Kernel error.
        source: Errno,
    },

    /// `execve(2)` failed.
    #[error("failed to exec {path}: {source}")]
    Exec {
        /// Program path.
        path: PathBuf,
        /// Kernel error.
        source: Errno,
    },
}

impl FsError {
    /// Returns the kernel error behind this failure.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::Mount { source, .. }
            | Self::MoveMount { source, .. }
            | Self::Open { source, .. }
            | Self::Stat { source, .. }
            | Self::ReadDir { source, .. }
            | Self::Unlink { source, .. }
            | Self::RemoveDir { source, .. }
            | Self::Chdir { source, .. }
            | Self::Chroot { source, .. }
            | Self::Exec { source, .. } => *source,
        }
    }

    /// Returns the primary path the failed syscall was applied to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Mount { target: path, .. }
            | Self::MoveMount { from: path, .. }
            | Self::Open { path, .. }
            | Self::Stat { path, .. }
            | Self::ReadDir { path, .. }
            | Self::Unlink { path, .. }
            | Self::RemoveDir { path, .. }
            | Self::Chdir { path, .. }
            | Self::Chroot { path, .. }
            | Self::Exec { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_path_and_errno() {
        let err = FsError::Unlink {
            path: PathBuf::from("a/locked"),
            source: Errno::EACCES,
        };
        let msg = err.to_string();
        assert!(msg.contains("a/locked"));
        assert!(msg.contains("EACCES"));
    }

    #[test]
    fn move_mount_reports_source_path() {
        let err = FsError::MoveMount {
            from: PathBuf::from("/run"),
            to: PathBuf::from("/newroot/run"),
            source: Errno::ENOENT,
        };
        assert_eq!(err.path(), Path::new("/run"));
        assert_eq!(err.errno(), Errno::ENOENT);
    }
}
