//! Mount relocation via `MS_MOVE`.
//!
//! A moved mount keeps serving the same filesystem instance, so open
//! descriptors on it stay valid across the switch.

use std::path::{Component, Path, PathBuf};

use super::FsOps;
use super::error::FsError;

/// Moves the mount at `from` to `to`.
///
/// `to` must already exist as a directory. The failure is returned for the
/// caller to log and record; it never stops the transition.
///
/// # Errors
///
/// Returns [`FsError::MoveMount`] if the kernel refuses the move.
pub fn relocate<F: FsOps>(fs: &F, from: &Path, to: &Path) -> Result<(), FsError> {
    fs.move_mount(from, to)
        .map_err(|source| FsError::MoveMount {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })?;
    tracing::debug!(from = %from.display(), to = %to.display(), "moved mount");
    Ok(())
}

/// Location of the live mount `mount` under `new_root`.
///
/// `/dev` under `/newroot` becomes `/newroot/dev`.
#[must_use]
pub fn target_under(new_root: &Path, mount: &Path) -> PathBuf {
    let relative: PathBuf = mount
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    new_root.join(relative)
}

#[cfg(test)]
mod tests {
    use nix::errno::Errno;

    use super::*;
    use crate::filesystem::memory::MemoryFs;

    #[test]
    fn target_under_strips_leading_slash() {
        assert_eq!(
            target_under(Path::new("/newroot"), Path::new("/dev")),
            PathBuf::from("/newroot/dev")
        );
        assert_eq!(
            target_under(Path::new("/newroot"), Path::new("/sys/fs/cgroup")),
            PathBuf::from("/newroot/sys/fs/cgroup")
        );
    }

    #[test]
    fn relocate_moves_mount_with_its_contents() {
        let fs = MemoryFs::new();
        fs.add_mount("/dev");
        fs.add_file("/dev/console");
        fs.add_dir("/newroot/dev");

        relocate(&fs, Path::new("/dev"), Path::new("/newroot/dev")).expect("move");

        assert!(fs.exists("/newroot/dev/console"));
        assert!(!fs.exists("/dev/console"));
        assert!(fs.exists("/dev"), "mount point directory stays behind");
    }

    #[test]
    fn relocate_to_missing_target_reports_enoent() {
        let fs = MemoryFs::new();
        fs.add_mount("/run");
        fs.add_dir("/newroot");

        let err = relocate(&fs, Path::new("/run"), Path::new("/newroot/run")).unwrap_err();

        assert_eq!(err.errno(), Errno::ENOENT);
        assert_eq!(err.path(), Path::new("/run"));
        assert!(fs.exists("/run"));
    }
}
