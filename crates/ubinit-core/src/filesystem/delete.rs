//! Device-scoped recursive deletion.
//!
//! Empties a directory without ever crossing into a different filesystem:
//! a child directory whose device differs from its parent's is a mount
//! point and is left alone together with everything below it. This is what
//! makes it safe to wipe the old initramfs root while mounts are still
//! stacked on it.
//!
//! The walk keeps its own stack of open directory handles instead of
//! recursing, so depth is bounded by heap rather than thread stack, and
//! each handle is dropped (closed) as soon as its frame is finished or
//! abandoned.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::error::FsError;
use super::{DeviceId, FsOps};

/// What a deletion pass did and did not remove.
///
/// Paths are relative to the directory the pass started from.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// Non-directory entries unlinked.
    pub files_removed: usize,
    /// Directories removed after being emptied.
    pub dirs_removed: usize,
    /// Mount points of other filesystems, left untouched.
    pub boundaries: Vec<PathBuf>,
    /// Entries whose removal failed. Logged and skipped.
    pub skipped: Vec<FsError>,
    /// Subtrees left in place because their device could not be established.
    pub abandoned: Vec<FsError>,
}

impl DeleteReport {
    /// Returns `true` if nothing was skipped or abandoned.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.abandoned.is_empty()
    }
}

/// An open same-device directory whose entries are being removed.
struct Frame<D> {
    dir: D,
    dev: DeviceId,
    entries: std::vec::IntoIter<OsString>,
    path: PathBuf,
    name: OsString,
}

enum Visit<D> {
    Removed,
    Boundary(PathBuf),
    Skipped(FsError),
    Abandoned(FsError),
    Descend(Frame<D>),
}

/// Removes everything inside `root` that lives on the same device as `root`.
///
/// `root` itself is not removed and stays open; the caller owns it.
///
/// # Errors
///
/// Returns [`FsError::Stat`] or [`FsError::ReadDir`] if `root` cannot be
/// identified or listed. Nothing is deleted in that case, and logging the
/// error is left to the caller.
pub fn delete_contents<F: FsOps>(fs: &F, root: &F::Dir) -> Result<DeleteReport, FsError> {
    let root_dev = fs.stat_device(root).map_err(|source| FsError::Stat {
        path: PathBuf::from("."),
        source,
    })?;
    let mut root_entries = fs
        .read_dir_names(root)
        .map_err(|source| FsError::ReadDir {
            path: PathBuf::from("."),
            source,
        })?
        .into_iter();

    let mut report = DeleteReport::default();
    let mut stack: Vec<Frame<F::Dir>> = Vec::new();

    loop {
        let next = match stack.last_mut() {
            Some(frame) => frame.entries.next(),
            None => root_entries.next(),
        };

        if let Some(name) = next {
            let (parent, parent_dev, parent_path) = match stack.last() {
                Some(frame) => (&frame.dir, frame.dev, frame.path.as_path()),
                None => (root, root_dev, Path::new("")),
            };
            let path = parent_path.join(&name);
            match visit(fs, parent, parent_dev, name, path) {
                Visit::Removed => report.files_removed += 1,
                Visit::Boundary(path) => report.boundaries.push(path),
                Visit::Skipped(err) => report.skipped.push(err),
                Visit::Abandoned(err) => report.abandoned.push(err),
                Visit::Descend(frame) => stack.push(frame),
            }
            continue;
        }

        // Current directory exhausted: close it, then remove it from its parent.
        let Some(Frame { dir, name, path, .. }) = stack.pop() else {
            break;
        };
        drop(dir);
        let parent = stack.last().map_or(root, |frame| &frame.dir);
        match fs.remove_dir_at(parent, &name) {
            Ok(()) => report.dirs_removed += 1,
            Err(source) => {
                let err = FsError::RemoveDir { path, source };
                tracing::warn!(error = %err, "switch_root: skipping directory");
                report.skipped.push(err);
            }
        }
    }

    tracing::debug!(
        files = report.files_removed,
        dirs = report.dirs_removed,
        boundaries = report.boundaries.len(),
        skipped = report.skipped.len(),
        abandoned = report.abandoned.len(),
        "directory contents deleted"
    );
    Ok(report)
}

fn visit<F: FsOps>(
    fs: &F,
    parent: &F::Dir,
    parent_dev: DeviceId,
    name: OsString,
    path: PathBuf,
) -> Visit<F::Dir> {
    let Ok(child) = fs.open_dir_no_follow(parent, &name) else {
        // Not a directory, or a symlink: a leaf.
        return match fs.unlink_at(parent, &name) {
            Ok(()) => Visit::Removed,
            Err(source) => {
                let err = FsError::Unlink { path, source };
                tracing::warn!(error = %err, "switch_root: skipping file");
                Visit::Skipped(err)
            }
        };
    };

    let dev = match fs.stat_device(&child) {
        Ok(dev) => dev,
        Err(source) => {
            let err = FsError::Stat { path, source };
            tracing::warn!(error = %err, "switch_root: leaving subtree in place");
            return Visit::Abandoned(err);
        }
    };
    if dev != parent_dev {
        tracing::debug!(path = %path.display(), device = %dev, "not crossing mount point");
        return Visit::Boundary(path);
    }

    match fs.read_dir_names(&child) {
        Ok(names) => Visit::Descend(Frame {
            dir: child,
            dev,
            entries: names.into_iter(),
            path,
            name,
        }),
        Err(source) => {
            let err = FsError::ReadDir { path, source };
            tracing::warn!(error = %err, "switch_root: leaving subtree in place");
            Visit::Abandoned(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use nix::errno::Errno;

    use super::*;
    use crate::filesystem::memory::{Call, MemoryFs};

    fn root_of(fs: &MemoryFs) -> <MemoryFs as FsOps>::Dir {
        fs.open_root().expect("open root")
    }

    #[test]
    fn uniform_tree_is_emptied() {
        let fs = MemoryFs::new();
        fs.add_file("/a/file1");
        fs.add_file("/a/b/file2");
        fs.add_dir("/a/b/c/d");
        fs.add_file("/top");
        let root = root_of(&fs);

        let report = delete_contents(&fs, &root).expect("delete");

        assert!(report.is_clean());
        assert_eq!(report.files_removed, 3);
        assert_eq!(report.dirs_removed, 4);
        assert!(fs.list(&root).is_empty());
    }

    #[test]
    fn foreign_device_subtree_is_left_untouched() {
        let fs = MemoryFs::new();
        fs.add_file("/a/file1");
        fs.add_mount("/a/mnt");
        fs.add_file("/a/mnt/keep");
        fs.add_dir("/a/mnt/sub/deeper");
        let root = root_of(&fs);

        let report = delete_contents(&fs, &root).expect("delete");

        assert_eq!(report.boundaries, vec![PathBuf::from("a/mnt")]);
        assert!(fs.exists("/a/mnt/keep"));
        assert!(fs.exists("/a/mnt/sub/deeper"));
        assert!(!fs.exists("/a/file1"));
        // `a` still holds the mount point, so its removal is skipped.
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].errno(), Errno::ENOTEMPTY);
    }

    #[test]
    fn empty_directory_is_idempotent() {
        let fs = MemoryFs::new();
        let root = root_of(&fs);

        let first = delete_contents(&fs, &root).expect("first pass");
        let second = delete_contents(&fs, &root).expect("second pass");

        assert_eq!(first, DeleteReport::default());
        assert_eq!(second, DeleteReport::default());
    }

    #[test]
    fn failed_unlink_does_not_stop_siblings() {
        let fs = MemoryFs::new();
        fs.add_file("/d/one");
        fs.add_file("/d/locked");
        fs.add_file("/d/two");
        fs.add_file("/other");
        fs.deny_removal("/d/locked");
        let root = root_of(&fs);

        let report = delete_contents(&fs, &root).expect("delete");

        assert!(fs.exists("/d/locked"));
        assert!(!fs.exists("/d/one"));
        assert!(!fs.exists("/d/two"));
        assert!(!fs.exists("/other"));
        assert_eq!(report.files_removed, 3);
        let unlink = report
            .skipped
            .iter()
            .find(|e| matches!(e, FsError::Unlink { .. }))
            .expect("unlink failure recorded");
        assert_eq!(unlink.path(), Path::new("d/locked"));
        assert_eq!(unlink.errno(), Errno::EACCES);
    }

    #[test]
    fn symlink_is_unlinked_not_followed() {
        let fs = MemoryFs::new();
        fs.add_mount("/data");
        fs.add_file("/data/precious");
        fs.add_symlink("/link");
        let root = root_of(&fs);

        let report = delete_contents(&fs, &root).expect("delete");

        assert!(!fs.exists("/link"));
        assert!(fs.exists("/data/precious"));
        assert_eq!(report.files_removed, 1);
    }

    #[test]
    fn stat_failure_abandons_only_that_subtree() {
        let fs = MemoryFs::new();
        fs.add_file("/murky/inside");
        fs.add_file("/clear/inside");
        fs.fail_stat("/murky");
        let root = root_of(&fs);

        let report = delete_contents(&fs, &root).expect("delete");

        assert!(fs.exists("/murky/inside"));
        assert!(!fs.exists("/clear"));
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].path(), Path::new("murky"));
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn unlistable_directory_is_left_in_place() {
        let fs = MemoryFs::new();
        fs.add_dir("/sealed");
        fs.add_file("/sealed/inside");
        fs.add_dir("/empty-sealed");
        fs.add_file("/other");
        fs.fail_read_dir("/sealed");
        fs.fail_read_dir("/empty-sealed");
        let root = root_of(&fs);

        let report = delete_contents(&fs, &root).expect("delete");

        assert!(fs.exists("/sealed/inside"));
        // Empty, so an rmdir would have succeeded had one been attempted.
        assert!(fs.exists("/empty-sealed"));
        assert!(!fs.exists("/other"));
        assert_eq!(report.abandoned.len(), 2);
        assert!(
            report
                .abandoned
                .iter()
                .all(|e| matches!(e, FsError::ReadDir { source: Errno::EIO, .. }))
        );
        assert!(!fs.calls().iter().any(|c| matches!(
            c,
            Call::RemoveDir(name) if name == "sealed" || name == "empty-sealed"
        )));
        assert_eq!(fs.open_handles(), 1);
    }

    #[test]
    fn stat_failure_on_root_deletes_nothing() {
        let fs = MemoryFs::new();
        fs.add_file("/file");
        fs.fail_stat("/");
        let root = root_of(&fs);

        let err = delete_contents(&fs, &root).unwrap_err();

        assert!(matches!(err, FsError::Stat { .. }));
        assert!(fs.exists("/file"));
    }

    #[test]
    fn every_handle_is_released() {
        let fs = MemoryFs::new();
        fs.add_file("/a/b/c/file");
        fs.add_mount("/a/mnt");
        fs.add_file("/x/y/z");
        fs.fail_stat("/x/y");
        let root = root_of(&fs);

        let _ = delete_contents(&fs, &root).expect("delete");

        assert_eq!(fs.open_handles(), 1, "only the caller's root handle remains");
    }

    #[test]
    fn deep_tree_does_not_exhaust_stack() {
        let fs = MemoryFs::new();
        let deep: PathBuf = std::iter::once("/".to_owned())
            .chain((0..5_000).map(|i| format!("d{i}")))
            .collect();
        fs.add_file(deep.join("leaf"));
        let root = root_of(&fs);

        let report = delete_contents(&fs, &root).expect("delete");

        assert_eq!(report.dirs_removed, 5_000);
        assert!(fs.list(&root).is_empty());
    }
}
