//! End-to-end tests for the kernel-backed capability.
//!
//! These tests drive [`LinuxFs`] on real temporary trees with the
//! unprivileged calls the deleter needs (openat, fstat, readdir, unlinkat):
//! 1. Empty a nested tree, keeping the root
//! 2. Reuse one handle across passes
//! 3. Never follow symlinks out of the tree

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::Path;

use ubinit_core::filesystem::delete::delete_contents;
use ubinit_core::filesystem::linux::LinuxFs;

// ── Deletion on the real filesystem ─────────────────────────────────

fn open_dir(path: &Path) -> OwnedFd {
    OwnedFd::from(File::open(path).expect("open dir"))
}

#[test]
fn pipeline_delete_real_tree() {
    let root = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(root.path().join("a/b/c")).expect("mkdir");
    std::fs::write(root.path().join("a/file1"), b"1").expect("write");
    std::fs::write(root.path().join("a/b/file2"), b"2").expect("write");
    std::fs::write(root.path().join("top"), b"3").expect("write");

    let report = delete_contents(&LinuxFs, &open_dir(root.path())).expect("delete");

    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.files_removed, 3);
    assert_eq!(report.dirs_removed, 3);
    assert_eq!(std::fs::read_dir(root.path()).expect("read").count(), 0);
    assert!(root.path().exists(), "the root itself is kept");
}

#[test]
fn pipeline_delete_real_tree_is_idempotent() {
    let root = tempfile::tempdir().expect("tempdir");
    std::fs::write(root.path().join("file"), b"x").expect("write");
    let dir = open_dir(root.path());

    let first = delete_contents(&LinuxFs, &dir).expect("first pass");
    let empty = delete_contents(&LinuxFs, &dir).expect("second pass");

    assert_eq!(first.files_removed, 1);
    assert_eq!(empty.files_removed, 0);
    assert_eq!(empty.dirs_removed, 0);
    assert!(empty.is_clean());
}

#[test]
fn pipeline_delete_real_tree_reuses_handle() {
    let root = tempfile::tempdir().expect("tempdir");
    std::fs::write(root.path().join("x"), b"x").expect("write");
    let dir = open_dir(root.path());

    let first = delete_contents(&LinuxFs, &dir).expect("first pass");
    std::fs::write(root.path().join("y"), b"y").expect("write");
    std::fs::create_dir(root.path().join("z")).expect("mkdir");
    let second = delete_contents(&LinuxFs, &dir).expect("second pass");

    assert_eq!(first.files_removed, 1);
    assert_eq!(second.files_removed, 1);
    assert_eq!(second.dirs_removed, 1);
    assert_eq!(std::fs::read_dir(root.path()).expect("read").count(), 0);
}

#[test]
fn pipeline_delete_real_tree_does_not_follow_symlinks() {
    let outside = tempfile::tempdir().expect("tempdir");
    std::fs::write(outside.path().join("precious"), b"keep").expect("write");
    let root = tempfile::tempdir().expect("tempdir");
    std::os::unix::fs::symlink(outside.path(), root.path().join("link")).expect("symlink");

    let report = delete_contents(&LinuxFs, &open_dir(root.path())).expect("delete");

    assert_eq!(report.files_removed, 1);
    assert!(outside.path().join("precious").exists());
    assert!(std::fs::symlink_metadata(root.path().join("link")).is_err());
}
