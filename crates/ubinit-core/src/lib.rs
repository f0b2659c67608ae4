//! # ubinit-core
//!
//! The root-transition engine of the ubinit PID 1.
//!
//! This crate provides:
//! - **Filesystem capability**: the [`filesystem::FsOps`] trait over the
//!   handful of syscalls the transition needs, with a kernel-backed
//!   implementation and, behind the `testing` feature, an in-memory one.
//! - **Mount application**: the boot-time mount table and its applier.
//! - **Mount relocation**: `MS_MOVE` of live special filesystems.
//! - **Device-scoped deletion**: emptying the old root without ever crossing
//!   into another filesystem.
//! - **Switch-root**: the one-shot state machine that ties them together and
//!   ends by replacing the process image.
//! - **Keyring**: insertion of the root filesystem authentication key.
//!
//! Filesystem calls go through `nix`. The one raw syscall (`add_key`) is
//! wrapped with `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
pub mod keyring;
