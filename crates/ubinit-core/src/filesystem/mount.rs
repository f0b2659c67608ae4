//! Boot-time mount table and its applier.
//!
//! Mounts `/proc`, `/sys` and its kernel interfaces, `/dev`, `/run`, and
//! the authenticated root filesystem. Entries are applied in order so
//! nested destinations come after their parents; a failing entry never
//! stops the rest.

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use ubinit_common::config::{BootConfig, RootfsConfig};

use super::FsOps;
use super::error::FsError;

/// Generic flags shared by the pseudo-filesystems under `/proc` and `/sys`.
pub const DEFAULT_FLAG_MASK: MsFlags = MsFlags::MS_NOEXEC
    .union(MsFlags::MS_NOSUID)
    .union(MsFlags::MS_NODEV)
    .union(MsFlags::MS_RELATIME)
    .union(MsFlags::MS_LAZYTIME);

/// String options matching [`DEFAULT_FLAG_MASK`].
pub const DEFAULT_OPTIONS: &str = "rw,noexec,nosuid,nodev,relatime,lazytime";

/// One entry of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    source: String,
    destination: PathBuf,
    fstype: String,
    flags: MsFlags,
    options: Vec<String>,
}

impl MountSpec {
    /// Creates a mount entry.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
        fstype: impl Into<String>,
        flags: MsFlags,
        options: &[&str],
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            fstype: fstype.into(),
            flags,
            options: options.iter().map(ToString::to_string).collect(),
        }
    }

    /// Device, image, or pseudo-filesystem name.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Mount point.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Filesystem type.
    #[must_use]
    pub fn fstype(&self) -> &str {
        &self.fstype
    }

    /// Generic `MS_*` flags.
    #[must_use]
    pub const fn flags(&self) -> MsFlags {
        self.flags
    }

    /// Options joined with commas, as passed in the `data` argument.
    #[must_use]
    pub fn data(&self) -> String {
        self.options.join(",")
    }

    /// Mount entry for the authenticated root filesystem.
    #[must_use]
    pub fn rootfs(destination: &Path, rootfs: &RootfsConfig) -> Self {
        let mut flags = MsFlags::MS_NOSUID | MsFlags::MS_RELATIME | MsFlags::MS_LAZYTIME;
        let mut options = Vec::with_capacity(rootfs.options.len() + 1);
        if rootfs.read_only {
            flags |= MsFlags::MS_RDONLY;
            options.push("ro".to_owned());
        }
        options.extend(rootfs.options.iter().cloned());
        Self {
            source: rootfs.device.clone(),
            destination: destination.to_path_buf(),
            fstype: rootfs.fstype.clone(),
            flags,
            options,
        }
    }
}

/// The built-in mount table, parents before children.
#[must_use]
pub fn default_mounts() -> Vec<MountSpec> {
    let dev_flags = MsFlags::MS_NOSUID | MsFlags::MS_RELATIME | MsFlags::MS_LAZYTIME;
    let tmpfs_flags = dev_flags | MsFlags::MS_NODEV;
    vec![
        MountSpec::new("proc", "/proc", "proc", DEFAULT_FLAG_MASK, &[DEFAULT_OPTIONS]),
        MountSpec::new("sys", "/sys", "sysfs", DEFAULT_FLAG_MASK, &[DEFAULT_OPTIONS]),
        MountSpec::new(
            "securityfs",
            "/sys/kernel/security",
            "securityfs",
            DEFAULT_FLAG_MASK,
            &[DEFAULT_OPTIONS],
        ),
        MountSpec::new(
            "cgroup2",
            "/sys/fs/cgroup",
            "cgroup2",
            DEFAULT_FLAG_MASK,
            &[DEFAULT_OPTIONS, "nsdelegate", "memory_recursiveprot"],
        ),
        MountSpec::new(
            "bpf",
            "/sys/fs/bpf",
            "bpf",
            DEFAULT_FLAG_MASK,
            &[DEFAULT_OPTIONS, "mode=700"],
        ),
        MountSpec::new(
            "configfs",
            "/sys/kernel/config",
            "configfs",
            DEFAULT_FLAG_MASK,
            &[DEFAULT_OPTIONS],
        ),
        MountSpec::new(
            "debugfs",
            "/sys/kernel/debug",
            "debugfs",
            DEFAULT_FLAG_MASK,
            &[DEFAULT_OPTIONS, "mode=700"],
        ),
        MountSpec::new(
            "tracefs",
            "/sys/kernel/tracing",
            "tracefs",
            DEFAULT_FLAG_MASK,
            &[DEFAULT_OPTIONS, "mode=700"],
        ),
        MountSpec::new(
            "dev",
            "/dev",
            "devtmpfs",
            dev_flags,
            &["rw", "nosuid", "relatime", "lazytime", "mode=755"],
        ),
        MountSpec::new(
            "shm",
            "/dev/shm",
            "tmpfs",
            tmpfs_flags,
            &["rw", "nosuid", "nodev", "relatime", "lazytime"],
        ),
        MountSpec::new(
            "devpts",
            "/dev/pts",
            "devpts",
            dev_flags,
            &[
                "rw",
                "nosuid",
                "relatime",
                "lazytime",
                "mode=620",
                "gid=5",
                "ptmxmode=000",
            ],
        ),
        MountSpec::new(
            "run",
            "/run",
            "tmpfs",
            tmpfs_flags,
            &["rw", "nosuid", "nodev", "relatime", "lazytime", "mode=755"],
        ),
    ]
}

/// Outcome of one [`Mounter::mount_all`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MountReport {
    /// Destinations mounted successfully, in table order.
    pub mounted: Vec<PathBuf>,
    /// Entries that failed, in table order.
    pub failed: Vec<FsError>,
}

impl MountReport {
    /// Returns `true` if every entry was mounted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered collection of mount entries.
#[derive(Debug, Default, Clone)]
pub struct Mounter {
    mounts: Vec<MountSpec>,
}

impl Mounter {
    /// Creates an empty mounter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the built-in table from [`default_mounts`].
    #[must_use]
    pub fn with_default_mounts(self) -> Self {
        self.with_mounts(default_mounts())
    }

    /// Appends a single entry.
    #[must_use]
    pub fn with_mount(mut self, spec: MountSpec) -> Self {
        self.mounts.push(spec);
        self
    }

    /// Appends several entries, keeping their order.
    #[must_use]
    pub fn with_mounts(mut self, specs: impl IntoIterator<Item = MountSpec>) -> Self {
        self.mounts.extend(specs);
        self
    }

    /// Appends the authenticated root filesystem described by `config`.
    #[must_use]
    pub fn with_rootfs(self, config: &BootConfig) -> Self {
        self.with_mount(MountSpec::rootfs(&config.new_root, &config.rootfs))
    }

    /// Entries in application order.
    #[must_use]
    pub fn mounts(&self) -> &[MountSpec] {
        &self.mounts
    }

    /// Mounts every entry, logging and recording failures without stopping.
    pub fn mount_all<F: FsOps>(&self, fs: &F) -> MountReport {
        let mut report = MountReport::default();
        for spec in &self.mounts {
            match fs.mount(spec) {
                Ok(()) => {
                    tracing::debug!(
                        destination = %spec.destination.display(),
                        fstype = %spec.fstype,
                        "mounted file system"
                    );
                    report.mounted.push(spec.destination.clone());
                }
                Err(errno) => {
                    let err = FsError::Mount {
                        target: spec.destination.clone(),
                        source: errno,
                    };
                    tracing::warn!(error = %err, "mount failed");
                    report.failed.push(err);
                }
            }
        }
        tracing::info!(
            mounted = report.mounted.len(),
            failed = report.failed.len(),
            "mount table applied"
        );
        report
    }
}
