//! System-wide constants and default paths.

/// Mount point of the authenticated root filesystem inside the initramfs.
pub const DEFAULT_NEW_ROOT: &str = "/newroot";

/// Init binary executed once the new root is in place.
pub const DEFAULT_INIT: &str = "/sbin/operator";

/// Special filesystems that survive the switch by being moved, not remounted.
pub const LIVE_MOUNTS: [&str; 4] = ["/dev", "/proc", "/sys", "/run"];

/// Filesystem type of the authenticated root filesystem.
pub const DEFAULT_ROOTFS_TYPE: &str = "ubifs";

/// Filesystem-specific options of the authenticated root filesystem.
pub const DEFAULT_ROOTFS_OPTIONS: [&str; 4] = [
    "auth_key=ubifs:auth",
    "auth_hash_name=sha256",
    "chk_data_crc",
    "bulk_read",
];

/// Kernel key type used for the filesystem authentication secret.
pub const AUTH_KEY_TYPE: &str = "logon";

/// Description under which the authentication key is inserted.
///
/// Must match the `auth_key=` mount option of the root filesystem.
pub const AUTH_KEY_DESCRIPTION: &str = "ubifs:auth";

/// Application name used in log output.
pub const APP_NAME: &str = "ubinit";
