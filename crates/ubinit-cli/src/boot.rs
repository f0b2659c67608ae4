//! The boot sequence: mount, provision the key, switch root.

use tracing::{info, warn};
use ubinit_common::config::BootConfig;
use ubinit_core::filesystem::FsOps;
use ubinit_core::filesystem::mount::Mounter;
use ubinit_core::filesystem::switch_root::{Handoff, SwitchRoot};
use ubinit_core::keyring::{KeyringOps, provision_key};

/// Startup banner.
pub const BANNER: &str = r"
       _     _       _ _
 _   _| |__ (_)_ __ (_) |_
| | | | '_ \| | '_ \| | __|
| |_| | |_) | | | | | | |_
 \__,_|_.__/|_|_| |_|_|\__|
";

/// Runs the whole boot sequence and returns how the handoff went.
///
/// Nothing before the final exec is fatal: mount and key failures are
/// logged and the sequence moves on.
pub fn boot<F: FsOps, K: KeyringOps>(
    fs: &F,
    keyring: &K,
    config: &BootConfig,
    key: Option<&str>,
) -> Handoff {
    info!("mounting all file systems");
    let mounts = Mounter::new()
        .with_default_mounts()
        .with_rootfs(config)
        .mount_all(fs);
    info!(
        mounted = mounts.mounted.len(),
        failed = mounts.failed.len(),
        "mounts applied"
    );

    info!("populating kernel keyring");
    match key.filter(|k| !k.is_empty()) {
        Some(key) => {
            let _ = provision_key(keyring, &config.key, key.as_bytes());
        }
        None => warn!("no filesystem authentication key given, skipping"),
    }

    info!("changing into new root");
    SwitchRoot::from_config(fs, config).run()
}
