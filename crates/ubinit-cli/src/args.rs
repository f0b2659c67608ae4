//! Command-line surface of `init`.
//!
//! The kernel hands init whatever was left on its command line, with flags
//! written in the single-dash long form (`-key`, `-rootfs`). Those are
//! rewritten to clap's `--key` form before parsing.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use ubinit_common::config::BootConfig;

/// Long flags that may appear with a single dash.
const LONG_FLAGS: &[&str] = &["key", "rootfs", "init", "new-root", "config"];

/// ubinit: mount the authenticated root filesystem and switch into it.
#[derive(Parser, Debug, Default, PartialEq, Eq)]
#[command(name = "init", version, about, long_about = None)]
pub struct Cli {
    /// Filesystem authentication key.
    #[arg(long)]
    pub key: Option<String>,

    /// Root filesystem device or image.
    #[arg(long)]
    pub rootfs: Option<String>,

    /// Init binary to execute inside the new root.
    #[arg(long)]
    pub init: Option<PathBuf>,

    /// Mount point of the new root before the switch.
    #[arg(long)]
    pub new_root: Option<PathBuf>,

    /// JSON boot configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Leftover kernel command-line words.
    #[arg(hide = true)]
    pub rest: Vec<String>,
}

impl Cli {
    /// Parses `args`, accepting single-dash long flags.
    ///
    /// # Errors
    ///
    /// Returns the clap error for unknown flags or missing values.
    pub fn parse_lenient<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::try_parse_from(normalize(args))
    }

    /// Applies the flags on top of `config`.
    pub fn apply(&self, config: &mut BootConfig) {
        if let Some(rootfs) = &self.rootfs {
            config.rootfs.device.clone_from(rootfs);
        }
        if let Some(init) = &self.init {
            config.init.clone_from(init);
        }
        if let Some(new_root) = &self.new_root {
            config.new_root.clone_from(new_root);
        }
    }
}

/// Rewrites `-key` and `-key=value` to `--key` and `--key=value` for the
/// known long flags. Everything after `--` is left alone.
fn normalize<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;
    for (i, arg) in args.into_iter().map(Into::into).enumerate() {
        if i == 0 || passthrough {
            out.push(arg);
            continue;
        }
        if arg == "--" {
            passthrough = true;
            out.push(arg);
            continue;
        }
        let rewritten = arg.to_str().and_then(|s| {
            let body = s.strip_prefix('-').filter(|b| !b.starts_with('-'))?;
            let name = body.split_once('=').map_or(body, |(name, _)| name);
            LONG_FLAGS.contains(&name).then(|| OsString::from(format!("-{s}")))
        });
        out.push(rewritten.unwrap_or(arg));
    }
    out
}
