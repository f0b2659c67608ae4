//! # init: ubinit PID 1
//!
//! Mounts the boot filesystems and the authenticated root filesystem,
//! provisions its key, and switches into it before executing the real init.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod args;
mod boot;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use ubinit_common::config::BootConfig;
use ubinit_common::constants;
use ubinit_core::filesystem::linux::LinuxFs;
use ubinit_core::filesystem::switch_root::Handoff;
use ubinit_core::keyring::LinuxKeyring;

use crate::args::Cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("{}", boot::BANNER);
    tracing::info!(
        app = constants::APP_NAME,
        version = env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let cli = match Cli::parse_lenient(std::env::args_os()) {
        Ok(cli) => cli,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unusable command line");
            Cli::default()
        }
    };
    if !cli.rest.is_empty() {
        tracing::debug!(args = ?cli.rest, "ignoring leftover arguments");
    }

    let mut config = load_config(&cli);
    cli.apply(&mut config);

    match boot::boot(&LinuxFs, &LinuxKeyring, &config, cli.key.as_deref()) {
        Handoff::Replaced(_) => Ok(()),
        Handoff::Failed { error, report } => {
            tracing::error!(
                error = %error,
                failed_steps = report.failures.len(),
                deleted = ?report.deleted,
                "init did not start"
            );
            Err(error).with_context(|| format!("executing {}", config.init.display()))
        }
    }
}

/// Loads `--config` if given. PID 1 has to keep going, so a broken file
/// falls back to the defaults.
fn load_config(cli: &Cli) -> BootConfig {
    let Some(path) = &cli.config else {
        return BootConfig::default();
    };
    match BootConfig::load(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded boot configuration");
            config
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "using default configuration");
            BootConfig::default()
        }
    }
}
