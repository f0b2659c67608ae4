//! The switch-root state machine.
//!
//! Moves the live special filesystems into the new root, captures a handle
//! on the old root, moves the new root onto `/`, chroots into it, empties
//! the old root, and finally replaces the process image with the real init:
//!
//! ```text
//! Init -> MountsRelocated -> OldRootCaptured -> RootMoved -> Chrooted
//!      -> OldRootDeleted -> Handoff
//! ```
//!
//! Each state is a type and each transition consumes the previous state, so
//! steps cannot be reordered, repeated, or skipped. Failures are logged and
//! recorded in the [`TransitionReport`] but never stop the machine: there is
//! nothing above PID 1 to fall back to, so the only way forward is toward
//! exec. [`Handoff`] has no successor.

use std::fmt;
use std::path::{Path, PathBuf};

use ubinit_common::config::BootConfig;

use super::FsOps;
use super::delete::{DeleteReport, delete_contents};
use super::error::FsError;
use super::relocate::{relocate, target_under};

/// A step of the transition, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Moving a live special filesystem into the new root.
    RelocateMounts,
    /// Opening `/` before it is replaced.
    CaptureOldRoot,
    /// Entering and moving the new root onto `/`.
    MoveRoot,
    /// `chroot(".")` into the moved root.
    Chroot,
    /// Emptying the old root.
    DeleteOldRoot,
    /// Replacing the process image.
    Exec,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RelocateMounts => write!(f, "relocate-mounts"),
            Self::CaptureOldRoot => write!(f, "capture-old-root"),
            Self::MoveRoot => write!(f, "move-root"),
            Self::Chroot => write!(f, "chroot"),
            Self::DeleteOldRoot => write!(f, "delete-old-root"),
            Self::Exec => write!(f, "exec"),
        }
    }
}

/// Everything that went wrong on the way, plus the deletion summary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    /// Failed steps in the order they happened.
    pub failures: Vec<(Step, FsError)>,
    /// Outcome of the old-root deletion, if it ran.
    pub deleted: Option<DeleteReport>,
}

impl TransitionReport {
    /// Returns `true` if no step failed and deletion left nothing behind
    /// except other filesystems.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.deleted.as_ref().is_none_or(DeleteReport::is_clean)
    }

    /// Failures recorded for `step`.
    pub fn failures_in(&self, step: Step) -> impl Iterator<Item = &FsError> {
        self.failures
            .iter()
            .filter(move |(s, _)| *s == step)
            .map(|(_, e)| e)
    }

    fn record(&mut self, step: Step, err: FsError) {
        tracing::error!(step = %step, error = %err, "switch_root: step failed, continuing");
        self.failures.push((step, err));
    }
}

/// Start state.
#[derive(Debug)]
pub struct Init;

/// Live special filesystems have been moved (or their move failed).
#[derive(Debug)]
pub struct MountsRelocated;

/// The old root is held open.
#[derive(Debug)]
pub struct OldRootCaptured<D>(Option<D>);

/// The new root sits on `/`.
#[derive(Debug)]
pub struct RootMoved<D>(Option<D>);

/// The process root is the new filesystem.
#[derive(Debug)]
pub struct Chrooted<D>(Option<D>);

/// The old root has been emptied and its handle closed.
#[derive(Debug)]
pub struct OldRootDeleted;

/// The root transition, parameterized by its current state.
#[derive(Debug)]
pub struct SwitchRoot<'fs, F, S> {
    fs: &'fs F,
    new_root: PathBuf,
    init: PathBuf,
    live_mounts: Vec<PathBuf>,
    report: TransitionReport,
    state: S,
}

/// Terminal state. Only reachable by value, with no further transition.
#[derive(Debug)]
#[must_use]
pub enum Handoff {
    /// The process image was replaced. Only observable with a filesystem
    /// whose `exec` returns on success.
    Replaced(TransitionReport),
    /// `exec` failed; the caller can only log and exit.
    Failed {
        /// The exec failure.
        error: FsError,
        /// Everything that happened before it.
        report: TransitionReport,
    },
}

impl Handoff {
    /// Transition report, whichever way the handoff went.
    #[must_use]
    pub const fn report(&self) -> &TransitionReport {
        match self {
            Self::Replaced(report) | Self::Failed { report, .. } => report,
        }
    }
}

impl<'fs, F: FsOps> SwitchRoot<'fs, F, Init> {
    /// Prepares a transition into `new_root` ending with `init`.
    ///
    /// Uses the standard live mount set (`/dev`, `/proc`, `/sys`, `/run`).
    pub fn new(fs: &'fs F, new_root: impl Into<PathBuf>, init: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            new_root: new_root.into(),
            init: init.into(),
            live_mounts: ubinit_common::constants::LIVE_MOUNTS
                .iter()
                .map(PathBuf::from)
                .collect(),
            report: TransitionReport::default(),
            state: Init,
        }
    }

    /// Prepares a transition from a boot configuration.
    pub fn from_config(fs: &'fs F, config: &BootConfig) -> Self {
        Self::new(fs, &config.new_root, &config.init)
            .with_live_mounts(config.live_mounts.iter().cloned())
    }

    /// Replaces the set of live mounts moved into the new root.
    #[must_use]
    pub fn with_live_mounts(mut self, mounts: impl IntoIterator<Item = PathBuf>) -> Self {
        self.live_mounts = mounts.into_iter().collect();
        self
    }

    /// Runs every step in order and hands off to init.
    pub fn run(self) -> Handoff {
        tracing::info!(
            new_root = %self.new_root.display(),
            init = %self.init.display(),
            "switching root"
        );
        self.relocate_mounts()
            .capture_old_root()
            .move_root()
            .chroot()
            .delete_old_root()
            .exec()
    }

    /// Moves each live mount to the same path under the new root.
    pub fn relocate_mounts(mut self) -> SwitchRoot<'fs, F, MountsRelocated> {
        tracing::info!(count = self.live_mounts.len(), "moving mounts");
        for mount in &self.live_mounts {
            let target = target_under(&self.new_root, mount);
            if let Err(err) = relocate(self.fs, mount, &target) {
                self.report.record(Step::RelocateMounts, err);
            }
        }
        self.map_state(|Init| MountsRelocated)
    }
}

impl<'fs, F: FsOps> SwitchRoot<'fs, F, MountsRelocated> {
    /// Opens `/` while it still is the old root.
    pub fn capture_old_root(mut self) -> SwitchRoot<'fs, F, OldRootCaptured<F::Dir>> {
        let handle = match self.fs.open_root() {
            Ok(handle) => Some(handle),
            Err(source) => {
                self.report.record(
                    Step::CaptureOldRoot,
                    FsError::Open {
                        path: PathBuf::from("/"),
                        source,
                    },
                );
                None
            }
        };
        self.map_state(|MountsRelocated| OldRootCaptured(handle))
    }
}

impl<'fs, F: FsOps> SwitchRoot<'fs, F, OldRootCaptured<F::Dir>> {
    /// Enters the new root and moves it onto `/`.
    pub fn move_root(mut self) -> SwitchRoot<'fs, F, RootMoved<F::Dir>> {
        if let Err(source) = self.fs.chdir(&self.new_root) {
            self.report.record(
                Step::MoveRoot,
                FsError::Chdir {
                    path: self.new_root.clone(),
                    source,
                },
            );
        }
        if let Err(err) = relocate(self.fs, &self.new_root, Path::new("/")) {
            self.report.record(Step::MoveRoot, err);
        }
        self.map_state(|OldRootCaptured(handle)| RootMoved(handle))
    }
}

impl<'fs, F: FsOps> SwitchRoot<'fs, F, RootMoved<F::Dir>> {
    /// Re-anchors the process root on the moved filesystem.
    pub fn chroot(mut self) -> SwitchRoot<'fs, F, Chrooted<F::Dir>> {
        let here = Path::new(".");
        if let Err(source) = self.fs.chroot(here) {
            self.report.record(
                Step::Chroot,
                FsError::Chroot {
                    path: here.to_path_buf(),
                    source,
                },
            );
        }
        self.map_state(|RootMoved(handle)| Chrooted(handle))
    }
}

impl<'fs, F: FsOps> SwitchRoot<'fs, F, Chrooted<F::Dir>> {
    /// Empties the old root through the captured handle, then closes it.
    pub fn delete_old_root(self) -> SwitchRoot<'fs, F, OldRootDeleted> {
        let mut handle = None;
        let mut next = self.map_state(|Chrooted(captured)| {
            handle = captured;
            OldRootDeleted
        });
        if let Some(old_root) = handle {
            tracing::info!("deleting old root");
            match delete_contents(next.fs, &old_root) {
                Ok(deleted) => next.report.deleted = Some(deleted),
                Err(err) => next.report.record(Step::DeleteOldRoot, err),
            }
        } else {
            tracing::warn!("switch_root: old root was never captured, nothing to delete");
        }
        next
    }
}

impl<F: FsOps> SwitchRoot<'_, F, OldRootDeleted> {
    /// Replaces the process image with init, `argv = [init]`, empty
    /// environment.
    pub fn exec(mut self) -> Handoff {
        tracing::info!(init = %self.init.display(), "executing init");
        match self.fs.exec(&self.init) {
            Ok(()) => Handoff::Replaced(self.report),
            Err(source) => {
                let error = FsError::Exec {
                    path: self.init.clone(),
                    source,
                };
                self.report.record(Step::Exec, error.clone());
                Handoff::Failed {
                    error,
                    report: self.report,
                }
            }
        }
    }
}

impl<'fs, F: FsOps, S> SwitchRoot<'fs, F, S> {
    fn map_state<T>(self, f: impl FnOnce(S) -> T) -> SwitchRoot<'fs, F, T> {
        SwitchRoot {
            fs: self.fs,
            new_root: self.new_root,
            init: self.init,
            live_mounts: self.live_mounts,
            report: self.report,
            state: f(self.state),
        }
    }

    /// Failures recorded so far.
    #[must_use]
    pub const fn report(&self) -> &TransitionReport {
        &self.report
    }
}
