//! Kernel-backed [`FsOps`].
//!
//! Every call goes through `nix`. Directory handles are [`OwnedFd`]s opened
//! with `O_DIRECTORY | O_CLOEXEC` and closed on drop.

use std::ffi::{CStr, CString, OsStr, OsString};
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::Result;
use nix::dir::Dir;
use nix::errno::Errno;
use nix::fcntl::{OFlag, open, openat};
use nix::mount::{MsFlags, mount};
use nix::sys::stat::{Mode, fstat};
use nix::unistd::{UnlinkatFlags, unlinkat};

use super::mount::MountSpec;
use super::{DeviceId, FsOps};

/// Directory flags for every descriptor the transition opens.
const DIR_FLAGS: OFlag = OFlag::O_RDONLY
    .union(OFlag::O_DIRECTORY)
    .union(OFlag::O_CLOEXEC);

/// [`FsOps`] on the live kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxFs;

impl LinuxFs {
    /// Creates the kernel-backed filesystem capability.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn c_name(name: &OsStr) -> Result<CString> {
    CString::new(name.as_bytes()).map_err(|_| Errno::EINVAL)
}

impl FsOps for LinuxFs {
    type Dir = OwnedFd;

    fn mount(&self, spec: &MountSpec) -> Result<()> {
        let data = spec.data();
        mount(
            Some(spec.source()),
            spec.destination(),
            Some(spec.fstype()),
            spec.flags(),
            Some(data.as_str()),
        )
    }

    fn move_mount(&self, from: &Path, to: &Path) -> Result<()> {
        mount(Some(from), to, None::<&str>, MsFlags::MS_MOVE, None::<&str>)
    }

    fn open_root(&self) -> Result<OwnedFd> {
        open("/", DIR_FLAGS, Mode::empty())
    }

    #[allow(clippy::useless_conversion)]
    fn stat_device(&self, dir: &OwnedFd) -> Result<DeviceId> {
        let st = fstat(dir)?;
        Ok(DeviceId::new(u64::from(st.st_dev)))
    }

    fn read_dir_names(&self, dir: &OwnedFd) -> Result<Vec<OsString>> {
        // A fresh open of "." has its own offset, so `dir` can be listed
        // again later and stays open for the relative calls that follow.
        let stream = Dir::openat(dir, ".", DIR_FLAGS, Mode::empty())?;
        let mut names = Vec::new();
        for entry in stream {
            let entry = entry?;
            let bytes = entry.file_name().to_bytes();
            if bytes != b"." && bytes != b".." {
                names.push(OsStr::from_bytes(bytes).to_os_string());
            }
        }
        Ok(names)
    }

    fn open_dir_no_follow(&self, parent: &OwnedFd, name: &OsStr) -> Result<OwnedFd> {
        openat(
            parent,
            c_name(name)?.as_c_str(),
            DIR_FLAGS | OFlag::O_NOFOLLOW,
            Mode::empty(),
        )
    }

    fn unlink_at(&self, parent: &OwnedFd, name: &OsStr) -> Result<()> {
        unlinkat(parent, c_name(name)?.as_c_str(), UnlinkatFlags::NoRemoveDir)
    }

    fn remove_dir_at(&self, parent: &OwnedFd, name: &OsStr) -> Result<()> {
        unlinkat(parent, c_name(name)?.as_c_str(), UnlinkatFlags::RemoveDir)
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        nix::unistd::chdir(path)
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        nix::unistd::chroot(path)
    }

    fn exec(&self, program: &Path) -> Result<()> {
        let program = c_name(program.as_os_str())?;
        let env: [&CStr; 0] = [];
        match nix::unistd::execve(&program, &[&program], &env) {
            Ok(never) => match never {},
            Err(errno) => Err(errno),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    #[test]
    fn read_dir_names_lists_entries_without_dot_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a"), b"").expect("write");
        std::fs::create_dir(dir.path().join("b")).expect("mkdir");
        let fd = OwnedFd::from(File::open(dir.path()).expect("open"));

        let mut names = LinuxFs.read_dir_names(&fd).expect("read");
        names.sort();

        assert_eq!(names, vec![OsString::from("a"), OsString::from("b")]);
        // The handle is still usable afterwards.
        assert!(LinuxFs.stat_device(&fd).is_ok());
    }

    #[test]
    fn read_dir_names_can_list_the_same_handle_twice() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a"), b"").expect("write");
        std::fs::write(dir.path().join("b"), b"").expect("write");
        let fd = OwnedFd::from(File::open(dir.path()).expect("open"));

        let mut first = LinuxFs.read_dir_names(&fd).expect("first read");
        let mut second = LinuxFs.read_dir_names(&fd).expect("second read");
        first.sort();
        second.sort();

        assert_eq!(first, vec![OsString::from("a"), OsString::from("b")]);
        assert_eq!(second, first);
    }

    #[test]
    fn open_dir_no_follow_rejects_symlink() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("real")).expect("mkdir");
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link"))
            .expect("symlink");
        let fd = OwnedFd::from(File::open(dir.path()).expect("open"));

        assert!(LinuxFs.open_dir_no_follow(&fd, OsStr::new("real")).is_ok());
        assert_eq!(
            LinuxFs
                .open_dir_no_follow(&fd, OsStr::new("link"))
                .unwrap_err(),
            Errno::ENOTDIR
        );
    }

    #[test]
    fn open_dir_no_follow_rejects_regular_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("file"), b"x").expect("write");
        let fd = OwnedFd::from(File::open(dir.path()).expect("open"));

        assert_eq!(
            LinuxFs
                .open_dir_no_follow(&fd, OsStr::new("file"))
                .unwrap_err(),
            Errno::ENOTDIR
        );
    }

    #[test]
    fn same_filesystem_directories_share_a_device() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("child")).expect("mkdir");
        let fd = OwnedFd::from(File::open(dir.path()).expect("open"));
        let child = LinuxFs
            .open_dir_no_follow(&fd, OsStr::new("child"))
            .expect("open child");

        assert_eq!(
            LinuxFs.stat_device(&fd).expect("stat"),
            LinuxFs.stat_device(&child).expect("stat child")
        );
    }

    #[test]
    fn name_with_nul_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fd = OwnedFd::from(File::open(dir.path()).expect("open"));
        assert_eq!(
            LinuxFs
                .unlink_at(&fd, OsStr::from_bytes(b"bad\0name"))
                .unwrap_err(),
            Errno::EINVAL
        );
    }
}
