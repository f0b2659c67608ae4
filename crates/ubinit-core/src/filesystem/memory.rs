//! In-memory filesystem implementing [`FsOps`].
//!
//! Models just enough kernel behaviour to exercise the root transition
//! without touching real mount state: per-directory device numbers, mounts
//! that cover a mount-point directory and uncover it again when moved,
//! symlinks that refuse to open as directories, a process root and working
//! directory, and injectable permission and stat failures.
//!
//! Every directory handle handed out is counted until dropped, and every
//! state-changing call is logged, so tests can check descriptor release and
//! syscall ordering.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use nix::Result;
use nix::errno::Errno;

use super::mount::MountSpec;
use super::{DeviceId, FsOps};

const ROOT_DEVICE: u64 = 1;

/// A syscall recorded by [`MemoryFs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `mount` onto a destination.
    Mount(PathBuf),
    /// `MS_MOVE` from one path to another.
    MoveMount(PathBuf, PathBuf),
    /// The root directory was opened.
    OpenRoot,
    /// Working directory change.
    Chdir(PathBuf),
    /// Root directory change.
    Chroot(PathBuf),
    /// A non-directory entry was unlinked.
    Unlink(OsString),
    /// A directory was removed.
    RemoveDir(OsString),
    /// The process image was replaced.
    Exec(PathBuf),
}

/// Open directory in a [`MemoryFs`]. Dropping it releases the handle.
#[derive(Debug)]
pub struct MemDir {
    node: usize,
    open: Rc<Cell<usize>>,
}

impl Drop for MemDir {
    fn drop(&mut self) {
        self.open.set(self.open.get().saturating_sub(1));
    }
}

#[derive(Debug)]
enum Kind {
    Dir(BTreeMap<OsString, usize>),
    File,
    Symlink,
}

#[derive(Debug)]
struct Node {
    parent: Option<usize>,
    name: OsString,
    kind: Kind,
    dev: u64,
    /// Root of a mounted filesystem.
    is_mount: bool,
    /// Mount-point directory hidden by this mount.
    covered: Option<usize>,
    deny_removal: bool,
    fail_stat: bool,
    fail_read_dir: bool,
}

#[derive(Debug)]
struct State {
    nodes: Vec<Node>,
    root: usize,
    cwd: usize,
    next_dev: u64,
    mounted: Vec<MountSpec>,
    executed: Option<PathBuf>,
    calls: Vec<Call>,
}

/// Single-threaded in-memory filesystem.
#[derive(Debug)]
pub struct MemoryFs {
    state: RefCell<State>,
    open: Rc<Cell<usize>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// Creates a filesystem holding only an empty root directory.
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            name: OsString::from("/"),
            kind: Kind::Dir(BTreeMap::new()),
            dev: ROOT_DEVICE,
            is_mount: true,
            covered: None,
            deny_removal: false,
            fail_stat: false,
            fail_read_dir: false,
        };
        Self {
            state: RefCell::new(State {
                nodes: vec![root],
                root: 0,
                cwd: 0,
                next_dev: ROOT_DEVICE + 1,
                mounted: Vec::new(),
                executed: None,
                calls: Vec::new(),
            }),
            open: Rc::new(Cell::new(0)),
        }
    }

    /// Creates a directory and any missing parents on the parent's device.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let _ = self.state.borrow_mut().mkdir_p(path.as_ref());
    }

    /// Creates a regular file, creating missing parents.
    pub fn add_file(&self, path: impl AsRef<Path>) {
        self.state.borrow_mut().add_leaf(path.as_ref(), Kind::File);
    }

    /// Creates a symlink, creating missing parents.
    pub fn add_symlink(&self, path: impl AsRef<Path>) {
        self.state.borrow_mut().add_leaf(path.as_ref(), Kind::Symlink);
    }

    /// Mounts a fresh, empty filesystem on `path`, creating the mount point.
    pub fn add_mount(&self, path: impl AsRef<Path>) {
        let mut state = self.state.borrow_mut();
        let target = state.mkdir_p(path.as_ref());
        let _ = state.mount_fresh(target);
    }

    /// Makes removal of `path` fail with `EACCES`.
    pub fn deny_removal(&self, path: impl AsRef<Path>) {
        let mut state = self.state.borrow_mut();
        if let Ok(id) = state.resolve(path.as_ref()) {
            state.nodes[id].deny_removal = true;
        }
    }

    /// Makes `fstat` on `path` fail with `EIO`.
    pub fn fail_stat(&self, path: impl AsRef<Path>) {
        let mut state = self.state.borrow_mut();
        if let Ok(id) = state.resolve(path.as_ref()) {
            state.nodes[id].fail_stat = true;
        }
    }

    /// Makes listing the directory at `path` fail with `EIO`.
    pub fn fail_read_dir(&self, path: impl AsRef<Path>) {
        let mut state = self.state.borrow_mut();
        if let Ok(id) = state.resolve(path.as_ref()) {
            state.nodes[id].fail_read_dir = true;
        }
    }

    /// Returns `true` if `path` resolves from the current process root.
    #[must_use]
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.state.borrow().resolve(path.as_ref()).is_ok()
    }

    /// Device of the directory at `path`, resolved from the process root.
    #[must_use]
    pub fn device_of(&self, path: impl AsRef<Path>) -> Option<DeviceId> {
        let state = self.state.borrow();
        state
            .resolve(path.as_ref())
            .ok()
            .map(|id| DeviceId::new(state.nodes[id].dev))
    }

    /// All paths below `dir`, relative to it, sorted.
    #[must_use]
    pub fn list(&self, dir: &MemDir) -> Vec<PathBuf> {
        let state = self.state.borrow();
        let mut out = Vec::new();
        let mut pending = vec![(dir.node, PathBuf::new())];
        while let Some((id, prefix)) = pending.pop() {
            if let Kind::Dir(children) = &state.nodes[id].kind {
                for (name, &child) in children {
                    let path = prefix.join(name);
                    pending.push((child, path.clone()));
                    out.push(path);
                }
            }
        }
        out.sort();
        out
    }

    /// Number of directory handles currently open.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.open.get()
    }

    /// Entries passed to successful `mount` calls.
    #[must_use]
    pub fn mounted(&self) -> Vec<MountSpec> {
        self.state.borrow().mounted.clone()
    }

    /// Program passed to a successful `exec`, if any.
    #[must_use]
    pub fn executed(&self) -> Option<PathBuf> {
        self.state.borrow().executed.clone()
    }

    /// State-changing calls in the order they were made.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    fn handle(&self, node: usize) -> MemDir {
        self.open.set(self.open.get() + 1);
        MemDir {
            node,
            open: Rc::clone(&self.open),
        }
    }
}

impl State {
    fn children(&self, id: usize) -> Option<&BTreeMap<OsString, usize>> {
        match &self.nodes[id].kind {
            Kind::Dir(children) => Some(children),
            Kind::File | Kind::Symlink => None,
        }
    }

    fn children_mut(&mut self, id: usize) -> Option<&mut BTreeMap<OsString, usize>> {
        match &mut self.nodes[id].kind {
            Kind::Dir(children) => Some(children),
            Kind::File | Kind::Symlink => None,
        }
    }

    fn is_dir(&self, id: usize) -> bool {
        matches!(self.nodes[id].kind, Kind::Dir(_))
    }

    fn resolve(&self, path: &Path) -> Result<usize> {
        let mut cur = if path.is_absolute() { self.root } else { self.cwd };
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    if cur != self.root {
                        cur = self.nodes[cur].parent.unwrap_or(cur);
                    }
                }
                Component::Normal(name) => {
                    let children = self.children(cur).ok_or(Errno::ENOTDIR)?;
                    cur = *children.get(name).ok_or(Errno::ENOENT)?;
                }
            }
        }
        Ok(cur)
    }

    fn lookup(&self, parent: usize, name: &OsStr) -> Result<usize> {
        let children = self.children(parent).ok_or(Errno::ENOTDIR)?;
        children.get(name).copied().ok_or(Errno::ENOENT)
    }

    fn insert_node(&mut self, parent: usize, name: &OsStr, kind: Kind, dev: u64) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            name: name.to_os_string(),
            kind,
            dev,
            is_mount: false,
            covered: None,
            deny_removal: false,
            fail_stat: false,
            fail_read_dir: false,
        });
        if let Some(children) = self.children_mut(parent) {
            let _ = children.insert(name.to_os_string(), id);
        }
        id
    }

    fn mkdir_p(&mut self, path: &Path) -> usize {
        let mut cur = self.root;
        for component in path.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let existing = self.children(cur).and_then(|c| c.get(name).copied());
            cur = match existing {
                Some(id) => {
                    if !self.is_dir(id) {
                        self.nodes[id].kind = Kind::Dir(BTreeMap::new());
                    }
                    id
                }
                None => {
                    let dev = self.nodes[cur].dev;
                    self.insert_node(cur, name, Kind::Dir(BTreeMap::new()), dev)
                }
            };
        }
        cur
    }

    fn add_leaf(&mut self, path: &Path, kind: Kind) {
        let Some(name) = path.file_name() else {
            return;
        };
        let parent = path.parent().map_or(self.root, |p| self.mkdir_p(p));
        let dev = self.nodes[parent].dev;
        let _ = self.insert_node(parent, name, kind, dev);
    }

    /// Mounts a new empty filesystem over `target`.
    fn mount_fresh(&mut self, target: usize) -> usize {
        let dev = self.next_dev;
        self.next_dev += 1;
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: None,
            name: OsString::new(),
            kind: Kind::Dir(BTreeMap::new()),
            dev,
            is_mount: true,
            covered: None,
            deny_removal: false,
            fail_stat: false,
            fail_read_dir: false,
        });
        self.cover(target, id);
        id
    }

    /// Places `mount` over the directory `target`, hiding it.
    fn cover(&mut self, target: usize, mount: usize) {
        let parent = self.nodes[target].parent;
        let name = self.nodes[target].name.clone();
        self.nodes[mount].covered = Some(target);
        self.nodes[mount].parent = parent;
        self.nodes[mount].name = name.clone();
        if let Some(children) = parent.and_then(|p| self.children_mut(p)) {
            let _ = children.insert(name, mount);
        }
    }

    /// Takes `mount` off its mount point, revealing what it covered.
    fn detach(&mut self, mount: usize) {
        let Some(parent) = self.nodes[mount].parent.take() else {
            return;
        };
        let name = self.nodes[mount].name.clone();
        let covered = self.nodes[mount].covered.take();
        if let Some(children) = self.children_mut(parent) {
            let _ = match covered {
                Some(hidden) => children.insert(name, hidden),
                None => children.remove(&name),
            };
        }
    }

    fn is_within(&self, node: usize, ancestor: usize) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.nodes[id].parent;
        }
        false
    }
}

impl FsOps for MemoryFs {
    type Dir = MemDir;

    fn mount(&self, spec: &MountSpec) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let target = state.resolve(spec.destination())?;
        if !state.is_dir(target) {
            return Err(Errno::ENOTDIR);
        }
        let _ = state.mount_fresh(target);
        state.mounted.push(spec.clone());
        state.calls.push(Call::Mount(spec.destination().to_path_buf()));
        Ok(())
    }

    fn move_mount(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let source = state.resolve(from)?;
        let target = state.resolve(to)?;
        if !state.nodes[source].is_mount || state.nodes[source].parent.is_none() {
            return Err(Errno::EINVAL);
        }
        if !state.is_dir(target) {
            return Err(Errno::ENOTDIR);
        }
        if state.is_within(target, source) {
            return Err(Errno::EINVAL);
        }
        state.detach(source);
        // Stacked on the process root, it is only reachable through a
        // working directory or handle that already points into it.
        if target != state.root {
            state.cover(target, source);
        }
        state
            .calls
            .push(Call::MoveMount(from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    fn open_root(&self) -> Result<MemDir> {
        let root = {
            let mut state = self.state.borrow_mut();
            state.calls.push(Call::OpenRoot);
            state.root
        };
        Ok(self.handle(root))
    }

    fn stat_device(&self, dir: &MemDir) -> Result<DeviceId> {
        let state = self.state.borrow();
        let node = &state.nodes[dir.node];
        if node.fail_stat {
            return Err(Errno::EIO);
        }
        Ok(DeviceId::new(node.dev))
    }

    fn read_dir_names(&self, dir: &MemDir) -> Result<Vec<OsString>> {
        let state = self.state.borrow();
        if state.nodes[dir.node].fail_read_dir {
            return Err(Errno::EIO);
        }
        let children = state.children(dir.node).ok_or(Errno::ENOTDIR)?;
        Ok(children.keys().cloned().collect())
    }

    fn open_dir_no_follow(&self, parent: &MemDir, name: &OsStr) -> Result<MemDir> {
        let child = {
            let state = self.state.borrow();
            let child = state.lookup(parent.node, name)?;
            match state.nodes[child].kind {
                Kind::Dir(_) => child,
                Kind::File | Kind::Symlink => return Err(Errno::ENOTDIR),
            }
        };
        Ok(self.handle(child))
    }

    fn unlink_at(&self, parent: &MemDir, name: &OsStr) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let child = state.lookup(parent.node, name)?;
        if state.is_dir(child) {
            return Err(Errno::EISDIR);
        }
        if state.nodes[child].deny_removal {
            return Err(Errno::EACCES);
        }
        if let Some(children) = state.children_mut(parent.node) {
            let _ = children.remove(name);
        }
        state.calls.push(Call::Unlink(name.to_os_string()));
        Ok(())
    }

    fn remove_dir_at(&self, parent: &MemDir, name: &OsStr) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let child = state.lookup(parent.node, name)?;
        let empty = state
            .children(child)
            .ok_or(Errno::ENOTDIR)?
            .is_empty();
        if state.nodes[child].is_mount {
            return Err(Errno::EBUSY);
        }
        if !empty {
            return Err(Errno::ENOTEMPTY);
        }
        if state.nodes[child].deny_removal {
            return Err(Errno::EACCES);
        }
        if let Some(children) = state.children_mut(parent.node) {
            let _ = children.remove(name);
        }
        state.calls.push(Call::RemoveDir(name.to_os_string()));
        Ok(())
    }

    fn chdir(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let dir = state.resolve(path)?;
        if !state.is_dir(dir) {
            return Err(Errno::ENOTDIR);
        }
        state.cwd = dir;
        state.calls.push(Call::Chdir(path.to_path_buf()));
        Ok(())
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let dir = state.resolve(path)?;
        if !state.is_dir(dir) {
            return Err(Errno::ENOTDIR);
        }
        state.root = dir;
        state.calls.push(Call::Chroot(path.to_path_buf()));
        Ok(())
    }

    fn exec(&self, program: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let node = state.resolve(program)?;
        if !matches!(state.nodes[node].kind, Kind::File) {
            return Err(Errno::EACCES);
        }
        state.executed = Some(program.to_path_buf());
        state.calls.push(Call::Exec(program.to_path_buf()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_filesystem_has_empty_root() {
        let fs = MemoryFs::new();
        let root = fs.open_root().expect("root");
        assert!(fs.list(&root).is_empty());
        assert_eq!(fs.open_handles(), 1);
        drop(root);
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn mount_gets_its_own_device() {
        let fs = MemoryFs::new();
        fs.add_dir("/plain");
        fs.add_mount("/mnt");
        assert_eq!(fs.device_of("/plain"), fs.device_of("/"));
        assert_ne!(fs.device_of("/mnt"), fs.device_of("/"));
    }

    #[test]
    fn moved_mount_uncovers_its_mount_point() {
        let fs = MemoryFs::new();
        fs.add_file("/dev-underneath");
        fs.add_mount("/dev");
        fs.add_file("/dev/null");
        fs.add_dir("/target");

        fs.move_mount(Path::new("/dev"), Path::new("/target")).expect("move");

        assert!(fs.exists("/target/null"));
        assert!(fs.exists("/dev"));
        assert!(!fs.exists("/dev/null"));
        assert_eq!(fs.device_of("/dev"), fs.device_of("/"));
    }

    #[test]
    fn move_of_plain_directory_is_rejected() {
        let fs = MemoryFs::new();
        fs.add_dir("/plain");
        fs.add_dir("/target");
        let err = fs
            .move_mount(Path::new("/plain"), Path::new("/target"))
            .unwrap_err();
        assert_eq!(err, Errno::EINVAL);
    }

    #[test]
    fn open_dir_refuses_symlinks_and_files() {
        let fs = MemoryFs::new();
        fs.add_symlink("/link");
        fs.add_file("/file");
        let root = fs.open_root().expect("root");
        assert_eq!(
            fs.open_dir_no_follow(&root, OsStr::new("link")).unwrap_err(),
            Errno::ENOTDIR
        );
        assert_eq!(
            fs.open_dir_no_follow(&root, OsStr::new("file")).unwrap_err(),
            Errno::ENOTDIR
        );
        assert_eq!(fs.open_handles(), 1);
    }

    #[test]
    fn chroot_reanchors_absolute_paths() {
        let fs = MemoryFs::new();
        fs.add_file("/jail/inside");
        fs.chroot(Path::new("/jail")).expect("chroot");
        assert!(fs.exists("/inside"));
        assert!(!fs.exists("/jail"));
        assert!(fs.exists("/../inside"), "cannot climb above the root");
    }

    #[test]
    fn exec_requires_a_file() {
        let fs = MemoryFs::new();
        fs.add_dir("/sbin");
        assert_eq!(fs.exec(Path::new("/sbin")).unwrap_err(), Errno::EACCES);
        assert_eq!(fs.exec(Path::new("/sbin/init")).unwrap_err(), Errno::ENOENT);
        fs.add_file("/sbin/init");
        fs.exec(Path::new("/sbin/init")).expect("exec");
        assert_eq!(fs.executed(), Some(PathBuf::from("/sbin/init")));
    }
}
