use std::path::{Path, PathBuf};
use std::rc::Rc;

use libc::pid_t;
use nix::sys::{self, stat::SFlag};
use nix::unistd::{self, AccessFlags};

use crate::errors::*;
use crate::filesystem::binding::{compare_paths, Binding, PathComparison, Side};
use crate::filesystem::binding::Side::{Guest, Host};
use crate::filesystem::temp::TempDir;

/// Information related to a file-system name-space: the binding lists, the
/// current working directory and the glue rootfs. One `FileSystem` can be
/// shared by several tracees (`CLONE_FS`).
#[derive(Debug)]
pub struct FileSystem {
    /// Bindings as the user specified them, before canonicalization. They
    /// are promoted to the ordered lists by `initialize()`.
    pending_bindings: Vec<Binding>,
    /// Bindings sorted by guest path, deepest first, the root binding last.
    bindings_guest: Vec<Rc<Binding>>,
    /// The same bindings sorted by host path, deepest first.
    bindings_host: Vec<Rc<Binding>>,
    /// Working directory, in the guest view, à la `/proc/self/cwd`.
    cwd: PathBuf,
    /// Guest root (the host side of the binding associated to `/`).
    root: PathBuf,
    /// File type to use for the final component of a glued path; zero means
    /// the glue is disabled.
    glue_type: SFlag,
    /// Temporary rootfs supplying path components missing from the host
    /// view, lazily created.
    glue: Option<TempDir>,
    /// Pid of the tracee currently being serviced, for `/proc/self`
    /// emulation. The tracer is single threaded, so the field is simply
    /// refreshed before each translation.
    current_pid: Option<pid_t>,
}

impl FileSystem {
    pub fn new() -> FileSystem {
        FileSystem {
            pending_bindings: vec![],
            bindings_guest: vec![],
            bindings_host: vec![],
            cwd: PathBuf::from("/"),
            root: PathBuf::from("/"),
            glue_type: SFlag::empty(),
            glue: None,
            current_pid: None,
        }
    }

    pub fn with_root<P: AsRef<Path>>(root: P) -> Result<FileSystem> {
        let mut file_system = FileSystem::new();

        file_system.set_root(root)?;
        Ok(file_system)
    }

    /// Clone this namespace for a child created without `CLONE_FS`: the
    /// child gets its own copy of the binding lists and cwd.
    pub fn fork(&self) -> FileSystem {
        FileSystem {
            pending_bindings: self.pending_bindings.clone(),
            bindings_guest: self.bindings_guest.clone(),
            bindings_host: self.bindings_host.clone(),
            cwd: self.cwd.clone(),
            root: self.root.clone(),
            glue_type: self.glue_type,
            glue: None,
            current_pid: None,
        }
    }

    /// Queues a binding; it only becomes effective once `initialize()` has
    /// canonicalized and sorted it.
    pub fn add_binding<P1, P2>(&mut self, host: P1, guest: P2) -> Result<()>
    where
        P1: Into<PathBuf>,
        P2: Into<PathBuf>,
    {
        let binding = Binding::new(host, guest);
        self.pending_bindings.push(binding);
        Ok(())
    }

    /// Inserts a canonicalized binding into both ordered lists, keeping
    /// deeper paths first so that lookups reduce to "first match wins".
    /// An equal guest path replaces the previous binding and emits a
    /// warning.
    pub fn insort_binding(&mut self, binding: Binding) {
        let binding = Rc::new(binding);

        if let Some(previous) = self
            .bindings_guest
            .iter()
            .find(|iterator| {
                compare_paths(binding.get_path(Guest), iterator.get_path(Guest))
                    == PathComparison::Equal
            })
            .cloned()
        {
            warn!(
                "both {:?} and {:?} are bound to {:?}, only the last binding is active",
                previous.get_path(Host),
                binding.get_path(Host),
                binding.get_path(Guest),
            );
            self.remove_binding(&previous);
        }

        Self::insort_binding_side(&mut self.bindings_guest, binding.clone(), Guest);
        Self::insort_binding_side(&mut self.bindings_host, binding, Host);
    }

    fn remove_binding(&mut self, binding: &Rc<Binding>) {
        self.bindings_guest
            .retain(|iterator| !Rc::ptr_eq(iterator, binding));
        self.bindings_host
            .retain(|iterator| !Rc::ptr_eq(iterator, binding));
    }

    fn insort_binding_side(list: &mut Vec<Rc<Binding>>, binding: Rc<Binding>, side: Side) {
        let binding_path = binding.get_path(side);

        for (index, iterator) in list.iter().enumerate() {
            match compare_paths(binding_path, iterator.get_path(side)) {
                // The new binding is shallower, it sorts after.
                PathComparison::Equal | PathComparison::FirstIsPrefix => continue,
                // The new binding is deeper, it sorts before.
                PathComparison::SecondIsPrefix => {
                    list.insert(index, binding);
                    return;
                }
                PathComparison::NotComparable => continue,
            }
        }

        list.push(binding);
    }

    #[inline]
    /// Checks if the translated `host_path` belongs to the guest rootfs,
    /// that is, if it isn't from a binding.
    pub fn belongs_to_guestfs(&self, host_path: &Path) -> bool {
        host_path.starts_with(&self.root)
    }

    /// Retrieves the first binding matching `path` on `from_side`. Because
    /// the lists keep deeper paths first, the first match is the deepest
    /// one.
    pub fn get_first_appropriate_binding(&self, path: &Path, from_side: Side) -> Option<&Binding> {
        let list = match from_side {
            Guest => &self.bindings_guest,
            Host => &self.bindings_host,
        };

        for binding in list.iter() {
            let binding_path = binding.get_path(from_side);

            if !path.starts_with(binding_path) {
                continue;
            }

            if from_side == Host
                && !self.root.eq(&PathBuf::from("/"))
                && self.belongs_to_guestfs(path)
            {
                // Avoid false positives when a prefix of the rootfs is
                // used as an asymmetric binding, ex.:
                //
                //     -b /usr:/location -r /usr/local/slackware
                //
                continue;
            }

            return Some(binding);
        }

        None
    }

    #[inline]
    /// Checks that `path` exists and is executable.
    pub fn check_path_executable(&self, path: &Path) -> Result<()> {
        unistd::access(path, AccessFlags::F_OK).errno(ENOENT)?;
        unistd::access(path, AccessFlags::X_OK).errno(EACCES)?;
        sys::stat::lstat(path)?;
        Ok(())
    }

    pub fn take_pending_bindings(&mut self) -> Vec<Binding> {
        std::mem::take(&mut self.pending_bindings)
    }

    #[inline]
    pub fn set_cwd(&mut self, cwd: PathBuf) {
        self.cwd = cwd;
    }

    #[inline]
    pub fn get_cwd(&self) -> &Path {
        &self.cwd
    }

    #[inline]
    pub fn set_root<P: AsRef<Path>>(&mut self, root: P) -> Result<()> {
        let raw_root = root.as_ref();
        // The root has to be canonical host-side: it bootstraps every
        // other canonicalization.
        let canonical_root = raw_root
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize root path {:?}", raw_root))?;
        self.root = canonical_root.clone();
        // `-r path` is equivalent to `-b path:/`.
        self.insort_binding(Binding::new(canonical_root, "/"));
        Ok(())
    }

    #[inline]
    pub fn get_root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn get_glue_type(&self) -> &SFlag {
        &self.glue_type
    }

    #[inline]
    pub fn set_glue_type(&mut self, sflag: SFlag) {
        self.glue_type = sflag;
    }

    /// Temporary directory hosting the glue rootfs, created on first use.
    pub fn get_or_create_glue(&mut self) -> Result<&Path> {
        if self.glue.is_none() {
            self.glue = Some(TempDir::new("rootbox-glue")?);
        }
        Ok(self.glue.as_ref().unwrap().get_path())
    }

    #[inline]
    pub fn get_glue_path(&self) -> Option<&Path> {
        self.glue.as_ref().map(|glue| glue.get_path())
    }

    #[inline]
    pub fn set_current_pid(&mut self, pid: pid_t) {
        self.current_pid = Some(pid);
    }

    #[inline]
    pub fn get_current_pid(&self) -> Option<pid_t> {
        self.current_pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tests::get_test_rootfs_path;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_fs_belongs_to_guestfs() {
        // this test does not trigger real file access except for the
        // canonicalization of the root itself.
        let fs = FileSystem::with_root("/etc").unwrap();

        assert_eq!(fs.belongs_to_guestfs(Path::new("/etc")), true);
        assert_eq!(fs.belongs_to_guestfs(Path::new("/etc/acpi/events")), true);
        assert_eq!(fs.belongs_to_guestfs(Path::new("/acpi/events")), false);
        assert_eq!(fs.belongs_to_guestfs(Path::new("/acpi")), false);
    }

    #[test]
    fn test_fs_get_binding() {
        let mut fs = FileSystem::new();

        assert!(fs
            .get_first_appropriate_binding(&PathBuf::from("/home/user"), Guest)
            .is_none()); // no bindings
        assert!(fs
            .get_first_appropriate_binding(&PathBuf::from("/home/user"), Host)
            .is_none()); // no bindings

        // testing root binding
        fs.set_root(get_test_rootfs_path()).unwrap();

        assert_eq!(
            fs.get_first_appropriate_binding(&Path::new("/bin"), Guest)
                .unwrap()
                .get_path(Guest),
            &PathBuf::from("/")
        ); // it's relative to the rootfs from the point of view of the host

        assert!(fs
            .get_first_appropriate_binding(&Path::new("/etc"), Host)
            .is_none()); // "/etc" is outside of the guest fs

        // here, "/etc" on the host corresponds to "/media" in the sandbox.
        fs.insort_binding(Binding::new("/etc", "/media"));

        assert_eq!(
            fs.get_first_appropriate_binding(&Path::new("/media/folder/subfolder"), Guest)
                .unwrap()
                .get_path(Guest),
            &PathBuf::from("/media")
        );

        assert_eq!(
            fs.get_first_appropriate_binding(&Path::new("/etc/folder/subfolder"), Host)
                .unwrap()
                .get_path(Guest),
            &PathBuf::from("/media")
        ); // same on the other side

        assert!(fs
            .get_first_appropriate_binding(&Path::new("/bin"), Host)
            .is_none()); // should correspond to no binding
    }

    #[test]
    fn test_fs_insort_binding_order() {
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.insort_binding(Binding::new("/etc", "/media"));
        fs.insort_binding(Binding::new("/var/log", "/media/log"));
        fs.insort_binding(Binding::new("/tmp", "/tmp"));

        // deepest guest path first, the root binding last
        let guest_paths: Vec<&PathBuf> = fs
            .bindings_guest
            .iter()
            .map(|binding| binding.get_path(Guest))
            .collect();

        assert_eq!(
            guest_paths.last().unwrap(),
            &&PathBuf::from("/")
        );
        let media_pos = guest_paths
            .iter()
            .position(|path| path == &&PathBuf::from("/media"))
            .unwrap();
        let media_log_pos = guest_paths
            .iter()
            .position(|path| path == &&PathBuf::from("/media/log"))
            .unwrap();
        assert!(media_log_pos < media_pos);

        // no adjacent pair where the former is a prefix of the latter
        for pair in guest_paths.windows(2) {
            assert_ne!(
                compare_paths(pair[0], pair[1]),
                PathComparison::FirstIsPrefix
            );
        }
    }

    #[test]
    fn test_fs_insort_binding_duplicate_replaces() {
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.insort_binding(Binding::new("/etc", "/media"));
        fs.insort_binding(Binding::new("/var", "/media"));

        let binding = fs
            .get_first_appropriate_binding(&Path::new("/media"), Guest)
            .unwrap();
        assert_eq!(binding.get_path(Host), &PathBuf::from("/var"));

        // the replaced binding is gone from both lists
        assert!(fs
            .get_first_appropriate_binding(&Path::new("/etc/passwd"), Host)
            .is_none());
    }

    #[test]
    fn test_fs_is_path_executable() {
        let fs = FileSystem::with_root("/").unwrap();

        assert!(fs.check_path_executable(&PathBuf::from("/bin/sleep")).is_ok());
        assert!(fs.check_path_executable(&PathBuf::from("/../sleep")).is_err());
    }
}
