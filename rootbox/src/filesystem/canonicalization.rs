use crate::arch::MAXSYMLINKS;
use crate::errors::*;
use crate::filesystem::binding::Side;
use crate::filesystem::ext::PathExt;
use crate::filesystem::proc::{self, ProcAction};
use crate::filesystem::substitution::Substitutor;
use crate::filesystem::translation::Translator;
use crate::filesystem::FileSystem;
use std::path::{Component, Path, PathBuf};

pub trait Canonicalizer {
    fn canonicalize(&self, path: &Path, deref_final: bool) -> Result<PathBuf>;
    fn canonicalize_at_depth(
        &self,
        path: &Path,
        deref_final: bool,
        depth: usize,
    ) -> Result<PathBuf>;
}

impl Canonicalizer for FileSystem {
    /// Canonicalizes `user_path` relative to the guest root (see `man 3
    /// realpath`).
    ///
    /// It removes "." and "..", dereferences symlinks (including the final
    /// one when `deref_final` is true or the path carries a trailing
    /// slash), and checks that every intermediate component exists on the
    /// host side. The result is a canonical path on the `Guest` side.
    fn canonicalize(&self, user_path: &Path, deref_final: bool) -> Result<PathBuf> {
        self.canonicalize_at_depth(user_path, deref_final, 0)
    }

    fn canonicalize_at_depth(
        &self,
        user_path: &Path,
        deref_final: bool,
        depth: usize,
    ) -> Result<PathBuf> {
        if user_path.is_relative() {
            return Err(Error::errno_with_msg(
                Errno::EINVAL,
                format!("Cannot canonicalize a relative path: {:?}", user_path),
            ));
        }

        // One recursion per symlink: bail out when a chain is too deep.
        if depth > MAXSYMLINKS {
            return Err(Error::errno_with_msg(
                Errno::ELOOP,
                format!("Too many symlinks when canonicalizing {:?}", user_path),
            ));
        }

        // A trailing slash forces the kernel to dereference the final
        // component, so we have to as well.
        let deref_final = deref_final || user_path.with_trailing_slash();

        let mut guest_path = PathBuf::new();

        // We need the `next` component to know whether the current one is
        // the last.
        let mut it = user_path.components();
        let mut next_comp = it.next();
        while let Some(component) = next_comp {
            next_comp = it.next();
            let is_last_component = next_comp.is_none();

            match component {
                Component::RootDir => {
                    guest_path.push(Component::RootDir);
                    continue;
                }
                Component::CurDir | Component::Prefix(_) => {
                    // Component::Prefix does not occur on Unix
                    continue;
                }
                Component::ParentDir => {
                    // ".." never pops past "/"
                    guest_path.pop();
                    continue;
                }
                Component::Normal(path_part) => {
                    // Some "/proc" entries must be resolved against tracee
                    // state rather than the host filesystem.
                    if let Some(pid) = self.get_current_pid() {
                        match proc::readlink_proc(pid, &guest_path, path_part)? {
                            ProcAction::Canonicalize(target) => {
                                let mut new_user_path = target;
                                if let Some(comp) = next_comp {
                                    new_user_path.push(comp);
                                }
                                it.for_each(|comp| new_user_path.push(comp));
                                return self.canonicalize_at_depth(
                                    &new_user_path,
                                    deref_final,
                                    depth + 1,
                                );
                            }
                            ProcAction::DontCanonicalize => {
                                // Typically "/proc/<pid>/fd/...": they may
                                // point to anonymous pipes or sockets, so
                                // they are kept syntactic.
                                guest_path.push(path_part);
                                continue;
                            }
                            ProcAction::Default => {}
                        }
                    }

                    guest_path.push(path_part);

                    let host_path = self.substitute(&guest_path, Side::Guest)?;
                    let file_type = match host_path.symlink_metadata() {
                        Ok(metadata) => metadata.file_type(),
                        // The last component is allowed not to exist: the
                        // syscall may be about to create it.
                        Err(_) if is_last_component => continue,
                        Err(_) => {
                            return Err(Error::errno_with_msg(
                                Errno::ENOENT,
                                format!("when canonicalizing {:?}", user_path),
                            ))
                        }
                    };

                    if file_type.is_dir() {
                        continue;
                    }
                    if file_type.is_symlink() {
                        // An explicitly-not-dereferenced final symlink is
                        // kept as is, as required by lstat(2) and friends.
                        if is_last_component && !deref_final {
                            continue;
                        }

                        let link_value = host_path.read_link()?;
                        let mut new_user_path = if link_value.is_absolute() {
                            // The target is given back its guest meaning,
                            // so that links inside a binding stay
                            // consistent.
                            self.detranslate_path(&link_value, Some(&host_path))?
                                .unwrap_or(link_value)
                        } else {
                            let mut base = guest_path.clone();
                            base.pop();
                            base.push(&link_value);
                            base
                        };
                        if let Some(comp) = next_comp {
                            new_user_path.push(comp);
                        }
                        it.for_each(|comp| new_user_path.push(comp));
                        return self.canonicalize_at_depth(&new_user_path, deref_final, depth + 1);
                    }
                    // we cannot walk through a path which is neither a
                    // directory nor a symlink
                    if !is_last_component {
                        return Err(Error::errno_with_msg(
                            Errno::ENOTDIR,
                            "when canonicalizing an intermediate path",
                        ));
                    }
                }
            }
        }

        if guest_path.as_os_str().is_empty() {
            guest_path.push(Component::RootDir);
        }

        Ok(guest_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FileSystem;
    use crate::utils::tests::get_test_rootfs_path;
    use std::path::PathBuf;

    #[test]
    fn test_canonicalize_invalid_path() {
        let fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();
        let path = PathBuf::from("/impossible_path/impossible_subpath/impossible_file");

        assert_eq!(fs.canonicalize(&path, false), Err(Error::errno(ENOENT)));
    }

    #[test]
    fn test_canonicalize_relative_path() {
        let fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        assert_eq!(
            fs.canonicalize(&PathBuf::from("relative/path"), false),
            Err(Error::errno(EINVAL))
        );
    }

    #[test]
    fn test_canonicalize_path_traversal() {
        let fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        // ".." never pops past "/"
        let path = PathBuf::from("/../bin");
        assert_eq!(fs.canonicalize(&path, false), Ok(PathBuf::from("/bin")));
    }

    #[test]
    fn test_canonicalize_normal_path() {
        let fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        assert_eq!(
            fs.canonicalize(&PathBuf::from("/bin/./../bin//sleep"), false)
                .unwrap(),
            PathBuf::from("/bin/sleep")
        );

        assert_eq!(
            fs.canonicalize(&PathBuf::from("/./../../.././../."), false)
                .unwrap(),
            PathBuf::from("/")
        );
    }

    #[test]
    fn test_canonicalize_final_component_may_not_exist() {
        let fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        // mkdir()-style syscalls pass paths whose last component does not
        // exist yet.
        assert_eq!(
            fs.canonicalize(&PathBuf::from("/bin/not_existing_yet"), false)
                .unwrap(),
            PathBuf::from("/bin/not_existing_yet")
        );
    }

    #[test]
    fn test_canonicalize_symlink_not_deref() {
        let rootfs = get_test_rootfs_path();
        let fs = FileSystem::with_root(&rootfs).unwrap();

        // "${rootfs}/lib64" is a symlink to "lib"
        if rootfs.join("lib64").symlink_metadata().map(|metadata| metadata.file_type().is_symlink()).unwrap_or(false) {
            assert_eq!(
                fs.canonicalize(&PathBuf::from("/lib64"), false).unwrap(),
                PathBuf::from("/lib64")
            );
            assert_eq!(
                fs.canonicalize(&PathBuf::from("/lib64"), true).unwrap(),
                PathBuf::from("/lib")
            );
        }
    }

    #[test]
    fn test_canonicalize_symlink_loop_returns_eloop() {
        use crate::filesystem::temp::TempDir;
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new("test_canonicalize_eloop");
        let temp_dir = temp_dir.unwrap();
        let rootfs = temp_dir.get_path();

        // "a" -> "b" -> "a"
        symlink("b", rootfs.join("a")).unwrap();
        symlink("a", rootfs.join("b")).unwrap();

        let fs = FileSystem::with_root(rootfs).unwrap();

        assert_eq!(
            fs.canonicalize(&PathBuf::from("/a"), true),
            Err(Error::errno(ELOOP))
        );
    }

    #[test]
    fn test_canonicalize_idempotent() {
        let fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        let once = fs
            .canonicalize(&PathBuf::from("/bin/./../bin/sleep"), true)
            .unwrap();
        let twice = fs.canonicalize(&once, true).unwrap();

        assert_eq!(once, twice);
    }
}
