use std::env;
use std::path::{Component, Path, PathBuf};

use nix::sys::stat::SFlag;
use nix::unistd::getcwd;

use crate::errors::*;
use crate::filesystem::binding::{Binding, Side};
use crate::filesystem::glue;
use crate::filesystem::{Canonicalizer, FileSystem, Substitutor};

pub trait Initialiser {
    fn initialize(&mut self) -> Result<()>;
    fn initialize_bindings(&mut self) -> Result<()>;
    fn initialize_cwd(&mut self) -> Result<()>;
}

impl Initialiser for FileSystem {
    /// Promotes the pending bindings and settles the working directory.
    /// Must be called once, before the first tracee starts.
    fn initialize(&mut self) -> Result<()> {
        self.initialize_bindings()?;
        self.initialize_cwd()?;
        Ok(())
    }

    fn initialize_bindings(&mut self) -> Result<()> {
        let ignore_missing = env::var_os("PROOT_IGNORE_MISSING_BINDINGS").is_some();

        for binding in self.take_pending_bindings() {
            let raw_host_path = binding.get_path(Side::Host);

            // The host side has to exist, and is canonicalized host-side.
            let host_path = match raw_host_path.canonicalize() {
                Ok(path) => path,
                Err(_) => {
                    if !ignore_missing {
                        warn!("can't sanitize binding {:?}: no such file or directory", raw_host_path);
                    }
                    continue;
                }
            };

            let raw_guest_path = binding.get_path(Side::Guest);
            let guest_path = match raw_guest_path.is_absolute() {
                true => raw_guest_path.clone(),
                // A relative guest path is relative to the initial cwd.
                false => self.get_cwd().join(raw_guest_path),
            };

            // The sentinel type of a glued leaf matches the host side.
            let final_type = match host_path.metadata() {
                Ok(metadata) if metadata.file_type().is_dir() => SFlag::S_IFDIR,
                _ => SFlag::S_IFREG,
            };
            self.set_glue_type(final_type);

            // Materialize whatever part of the guest path is missing
            // host-side, so that canonicalization can walk through it.
            if let Err(error) = self.glue_missing_components(&guest_path) {
                warn!(
                    "can't create the guest path {:?} for binding {:?}: {}",
                    guest_path, host_path, error
                );
                continue;
            }

            let canonical_guest_path = match self.canonicalize(&guest_path, true) {
                Ok(path) => path,
                Err(error) => {
                    warn!("can't canonicalize binding path {:?}: {}", guest_path, error);
                    continue;
                }
            };

            info!("binding: {:?} -> {:?}", canonical_guest_path, host_path);
            self.insort_binding(Binding::new(host_path, canonical_guest_path));
        }

        self.set_glue_type(SFlag::empty());
        Ok(())
    }

    #[inline]
    fn initialize_cwd(&mut self) -> Result<()> {
        // Prepare the base in case cwd is relative.
        let mut raw_cwd = match self.get_cwd().is_relative() {
            true => getcwd()?,
            false => PathBuf::new(),
        };

        raw_cwd.push(self.get_cwd());
        // Ensure canonicalize() will report an error if raw_cwd doesn't
        // exist or isn't a directory.
        raw_cwd.push(Component::CurDir);

        let cwd = match self.canonicalize(&raw_cwd, true) {
            Ok(path) => path,
            Err(error) => {
                warn!(
                    "can't chdir ({:?}) in the guest rootfs: {}, default working directory is now \"/\"",
                    raw_cwd.display(),
                    error
                );
                PathBuf::from("/")
            }
        };

        // Replace with the canonicalized working directory.
        self.set_cwd(cwd);
        Ok(())
    }
}

impl FileSystem {
    /// Walks the prefixes of `guest_path` and builds glue for every
    /// component that does not exist host-side.
    fn glue_missing_components(&mut self, guest_path: &Path) -> Result<()> {
        if *self.get_glue_type() == SFlag::empty() {
            return Ok(());
        }

        let mut prefix = PathBuf::new();
        let mut components = guest_path.components().peekable();
        while let Some(component) = components.next() {
            let is_final = components.peek().is_none();

            match component {
                Component::RootDir => {
                    prefix.push(Component::RootDir);
                    continue;
                }
                Component::Normal(part) => {
                    prefix.push(part);
                }
                _ => continue,
            }

            let host_path = match self.substitute(&prefix, Side::Guest) {
                Ok(path) => path,
                Err(error) => return Err(error),
            };
            if host_path.symlink_metadata().is_ok() {
                continue;
            }

            glue::build_glue(self, &prefix, &host_path, is_final)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FileSystem;
    use crate::utils::tests::get_test_rootfs_path;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_initialisation_cwd_invalid_should_default_to_root() {
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.set_cwd(PathBuf::from("/my/impossible/cwd"));

        assert_eq!(Ok(()), fs.initialize_cwd());

        // the cwd we set does not exist, so it must have defaulted to "/"
        assert_eq!(&PathBuf::from("/"), fs.get_cwd());
    }

    #[test]
    fn test_initialisation_cwd_absolute() {
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.set_cwd(PathBuf::from("/bin"));

        assert_eq!(Ok(()), fs.initialize_cwd());

        // ${rootfs}/bin exists, so the cwd keeps its value
        assert_eq!(&PathBuf::from("/bin"), fs.get_cwd());
    }

    #[test]
    fn test_initialisation_cwd_relative() {
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.set_cwd(PathBuf::from("./.."));

        // a relative cwd resolves against the host cwd, which lives outside
        // the rootfs: it must be reset to "/"
        assert_eq!(Ok(()), fs.initialize_cwd());

        assert_eq!(Path::new("/"), fs.get_cwd());
    }

    #[test]
    fn test_initialize_binding_missing_host_is_skipped() {
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.add_binding("/impossible/host/path", "/media").unwrap();
        fs.initialize_bindings().unwrap();

        assert!(fs
            .get_first_appropriate_binding(&PathBuf::from("/media"), Side::Guest)
            .map(|binding| binding.get_path(Side::Guest) != &PathBuf::from("/media"))
            .unwrap_or(true));
    }
}
