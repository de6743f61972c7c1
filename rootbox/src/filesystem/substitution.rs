use crate::errors::*;
use crate::filesystem::binding::Side;
use crate::filesystem::FileSystem;
use std::path::{Path, PathBuf};

pub trait Substitutor {
    fn substitute(&self, path: &Path, from_side: Side) -> Result<PathBuf>;
}

impl Substitutor for FileSystem {
    /// Finds a suitable binding for the given path and changes its prefix
    /// from one side to the other.
    ///
    /// * `path` is the path that will be modified. Must be canonicalized.
    /// * `from_side` is the side `path` belongs to.
    #[inline]
    fn substitute(&self, path: &Path, from_side: Side) -> Result<PathBuf> {
        let binding = match self.get_first_appropriate_binding(path, from_side) {
            Some(binding) => binding,
            None => {
                return Err(Error::errno_with_msg(
                    ENOENT,
                    format!("No binding found for path: {:?}", path),
                ))
            }
        };

        // Is it a "symmetric" binding?
        if !binding.needs_substitution() {
            return Ok(path.to_path_buf());
        }

        binding.substitute_path_prefix(path, from_side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::filesystem::binding::Binding;
    use crate::filesystem::binding::Side::{Guest, Host};
    use crate::filesystem::FileSystem;
    use crate::utils::tests::get_test_rootfs_path;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_substitute_binding_root_and_asymmetric() {
        let rootfs_path = get_test_rootfs_path();
        let mut fs = FileSystem::with_root(&rootfs_path).unwrap();

        // "/etc" on the host, "/media" on the guest
        fs.insort_binding(Binding::new("/etc", "/media"));

        assert_eq!(
            fs.substitute(&Path::new("/etc/folder/subfolder"), Host),
            Ok(PathBuf::from("/media/folder/subfolder"))
        ); // "/etc" => "/media"

        assert_eq!(
            fs.substitute(&Path::new("/media/folder/subfolder"), Host,),
            Err(Error::errno(ENOENT))
        ); // the path isn't translatable to the guest fs

        assert_eq!(
            fs.substitute(&Path::new("/etc/folder/subfolder"), Guest),
            Ok(rootfs_path.join("etc/folder/subfolder"))
        ); // "/" => "${rootfs}"

        assert_eq!(
            fs.substitute(&Path::new("/media/folder/subfolder"), Guest,),
            Ok(PathBuf::from("/etc/folder/subfolder"))
        ); // "/media" => "/etc"
    }

    #[test]
    fn test_substitute_binding_symmetric() {
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.insort_binding(Binding::new("/etc/something", "/etc/something"));

        let path = PathBuf::from("/etc/something/subfolder");

        assert_eq!(
            fs.substitute(&path, Guest),
            Ok(path.clone()) // the binding is symmetric
        );

        assert_eq!(
            fs.substitute(&path, Host),
            Ok(path.clone()) // same in the other direction
        );
    }
}
