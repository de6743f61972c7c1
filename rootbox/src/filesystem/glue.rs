//! Construction of the "glue" between the host part and the guest part of a
//! binding whose guest-side prefix does not exist on the host.
//!
//! For example, assuming the host path "/opt" is bound to the guest path
//! "/black/holes/and/revelations", and assuming this path can't be created
//! in the guest rootfs (eg. permission denied), then it is created in a
//! temporary rootfs and all these paths are glued that way:
//!
//!   $GUEST/black/ --> $GLUE/black/
//!                               ./holes
//!                               ./holes/and
//!                               ./holes/and/revelations --> $HOST/opt/
//!
//! This glue allows operations on paths that do not exist in the guest
//! rootfs but that were specified as the guest part of a binding.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use nix::sys::stat::{self, Mode, SFlag};
use nix::unistd;

use crate::errors::*;
use crate::filesystem::binding::{Binding, Side};
use crate::filesystem::{FileSystem, Substitutor};

lazy_static! {
    /// Placeholders written into the real guest rootfs, to be removed when
    /// the tracer terminates.
    static ref PLACEHOLDERS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
}

fn set_placeholder_destructor(path: &Path) {
    PLACEHOLDERS.lock().unwrap().push(path.to_path_buf());
}

/// Removes the placeholders left in the guest rootfs, but only if they are
/// still empty.
pub fn remove_placeholders() {
    let mut placeholders = PLACEHOLDERS.lock().unwrap();
    // Reverse order, so that a placeholder directory is emptied of its
    // placeholder children first.
    for path in placeholders.drain(..).rev() {
        let metadata = match path.symlink_metadata() {
            Ok(metadata) => metadata,
            Err(_) => continue, // not fatal
        };

        if metadata.file_type().is_dir() {
            let _ = std::fs::remove_dir(&path);
        } else if metadata.len() == 0 {
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Builds the glue for one missing component of `guest_path`, whose
/// candidate host location is `host_path`. Returns the type of the created
/// component.
pub fn build_glue(
    fs: &mut FileSystem,
    guest_path: &Path,
    host_path: &Path,
    is_final: bool,
) -> Result<SFlag> {
    let glue_type = *fs.get_glue_type();
    assert!(glue_type != SFlag::empty());

    let glue_root = fs.get_or_create_glue()?.to_path_buf();

    let belongs_to_gluefs = host_path.starts_with(&glue_root);

    /* If it's not a final component then it is a directory. The type of
     * the final component was decided when the binding was initialized,
     * sadly there's no way to know it at this stage. */
    let (file_type, mode) = if is_final {
        (
            glue_type,
            if belongs_to_gluefs {
                Mode::from_bits_truncate(0o777)
            } else {
                Mode::empty()
            },
        )
    } else {
        (SFlag::S_IFDIR, Mode::from_bits_truncate(0o777))
    };

    let pollute_rootfs =
        env::var_os("PROOT_DONT_POLLUTE_ROOTFS").is_none() || belongs_to_gluefs;

    if pollute_rootfs {
        // Try to create this component into the "guest" or "glue" rootfs
        // (depending on whether there was a glue previously).
        let status = if file_type == SFlag::S_IFDIR {
            unistd::mkdir(host_path, mode).map_err(Error::from)
        } else {
            // S_IFREG, S_IFCHR, S_IFBLK, S_IFIFO or S_IFSOCK
            stat::mknod(host_path, file_type, mode, 0).map_err(Error::from)
        };

        match status {
            Ok(()) => {
                // Remove placeholders from the guest rootfs once the
                // tracer has terminated.
                if !belongs_to_gluefs {
                    set_placeholder_destructor(host_path);
                }
                return Ok(file_type);
            }
            Err(ref error) if error.get_errno() == EEXIST => return Ok(file_type),
            Err(error) => {
                if belongs_to_gluefs {
                    // mkdir/mknod are supposed to always succeed in the
                    // glue rootfs.
                    warn!("glue mkdir/mknod failed: {}", error);
                    return Err(error);
                }
                if is_final {
                    // The final component is pointed to by the binding
                    // being initialized, nothing else to do.
                    return Ok(file_type);
                }
            }
        }
    }

    // From the example above, create the binding "/black" -> "$GLUE/black".
    let induced = Binding::new(&glue_root, guest_path);
    fs.insort_binding(induced);

    // The component now lives in the glue, create it there.
    let host_in_glue = fs.substitute(guest_path, Side::Guest)?;
    if host_in_glue != glue_root {
        let status = if file_type == SFlag::S_IFDIR {
            unistd::mkdir(&host_in_glue, Mode::from_bits_truncate(0o777)).map_err(Error::from)
        } else {
            stat::mknod(
                &host_in_glue,
                file_type,
                Mode::from_bits_truncate(0o777),
                0,
            )
            .map_err(Error::from)
        };
        match status {
            Ok(()) => {}
            Err(ref error) if error.get_errno() == EEXIST => {}
            Err(error) => return Err(error),
        }
    }

    Ok(file_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::temp::TempDir;
    use crate::filesystem::{Canonicalizer, Initialiser, Translator};
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_glue_binding_with_missing_guest_prefix() {
        let rootfs_dir = TempDir::new("test_glue_rootfs").unwrap();
        let host_dir = TempDir::new("test_glue_host").unwrap();
        fs::File::create(host_dir.get_path().join("data")).unwrap();

        let mut fs = FileSystem::with_root(rootfs_dir.get_path()).unwrap();
        // "/black/holes/and/revelations" does not exist in the rootfs
        fs.add_binding(host_dir.get_path(), "/black/holes/and/revelations")
            .unwrap();

        fs.initialize().unwrap();

        // the glued guest path resolves to the bound host path
        let host_path = fs
            .translate_path("/black/holes/and/revelations/data", true)
            .unwrap();
        assert_eq!(host_path, host_dir.get_path().join("data"));

        // the intermediate components are walkable
        assert_eq!(
            fs.canonicalize(&PathBuf::from("/black/holes"), true).unwrap(),
            PathBuf::from("/black/holes")
        );
    }

    #[test]
    fn test_glue_placeholders_are_removed() {
        let dir = TempDir::new("test_glue_placeholders").unwrap();
        let placeholder = dir.get_path().join("placeholder");
        fs::create_dir(&placeholder).unwrap();

        set_placeholder_destructor(&placeholder);
        remove_placeholders();

        assert!(!placeholder.exists());
    }
}
