use crate::errors::*;
use crate::filesystem::binding::Side::{Guest, Host};
use crate::filesystem::canonicalization::Canonicalizer;
use crate::filesystem::proc;
use crate::filesystem::substitution::Substitutor;
use crate::filesystem::FileSystem;
use std::path::{Path, PathBuf};

pub trait Translator {
    fn translate_path<P: AsRef<Path>>(&self, guest_path: P, deref_final: bool) -> Result<PathBuf>;
    fn translate_absolute_path<P: AsRef<Path>>(
        &self,
        guest_path: P,
        deref_final: bool,
    ) -> Result<PathBuf>;
    fn translate_guest_path<P: AsRef<Path>>(&self, guest_path: P, deref_final: bool)
        -> Result<PathBuf>;
    fn detranslate_path<P: AsRef<Path>>(
        &self,
        host_path: P,
        referrer: Option<&Path>,
    ) -> Result<Option<PathBuf>>;
}

impl Translator for FileSystem {
    /// Translates a path from `guest` to `host`. A relative guest path is
    /// interpreted against the current working directory.
    fn translate_path<P: AsRef<Path>>(&self, guest_path: P, deref_final: bool) -> Result<PathBuf> {
        if guest_path.as_ref().is_relative() {
            let mut absolute_guest_path = PathBuf::from(self.get_cwd());
            absolute_guest_path.push(guest_path);
            self.translate_absolute_path(&absolute_guest_path, deref_final)
        } else {
            self.translate_absolute_path(guest_path, deref_final)
        }
    }

    /// Translates a path from `guest` to `host`. Only an absolute guest
    /// path is accepted.
    fn translate_absolute_path<P: AsRef<Path>>(
        &self,
        guest_path: P,
        deref_final: bool,
    ) -> Result<PathBuf> {
        let canonical_guest_path = self.canonicalize(guest_path.as_ref(), deref_final)?;
        let host_path = self.substitute(&canonical_guest_path, Guest)?;
        Ok(host_path)
    }

    /// Same as `translate_path`, but returns the canonical guest path
    /// instead of the host one.
    fn translate_guest_path<P: AsRef<Path>>(
        &self,
        guest_path: P,
        deref_final: bool,
    ) -> Result<PathBuf> {
        if guest_path.as_ref().is_relative() {
            let mut absolute_guest_path = PathBuf::from(self.get_cwd());
            absolute_guest_path.push(guest_path);
            self.canonicalize(&absolute_guest_path, deref_final)
        } else {
            self.canonicalize(guest_path.as_ref(), deref_final)
        }
    }

    /// Translates a path from `host` to `guest`, removing/substituting the
    /// leading part of a "translated" path.
    ///
    /// `referrer`, when given, is the (host) path of the symlink whose
    /// target is being detranslated; links that belong to a binding and
    /// point inside the same binding keep their binding-relative meaning.
    ///
    /// Returns
    /// * `Ok(None)` if no translation is required (ie. symmetric binding).
    /// * `Ok(Some(path))` if the path was translated.
    /// * An error otherwise.
    fn detranslate_path<P: AsRef<Path>>(
        &self,
        host_path: P,
        referrer: Option<&Path>,
    ) -> Result<Option<PathBuf>> {
        let host_path = host_path.as_ref();
        // Don't try to detranslate relative paths (typically the target of
        // a relative symbolic link).
        if host_path.is_relative() {
            return Ok(None);
        }

        let mut follow_binding = true;

        // Is it a symlink target?
        if let Some(referrer_path) = referrer {
            follow_binding = false;

            if referrer_path.starts_with("/proc") {
                // Some links in "/proc" are generated dynamically by the
                // kernel and have to be emulated.
                if let Some(pid) = self.get_current_pid() {
                    if let Some(emulated) = proc::readlink_proc2(pid, referrer_path)? {
                        return Ok(Some(emulated));
                    }
                }
            } else if !self.belongs_to_guestfs(referrer_path) {
                let maybe_binding_referree = self.get_first_appropriate_binding(host_path, Host);
                let maybe_binding_referrer =
                    self.get_first_appropriate_binding(referrer_path, Host);

                // Resolve bindings for symlinks that belong to a binding
                // and point to the same binding. For example, if
                // "-b /lib:/foo" is specified and the symlink
                // "/lib/a -> /lib/b" exists in the host rootfs namespace,
                // then it should appear as "/foo/a -> /foo/b" in the guest
                // namespace for consistency reasons.
                if let (Some(binding_referree), Some(binding_referrer)) =
                    (maybe_binding_referree, maybe_binding_referrer)
                {
                    follow_binding =
                        binding_referree.get_path(Host) == binding_referrer.get_path(Host);
                }
            }
        }

        if follow_binding {
            if let Ok(path) = self.substitute(host_path, Host) {
                // a suitable binding was found, we stop here
                return Ok(Some(path));
            }
        }

        // otherwise, we simply try to strip the (guest) root
        if let Ok(stripped_path) = host_path.strip_prefix(&self.get_root()) {
            return Ok(Some(PathBuf::from("/").join(stripped_path)));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::binding::Binding;
    use crate::filesystem::FileSystem;
    use crate::utils::tests::get_test_rootfs_path;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_translate_path_with_root() {
        let rootfs_path = get_test_rootfs_path();

        let fs = FileSystem::with_root(&rootfs_path).unwrap();

        assert_eq!(
            fs.translate_path("/bin/sleep", false),
            Ok(rootfs_path.join("bin/sleep"))
        );

        // checking that the substitution only happens at the end ("/" is
        // translated, not "/bin")
        assert_eq!(
            fs.translate_path(&Path::new("/bin/../home"), false),
            Ok(rootfs_path.join("home"))
        );
    }

    #[test]
    fn test_translate_path_relative_uses_cwd() {
        let rootfs_path = get_test_rootfs_path();

        let mut fs = FileSystem::with_root(&rootfs_path).unwrap();
        fs.set_cwd(PathBuf::from("/bin"));

        assert_eq!(
            fs.translate_path("sleep", false),
            Ok(rootfs_path.join("bin/sleep"))
        );
    }

    #[test]
    fn test_detranslate_path_root() {
        let rootfs_path = get_test_rootfs_path();

        // "${rootfs}" on the host, "/" on the guest
        let fs = FileSystem::with_root(&rootfs_path).unwrap();

        // "${rootfs}/bin/sleep" -> "/bin/sleep"
        assert_eq!(
            fs.detranslate_path(&rootfs_path.join("bin/sleep"), None),
            Ok(Some(PathBuf::from("/bin/sleep")))
        );

        // "${rootfs}" -> "/"
        assert_eq!(
            fs.detranslate_path(&rootfs_path, None),
            Ok(Some(PathBuf::from("/")))
        );
    }

    #[test]
    fn test_detranslate_path_asymmetric() {
        // "${rootfs}" on the host, "/" on the guest
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.insort_binding(Binding::new("/etc", "/tmp"));

        assert_eq!(
            fs.detranslate_path(&Path::new("/etc/passwd"), None),
            Ok(Some(PathBuf::from("/tmp/passwd")))
        );
    }

    #[test]
    fn test_detranslate_path_symmetric() {
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.insort_binding(Binding::new("/etc", "/etc"));

        assert_eq!(
            fs.detranslate_path("/etc/guest/something", None),
            Ok(Some("/etc/guest/something".into()))
        ); // no change in path, because it's a symmetric binding
    }

    #[test]
    fn test_detranslate_path_round_trip() {
        let mut fs = FileSystem::with_root(get_test_rootfs_path()).unwrap();

        fs.insort_binding(Binding::new("/etc", "/media"));

        let guest_path = PathBuf::from("/media/passwd");
        let host_path = fs.translate_path(&guest_path, false).unwrap();

        assert_eq!(
            fs.detranslate_path(&host_path, None),
            Ok(Some(guest_path))
        );
    }
}
