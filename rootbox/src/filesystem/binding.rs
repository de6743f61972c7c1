use crate::errors::*;
use libc::PATH_MAX;
use nix::NixPath;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Side {
    Host,  // in the real filesystem
    Guest, // in the sandbox
}

impl Side {
    pub fn reverse(&self) -> Side {
        match self {
            Side::Host => Side::Guest,
            Side::Guest => Side::Host,
        }
    }
}

/// Outcome of comparing two paths component-wise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathComparison {
    Equal,
    /// The first path is a strict prefix of the second.
    FirstIsPrefix,
    /// The second path is a strict prefix of the first.
    SecondIsPrefix,
    NotComparable,
}

/// Compares two absolute paths component-wise, so that `/ab` is not
/// considered a prefix of `/abc`.
pub fn compare_paths<P1: AsRef<Path>, P2: AsRef<Path>>(path1: P1, path2: P2) -> PathComparison {
    let mut components1 = path1.as_ref().components();
    let mut components2 = path2.as_ref().components();

    loop {
        match (components1.next(), components2.next()) {
            (None, None) => return PathComparison::Equal,
            (None, Some(_)) => return PathComparison::FirstIsPrefix,
            (Some(_), None) => return PathComparison::SecondIsPrefix,
            (Some(comp1), Some(comp2)) => {
                // `.` never survives canonicalization, so only normal
                // components and the root dir are expected here.
                if comp1 != comp2 {
                    return PathComparison::NotComparable;
                }
                if comp1 == Component::RootDir && comp2 == Component::RootDir {
                    continue;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    /// Host side of this binding, in canonical form.
    host: PathBuf,
    /// Guest side of this binding, in canonical form.
    guest: PathBuf,
    /// False for a "symmetric" binding (`host` equals `guest`), whose paths
    /// never require substitution.
    need_substitution: bool,
}

impl Binding {
    pub fn new<P1, P2>(host: P1, guest: P2) -> Binding
    where
        P1: Into<PathBuf>,
        P2: Into<PathBuf>,
    {
        let host = host.into();
        let guest = guest.into();
        let need_substitution = !host.eq(&guest);
        Binding {
            host,
            guest,
            need_substitution,
        }
    }

    #[inline]
    pub fn get_path(&self, side: Side) -> &PathBuf {
        match side {
            Side::Guest => &self.guest,
            Side::Host => &self.host,
        }
    }

    #[inline]
    pub fn needs_substitution(&self) -> bool {
        self.need_substitution
    }

    /// Replaces the leading `from_side` part of `path` with the opposite
    /// side of this binding.
    #[inline]
    pub fn substitute_path_prefix(&self, path: &Path, from_side: Side) -> Result<PathBuf> {
        let current_prefix = self.get_path(from_side);

        // we start with the new prefix
        let mut new_path: PathBuf = PathBuf::from(self.get_path(from_side.reverse()));
        let stripped_path = path.strip_prefix(current_prefix).with_context(|| {
            format!(
                "Failed to strip_prefix {:?} from {:?}",
                current_prefix, path
            )
        })?;

        // and then add what remains of the path when removing the old prefix
        if !stripped_path.is_empty() {
            // An empty `stripped_path` must not be pushed: it would append
            // an extra "/", and many syscalls are sensitive to a trailing
            // slash (they assume the path is a directory).
            new_path.push(stripped_path);
        }

        if new_path.len() >= PATH_MAX as usize {
            return Err(Error::errno_with_msg(
                Errno::ENAMETOOLONG,
                format!(
                    "Path length {} exceeds PATH_MAX {}: {:?}",
                    new_path.len(),
                    PATH_MAX,
                    new_path
                ),
            ));
        }
        Ok(new_path)
    }
}

#[cfg(test)]
mod tests {
    use super::Side::{Guest, Host};
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_binding_get_path() {
        // "/etc" on host = "/media" on guest
        let binding = Binding::new("/etc", "/media");

        assert_eq!(binding.get_path(Side::Host), &PathBuf::from("/etc"));
        assert_eq!(binding.get_path(Side::Guest), &PathBuf::from("/media"));
    }

    #[test]
    fn test_compare_paths() {
        assert_eq!(compare_paths("/a/b", "/a/b"), PathComparison::Equal);
        assert_eq!(compare_paths("/a", "/a/b"), PathComparison::FirstIsPrefix);
        assert_eq!(compare_paths("/a/b", "/a"), PathComparison::SecondIsPrefix);
        assert_eq!(compare_paths("/ab", "/abc"), PathComparison::NotComparable);
        assert_eq!(compare_paths("/", "/a"), PathComparison::FirstIsPrefix);
        assert_eq!(compare_paths("/", "/"), PathComparison::Equal);
    }

    #[test]
    fn test_substitute_path_prefix_root() {
        let binding = Binding::new("/home/user", "/");

        assert_eq!(
            binding.substitute_path_prefix(&PathBuf::from("/bin/sleep"), Guest),
            Ok(PathBuf::from("/home/user/bin/sleep"))
        ); // "/" => "/home/user"
        assert_eq!(
            binding.substitute_path_prefix(&PathBuf::from("/"), Guest),
            Ok(PathBuf::from("/home/user"))
        ); // same here
        assert_eq!(
            binding.substitute_path_prefix(&PathBuf::from("/bin/sleep"), Host),
            Err(Error::unknown())
        ); // "/home/user" is not a prefix of this path
    }

    #[test]
    fn test_substitute_path_prefix_different_path() {
        // "/etc" on host = "/media" on guest
        let binding = Binding::new("/etc", "/media");

        assert_eq!(
            binding.substitute_path_prefix(&PathBuf::from("/etc/bin/sleep"), Guest),
            Err(Error::unknown())
        ); // no "/etc" prefix on the guest side
        assert_eq!(
            binding.substitute_path_prefix(&PathBuf::from("/media/bin/sleep"), Guest,),
            Ok(PathBuf::from("/etc/bin/sleep"))
        ); // "/media" => "/etc"
        assert_eq!(
            binding.substitute_path_prefix(&PathBuf::from("/etc/bin/sleep"), Host),
            Ok(PathBuf::from("/media/bin/sleep"))
        ); // "/etc" => "/media"
    }
}
