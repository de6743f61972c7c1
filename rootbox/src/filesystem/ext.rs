//! Helpers for the trailing-slash problem.
//!
//! For most syscalls a trailing slash cannot be ignored: the kernel then
//! assumes the last component is a directory (or a symlink to one) and
//! dereferences it. `std::path` normalizes both the trailing "/" and the
//! trailing "/." away, so the raw byte form has to be inspected instead.

use std::{
    os::unix::prelude::OsStrExt,
    path::{Path, PathBuf},
};

use nix::NixPath;

pub trait PathExt {
    /// Check if this path ends with "/" or "/.".
    fn with_trailing_slash(&self) -> bool;
}

impl<T> PathExt for T
where
    T: AsRef<Path>,
{
    fn with_trailing_slash(&self) -> bool {
        let bytes = self.as_ref().as_os_str().as_bytes();
        let len = bytes.len();
        (len >= 1 && bytes.get(len - 1) == Some(&b'/'))
            || (len >= 2 && bytes.get(len - 2) == Some(&b'/') && bytes.get(len - 1) == Some(&b'.'))
    }
}

pub trait PathBufExt {
    fn try_add_trailing_slash(&mut self);
}

impl PathBufExt for PathBuf {
    /// Appends a trailing slash, unless the path already carries one (in
    /// either the "/" or the "/." form) or is empty.
    fn try_add_trailing_slash(&mut self) {
        if !self.with_trailing_slash() && !self.is_empty() {
            let mut os_string = std::mem::take(self).into_os_string();
            os_string.push("/");
            *self = PathBuf::from(os_string);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_trailing_slash() {
        assert_eq!("".with_trailing_slash(), false);
        assert_eq!("/".with_trailing_slash(), true);
        assert_eq!("foo".with_trailing_slash(), false);
        assert_eq!("foo/".with_trailing_slash(), true);
        assert_eq!("foo/.".with_trailing_slash(), true);
        assert_eq!("foo/./".with_trailing_slash(), true);
        assert_eq!("foo/..".with_trailing_slash(), false);
    }

    #[test]
    fn test_try_add_trailing_slash() {
        let mut pathbuf = PathBuf::from("");
        pathbuf.try_add_trailing_slash();
        assert_eq!(pathbuf.as_os_str(), "");

        let mut pathbuf = PathBuf::from("/");
        pathbuf.try_add_trailing_slash();
        assert_eq!(pathbuf.as_os_str(), "/");

        let mut pathbuf = PathBuf::from("foo");
        pathbuf.try_add_trailing_slash();
        assert_eq!(pathbuf.as_os_str(), "foo/");

        let mut pathbuf = PathBuf::from("foo/.");
        pathbuf.try_add_trailing_slash();
        assert_eq!(pathbuf.as_os_str(), "foo/.");

        let mut pathbuf = PathBuf::from("foo/..");
        pathbuf.try_add_trailing_slash();
        assert_eq!(pathbuf.as_os_str(), "foo/../");
    }
}
