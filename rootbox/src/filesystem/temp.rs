use crate::errors::*;
use nix::unistd::{getpid, mkstemp};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Root under which every temporary file and directory is created. It can
/// be moved with `PROOT_TMP_DIR`, which must point to an existing
/// directory.
pub fn temp_root() -> PathBuf {
    match env::var_os("PROOT_TMP_DIR") {
        Some(dir) => {
            let dir = PathBuf::from(dir);
            match dir.canonicalize() {
                Ok(canonical) => canonical,
                Err(_) => {
                    warn!("PROOT_TMP_DIR {:?} is not usable, falling back", dir);
                    env::temp_dir()
                }
            }
        }
        None => env::temp_dir(),
    }
}

/// A file path under the temp root, deleted when dropped.
#[derive(Debug)]
pub struct TempFile {
    pub path: PathBuf,
}

impl TempFile {
    #[inline]
    fn create_temp_path(prefix: &str) -> PathBuf {
        temp_root().join(format!("{}-{}-XXXXXX", prefix, getpid()))
    }

    pub fn new(prefix: &str) -> Self {
        Self {
            path: TempFile::create_temp_path(prefix),
        }
    }

    /// Creates the file with a unique name (the `XXXXXX` part is filled in
    /// by mkstemp).
    pub fn create_unique_file(prefix: &str) -> Result<(Self, fs::File)> {
        let template = TempFile::create_temp_path(prefix);
        let (fd, path) = mkstemp(&template)?;
        let file = unsafe { <fs::File as std::os::unix::io::FromRawFd>::from_raw_fd(fd) };
        Ok((Self { path }, file))
    }

    pub fn create_file(&self) -> Result<fs::File> {
        Ok(fs::File::create(&self.path)?)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// A directory under the temp root, recursively removed when dropped.
#[derive(Debug)]
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> Result<Self> {
        let root = temp_root();
        let mut counter = 0u32;
        loop {
            let path = root.join(format!("{}-{}-{}", prefix, getpid(), counter));
            match fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(ref error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                    counter += 1;
                    continue;
                }
                Err(error) => return Err(Error::from(error)),
            }
        }
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        // Strictly inside the temp root, never elsewhere.
        if self.path.starts_with(temp_root()) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_temp_file_has_correct_path() {
        let temp_file = TempFile::new("test-1");

        assert!(temp_file.path.is_absolute());
        assert!(!temp_file.path.exists());
        assert!(temp_file.path.parent().unwrap().eq(&temp_root()));
    }

    #[test]
    fn test_temp_file_is_created_and_deleted() {
        let temp_file_path = {
            let temp_file = TempFile::new("test-2");
            let temp_file_path = temp_file.path.to_owned();

            // the file must not exist before creating the file
            assert!(!temp_file_path.exists());

            {
                let mut file = temp_file.create_file().expect("create temp file");

                assert!(temp_file_path.exists());
                file.write(&"test".as_bytes()).expect("writing in temp file");
            }

            // it must persist even after the File is dropped
            assert!(temp_file_path.exists());

            temp_file_path
        };

        // but it must be deleted when the TempFile is dropped
        assert!(!temp_file_path.exists());
    }

    #[test]
    fn test_temp_dir_is_removed_recursively() {
        let temp_dir_path = {
            let temp_dir = TempDir::new("test-3").unwrap();
            let path = temp_dir.get_path().to_owned();

            fs::create_dir(path.join("subdir")).unwrap();
            fs::File::create(path.join("subdir/file")).unwrap();

            path
        };

        assert!(!temp_dir_path.exists());
    }

    #[test]
    fn test_temp_file_unique_names() {
        let (first, _file1) = TempFile::create_unique_file("test-4").unwrap();
        let (second, _file2) = TempFile::create_unique_file("test-4").unwrap();

        assert_ne!(first.path, second.path);
        assert!(first.path.exists());
        assert!(second.path.exists());
    }
}
