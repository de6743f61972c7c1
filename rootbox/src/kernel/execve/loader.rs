use std::env;
use std::path::{Path, PathBuf};

use nix::unistd::{access, AccessFlags};

use crate::errors::*;

/// Host-side loader binaries, substituted for the guest program at the
/// enter stage of execve. `PROOT_LOADER` (and `PROOT_LOADER_32` for the
/// compatibility mode) overrides the default location, which is a
/// "loader-shim" binary sitting next to the tracer executable.
#[derive(Debug)]
pub struct LoaderFile {
    path: PathBuf,
    path_32: Option<PathBuf>,
}

impl LoaderFile {
    pub fn locate() -> Result<Self> {
        let path = match env::var_os("PROOT_LOADER") {
            Some(path) => PathBuf::from(path),
            None => {
                let mut path = env::current_exe()?;
                path.pop();
                path.push("loader-shim");
                path
            }
        };

        access(&path, AccessFlags::X_OK)
            .errno(ENOENT)
            .with_context(|| format!("loader binary {:?} is not executable", path))?;

        let path_32 = env::var_os("PROOT_LOADER_32").map(PathBuf::from);

        Ok(LoaderFile { path, path_32 })
    }

    pub fn get_loader_path(&self, wants_32bit: bool) -> Result<&Path> {
        if wants_32bit {
            match self.path_32 {
                Some(ref path) => Ok(path),
                None => Err(Error::errno_with_msg(
                    ENOEXEC,
                    "no 32-bit loader was configured (PROOT_LOADER_32)",
                )),
            }
        } else {
            Ok(&self.path)
        }
    }
}
