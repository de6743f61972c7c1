use bstr::ByteSlice;

use crate::arch::MAXSYMLINKS;
use crate::errors::*;
use crate::filesystem::{FileSystem, Translator};
use std::fs::File;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Maximum number of bytes the kernel inspects on the first line of a
/// script (see BINPRM_BUF_SIZE).
const BINPRM_BUF_SIZE: usize = 128;

/// Result of the shebang expansion of one execve path.
#[derive(Debug, PartialEq)]
pub struct Expanded {
    /// Host path of the program finally executed.
    pub host_path: PathBuf,
    /// Guest path of the program finally executed.
    pub user_path: PathBuf,
    /// True when at least one shebang was expanded, in which case the
    /// tracee's argv has to be rewritten.
    pub has_shebang: bool,
}

/// Expands the shebang of `user_path`, if any, rewriting `argv` the way
/// execve(2) documents:
///
///     interpreter [optional-arg] filename arg...
///
/// A script may use another script as interpreter, hence the loop; the
/// ELF interpreter itself must not be a script.
pub fn expand(fs: &FileSystem, user_path: &Path, argv: &mut Vec<Vec<u8>>) -> Result<Expanded> {
    let mut current_path = user_path.to_path_buf();
    let mut has_shebang = false;

    for _ in 0..MAXSYMLINKS {
        // Translate this path (user -> host), then check it is executable.
        let host_path = translate_and_check_exec(fs, &current_path)?;

        let (interpreter, argument) = match extract(&host_path)? {
            None => {
                return Ok(Expanded {
                    host_path,
                    user_path: current_path,
                    has_shebang,
                })
            }
            Some(parts) => parts,
        };
        has_shebang = true;

        /* Assuming the shebang of "script" is "#!/bin/sh -x", a call to:
         *
         *     execve("./script", { "script.sh", NULL }, ...)
         *
         * becomes:
         *
         *     execve("/bin/sh", { "/bin/sh", "-x", "./script", NULL }, ...)
         */
        if !argv.is_empty() {
            argv.remove(0);
        }
        argv.insert(0, current_path.as_os_str().as_bytes().to_vec());
        if let Some(ref argument) = argument {
            argv.insert(0, argument.clone());
        }
        argv.insert(0, interpreter.as_os_str().as_bytes().to_vec());

        current_path = interpreter;
    }

    Err(Error::errno_with_msg(ELOOP, "when expanding shebang"))
}

/// Translates a guest path and checks that it is executable.
fn translate_and_check_exec(fs: &FileSystem, guest_path: &Path) -> Result<PathBuf> {
    let host_path = fs.translate_path(guest_path, true)?;

    // The Linux kernel returns -EACCES when trying to execute a directory.
    if host_path.is_dir() {
        return Err(Error::errno(EACCES));
    }

    fs.check_path_executable(&host_path)?;

    Ok(host_path)
}

/// Extracts the interpreter (and its optional argument) from the shebang
/// of `host_path`. Returns `None` if the file is not a script.
///
/// Extract from "man 2 execve":
///
///     On Linux, the entire string following the interpreter name is
///     passed as a *single* argument to the interpreter, and this string
///     can include white space.
fn extract(host_path: &Path) -> Result<Option<(PathBuf, Option<Vec<u8>>)>> {
    let mut buffer = [0u8; BINPRM_BUF_SIZE];
    let read = File::open(host_path)?.read(&mut buffer)?;
    let buffer = &buffer[..read];

    if buffer.len() < 2 || buffer[0] != b'#' || buffer[1] != b'!' {
        return Ok(None);
    }

    let first_line = match buffer[2..].lines().next() {
        Some(line) => line.trim(),
        None => return Err(Error::errno_with_msg(ENOEXEC, "empty shebang")),
    };

    let path = &first_line[..first_line
        .iter()
        .position(|c| c.is_ascii_whitespace())
        .unwrap_or_else(|| first_line.len())];

    if path.is_empty() {
        return Err(Error::errno_with_msg(
            ENOEXEC,
            format!("empty shebang detected, host_path: {:?}", host_path),
        ));
    }

    let argument = first_line[path.len()..].trim();
    let argument = if argument.is_empty() {
        None
    } else {
        Some(argument.to_vec())
    };

    let interpreter = match path.to_path() {
        Ok(interpreter) => interpreter.to_path_buf(),
        Err(_) => return Err(Error::errno(ENOEXEC)),
    };

    Ok(Some((interpreter, argument)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::temp::TempDir;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        file.set_permissions(perms).unwrap();
        path
    }

    #[test]
    fn test_extract_shebang_not_script() {
        // an ELF file is not a script
        assert_eq!(Ok(None), extract(Path::new("/bin/sh")));
    }

    #[test]
    fn test_extract_shebang_with_argument() {
        let dir = TempDir::new("test_shebang_extract").unwrap();
        let script = write_script(dir.get_path(), "script", "#!/bin/sh -x\necho hi\n");

        let (interpreter, argument) = extract(&script).unwrap().unwrap();

        assert_eq!(interpreter, PathBuf::from("/bin/sh"));
        assert_eq!(argument, Some(b"-x".to_vec()));
    }

    #[test]
    fn test_extract_shebang_argument_is_single() {
        let dir = TempDir::new("test_shebang_single_arg").unwrap();
        let script = write_script(dir.get_path(), "script", "#!/bin/env -i -S\n");

        let (interpreter, argument) = extract(&script).unwrap().unwrap();

        assert_eq!(interpreter, PathBuf::from("/bin/env"));
        // everything after the interpreter is one single argument
        assert_eq!(argument, Some(b"-i -S".to_vec()));
    }

    #[test]
    fn test_expand_rewrites_argv() {
        let dir = TempDir::new("test_shebang_expand").unwrap();
        // the rootfs is the host one here, so /bin/sh resolves normally
        let fs = FileSystem::with_root("/").unwrap();

        let script = write_script(dir.get_path(), "script", "#!/bin/sh -x\n");
        let guest_script = script.to_path_buf();

        let mut argv: Vec<Vec<u8>> = vec![b"script".to_vec(), b"arg1".to_vec()];
        let expanded = expand(&fs, &guest_script, &mut argv).unwrap();

        assert!(expanded.has_shebang);
        assert_eq!(expanded.user_path, PathBuf::from("/bin/sh"));
        assert_eq!(
            argv,
            vec![
                b"/bin/sh".to_vec(),
                b"-x".to_vec(),
                guest_script.as_os_str().as_bytes().to_vec(),
                b"arg1".to_vec(),
            ]
        );
    }
}
