use crate::errors::*;
use crate::register::{Current, Registers, SysArg, SysArgIndex, Word};
use libc::{c_void, PATH_MAX};
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::mem::size_of;
use std::path::PathBuf;

#[cfg(target_pointer_width = "32")]
#[inline]
pub fn convert_word_to_bytes(value_to_convert: Word) -> [u8; 4] {
    value_to_convert.to_le_bytes()
}

#[cfg(target_pointer_width = "64")]
#[inline]
pub fn convert_word_to_bytes(value_to_convert: Word) -> [u8; 8] {
    value_to_convert.to_le_bytes()
}

pub trait PtraceReader {
    fn get_sysarg_path(&self, sys_arg: SysArgIndex) -> Result<PathBuf>;
    fn read_word(&self, address: Word) -> Result<Word>;
}

impl PtraceReader for Registers {
    /// Retrieves a path from one of the syscall's arguments.
    ///
    /// Returns `Ok(path)` if successful, `Ok(PathBuf::new())` if the
    /// argument is null (allowed by some syscalls, utimensat(2) for
    /// instance), or an error.
    #[inline]
    fn get_sysarg_path(&self, sys_arg: SysArgIndex) -> Result<PathBuf> {
        let src_sysarg = self.get(Current, SysArg(sys_arg)) as *mut Word;

        if src_sysarg.is_null() {
            trace!("{:?}({:x?}) => null", sys_arg, src_sysarg);
            Ok(PathBuf::new())
        } else {
            let path = read_path(self.get_pid(), src_sysarg);
            match &path {
                Ok(path) => trace!("{:?}({:x?}) => {:?}", sys_arg, src_sysarg, path),
                Err(error) => trace!(
                    "{:?}({:x?}) => {:?}",
                    sys_arg,
                    src_sysarg,
                    error.get_errno()
                ),
            }
            path
        }
    }

    /// Reads one word from the tracee's memory space.
    #[inline]
    fn read_word(&self, address: Word) -> Result<Word> {
        peek_word(self.get_pid(), address as *mut Word)
    }
}

/// One PEEKDATA, with the kernel's EIO normalized to EFAULT.
#[inline]
pub fn peek_word(pid: Pid, address: *mut Word) -> Result<Word> {
    ptrace::read(pid, address as *mut c_void)
        .map(|word| word as Word)
        .errno(EFAULT)
}

/// Reads a path from the tracee's memory space, bounded by `PATH_MAX`.
#[inline]
pub fn read_path(pid: Pid, src_path: *mut Word) -> Result<PathBuf> {
    let bytes = read_string(pid, src_path, PATH_MAX as usize)?;

    if bytes.len() >= PATH_MAX as usize {
        return Err(Error::errno_with_msg(
            ENAMETOOLONG,
            "when reading a path argument",
        ));
    }

    Ok(PathBuf::from(unsafe { String::from_utf8_unchecked(bytes) }))
}

/// Reads a string from the memory space of a tracee.
///
/// It uses `ptrace(PEEK_DATA)` to read it word by word. The copy stops at
/// the first null character, which is not included in the result.
///
/// * `pid` is the pid of the tracee.
/// * `src_string` is the address of the string in the tracee's memory space.
/// * `max_size` is the maximum number of bytes copied from memory.
pub fn read_string(pid: Pid, src_string: *mut Word, max_size: usize) -> Result<Vec<u8>> {
    let mut bytes: Vec<u8> = Vec::with_capacity(max_size);

    let word_size = size_of::<Word>();
    let nb_trailing_bytes = (max_size % word_size) as isize;
    let nb_full_words = ((max_size - nb_trailing_bytes as usize) / word_size) as isize;

    for i in 0..nb_full_words {
        let src_addr = unsafe { src_string.offset(i) };
        let word = peek_word(pid, src_addr)?;
        let letters = convert_word_to_bytes(word);

        for &letter in &letters {
            if letter == b'\0' {
                bytes.shrink_to_fit();
                return Ok(bytes);
            }
            bytes.push(letter);
        }
    }

    // Copy the bytes from the last word carefully, as only part of it
    // belongs to the string.
    if nb_trailing_bytes > 0 {
        let src_addr = unsafe { src_string.offset(nb_full_words) };
        let word = peek_word(pid, src_addr)?;
        let letters = convert_word_to_bytes(word);

        for &letter in letters.iter().take(nb_trailing_bytes as usize) {
            if letter == b'\0' {
                break;
            }
            bytes.push(letter);
        }
    }

    bytes.shrink_to_fit();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::regs::RegisterSet;
    use crate::register::*;
    use crate::utils::tests::{fork_test, get_test_rootfs_path};
    use nix::unistd::{execvp, getpid};
    use sc::nr::MKDIR;
    use std::ffi::CString;
    use std::mem;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_reader_convert_word_to_bytes() {
        let number: Word = 'h' as u64
            + 'e' as u64 * 256
            + 'l' as u64 * 256 * 256
            + 'l' as u64 * 256 * 256 * 256
            + 'o' as u64 * 256 * 256 * 256 * 256;
        let bytes = convert_word_to_bytes(number);

        assert_eq!(bytes, [b'h', b'e', b'l', b'l', b'o', 0, 0, 0,]);
    }

    #[test]
    fn test_reader_get_sysarg_path_return_empty_if_given_null_src() {
        let raw_regs: RegisterSet = unsafe { mem::zeroed() };
        let regs = Registers::from(getpid(), raw_regs);
        let args = [SysArg1, SysArg2, SysArg3, SysArg4, SysArg5, SysArg6];

        for arg in args.iter() {
            assert_eq!(regs.get_sysarg_path(*arg).unwrap().to_str().unwrap(), "");
        }
    }

    #[test]
    /// Tests that `get_sysarg_path`, `read_path` and `read_string` all work
    /// on a simple syscall whose path argument is known in advance.
    fn test_reader_get_sysarg_path_for_mkdir_test() {
        let rootfs_path = get_test_rootfs_path();
        let test_path = "my/impossible/test/path";

        fork_test(
            rootfs_path,
            // expecting an error (the path doesn't exist)
            1,
            // parent
            |tracee, _| {
                if tracee.regs.get_sys_num(Current) == MKDIR {
                    let dir_path = tracee.regs.get_sysarg_path(SysArg1).unwrap();

                    assert_eq!(dir_path, PathBuf::from(test_path));

                    true
                } else {
                    false
                }
            },
            // child
            || {
                execvp(
                    &CString::new("mkdir").unwrap(),
                    &[CString::new(".").unwrap(), CString::new(test_path).unwrap()],
                )
                .expect("failed execvp mkdir");
            },
        );
    }
}
