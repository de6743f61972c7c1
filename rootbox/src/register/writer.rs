use byteorder::{LittleEndian, ReadBytesExt};
use libc::c_void;
use nix::sys::ptrace;
use std::io::Cursor;
use std::io::Read;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::errors::*;
use crate::register::reader::{convert_word_to_bytes, peek_word};
use crate::register::{PtraceMemoryAllocator, Registers, SysArg, SysArgIndex, Word};

#[cfg(target_pointer_width = "32")]
#[inline]
pub fn convert_bytes_to_word(value_to_convert: [u8; 4]) -> Word {
    Word::from_le_bytes(value_to_convert)
}

#[cfg(target_pointer_width = "64")]
#[inline]
pub fn convert_bytes_to_word(value_to_convert: [u8; 8]) -> Word {
    Word::from_le_bytes(value_to_convert)
}

pub trait PtraceWriter {
    fn set_sysarg_path(
        &mut self,
        sys_arg: SysArgIndex,
        path: &Path,
        justification: &'static str,
    ) -> Result<()>;
    fn set_sysarg_data(
        &mut self,
        sys_arg: SysArgIndex,
        data: &[u8],
        justification: &'static str,
    ) -> Result<()>;
    fn write_data(&self, dest_tracee: *mut c_void, data: &[u8], append_nul: bool) -> Result<()>;
    fn write_word(&self, address: Word, value: Word) -> Result<()>;
}

impl PtraceWriter for Registers {
    /// Converts `path` into bytes before calling `set_sysarg_data`.
    fn set_sysarg_path(
        &mut self,
        sys_arg: SysArgIndex,
        path: &Path,
        justification: &'static str,
    ) -> Result<()> {
        self.set_sysarg_data(sys_arg, path.as_os_str().as_bytes(), justification)
    }

    /// Copies all bytes of `data` to a fresh block allocated in the tracee's
    /// stack and makes `sys_arg` point to this new block.
    fn set_sysarg_data(
        &mut self,
        sys_arg: SysArgIndex,
        data: &[u8],
        justification: &'static str,
    ) -> Result<()> {
        // Allocate space into the tracee's memory to host the new data.
        let tracee_ptr = self.alloc_mem_on_stack((data.len() + 1) as isize)?;

        // Copy the new data into the previously allocated space.
        self.write_data(tracee_ptr as *mut c_void, data, true)?;

        // Make this argument point to the new data.
        self.set(SysArg(sys_arg), tracee_ptr, justification);

        Ok(())
    }

    /// Writes `data` at `dest_tracee` in the tracee's memory, one word at a
    /// time, preserving the bytes lying beyond the write window.
    fn write_data(&self, dest_tracee: *mut c_void, data: &[u8], append_nul: bool) -> Result<()> {
        let pid = self.get_pid();
        let tail: &[u8] = if append_nul { &[b'\0'] } else { &[] };
        let mut buf = Cursor::new(data).chain(Cursor::new(tail));

        let size = data.len() + if append_nul { 1 } else { 0 };
        let word_size = mem::size_of::<Word>();
        let nb_trailing_bytes = (size % word_size) as isize;
        let nb_full_words = ((size - nb_trailing_bytes as usize) / word_size) as isize;

        // Copy one word at a time, except for the last one.
        for i in 0..nb_full_words {
            let word = buf.read_uint::<LittleEndian>(word_size).unwrap() as Word;
            let dest_addr = unsafe { (dest_tracee as *mut Word).offset(i) as *mut c_void };

            unsafe { ptrace::write(pid, dest_addr, word as *mut c_void) }.errno(EFAULT)?;
        }

        if nb_trailing_bytes == 0 {
            return Ok(());
        }

        // Copy the bytes in the last word carefully, since we have to
        // overwrite only the relevant ones.
        let last_dest_addr = unsafe { (dest_tracee as *mut Word).offset(nb_full_words) };
        let existing_word = peek_word(pid, last_dest_addr)?;
        let mut bytes = convert_word_to_bytes(existing_word);

        for byte in bytes.iter_mut().take(nb_trailing_bytes as usize) {
            *byte = buf.read_u8().unwrap();
        }

        let last_word = convert_bytes_to_word(bytes);
        unsafe { ptrace::write(pid, last_dest_addr as *mut c_void, last_word as *mut c_void) }
            .errno(EFAULT)?;

        Ok(())
    }

    /// Writes one full word at `address` in the tracee's memory.
    fn write_word(&self, address: Word, value: Word) -> Result<()> {
        unsafe {
            ptrace::write(
                self.get_pid(),
                address as *mut c_void,
                value as *mut c_void,
            )
        }
        .errno(EFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::{Current, Original, PtraceReader, SysArg1};
    use crate::utils::tests::{fork_test, get_test_rootfs_path};
    use nix::unistd::execvp;
    use sc::nr::MKDIR;
    use std::ffi::CString;
    use std::path::PathBuf;

    #[test]
    fn test_write_set_sysarg_path_write_same_path() {
        let rootfs_path = get_test_rootfs_path();
        let test_path = "my/impossible/test/path";
        let test_path_2 = "my/second/impossible/test/path";

        fork_test(
            rootfs_path,
            // expecting an error (the first path doesn't exist)
            1,
            // parent
            |tracee, _| {
                if tracee.regs.get_sys_num(Current) == MKDIR {
                    tracee.regs.set_restore_original_regs(false);
                    tracee.regs.save_current_regs(Original);

                    let dir_path = tracee.regs.get_sysarg_path(SysArg1).unwrap();

                    assert_eq!(dir_path, PathBuf::from(test_path));

                    // we write the new path
                    assert!(tracee
                        .regs
                        .set_sysarg_path(
                            SysArg1,
                            &PathBuf::from(test_path_2),
                            "setting impossible path for write test",
                        )
                        .is_ok());

                    // the written and newly read paths must be the same
                    let dir_path_2 = tracee.regs.get_sysarg_path(SysArg1).unwrap();
                    assert_eq!(dir_path_2, PathBuf::from(test_path_2));

                    // we don't push the regs, we stop here
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
