use std::os::unix::ffi::OsStrExt;

use libc::c_void;

use crate::errors::*;
use crate::filesystem::Translator;
use crate::process::tracee::Tracee;
use crate::register::{Original, PtraceWriter, SysArg, SysArg1, SysArg2, Word};

/// getcwd(2) is cancelled at enter: the kernel only knows the host cwd,
/// the guest one lives in the tracee's `FileSystem`.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    tracee
        .regs
        .cancel_syscall("getcwd is emulated from the stashed cwd");
    Ok(())
}

/// Synthesizes the result from the stashed cwd, honoring the caller's
/// buffer size.
pub fn exit(tracee: &mut Tracee) -> Result<Word> {
    let size = tracee.regs.get(Original, SysArg(SysArg2)) as usize;
    if size == 0 {
        return Err(Error::errno(EINVAL));
    }

    // Ensure the stashed cwd still exists.
    let cwd = tracee.fs.borrow().get_cwd().to_path_buf();
    tracee.fs.borrow().translate_path(&cwd, true)?;

    let bytes = cwd.as_os_str().as_bytes();
    let new_size = bytes.len() + 1;
    if size < new_size {
        return Err(Error::errno(ERANGE));
    }

    // Overwrite the caller's buffer.
    let output = tracee.regs.get(Original, SysArg(SysArg1));
    tracee
        .regs
        .write_data(output as *mut c_void, bytes, true)?;

    Ok(new_size as Word)
}
