use std::mem::size_of;

use libc::sockaddr_un;

use crate::errors::*;
use crate::filesystem::Translator;
use crate::kernel::socket::{read_sockaddr_un_path, write_sockaddr_un_path, OFFSETOF_PATH};
use crate::process::tracee::Tracee;
use crate::register::{
    peek_word, Current, Modified, Original, PtraceWriter, SysArg, SysArg2, SysArg3, SysArg6,
    SysResult, Word,
};

/// accept(2), accept4(2), getsockname(2) and getpeername(2) fill a
/// `sockaddr` whose "size" argument is both an input (max size) and an
/// output (actual size). The exit stage needs the max size to not
/// overwrite anything, so it is stashed in the unused 6th argument before
/// the kernel updates it.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let sock_addr = tracee.regs.get(Original, SysArg(SysArg2));
    if sock_addr == 0 {
        return Ok(());
    }

    let size_addr = tracee.regs.get(Original, SysArg(SysArg3));
    if size_addr == 0 {
        return Err(Error::errno(EINVAL));
    }

    let max_size = peek_word(tracee.regs.get_pid(), size_addr as *mut Word)? & 0xffff_ffff;
    tracee.regs.set(
        SysArg(SysArg6),
        max_size,
        "stash the sockaddr max size for the exit stage",
    );

    Ok(())
}

/// Detranslates the host path the kernel wrote into the `sockaddr_un`.
pub fn exit(tracee: &mut Tracee) -> Result<()> {
    let syscall_result = tracee.regs.get(Current, SysResult) as i64;
    if syscall_result < 0 {
        return Ok(());
    }

    let sock_addr = tracee.regs.get(Modified, SysArg(SysArg2));
    let size_addr = tracee.regs.get(Modified, SysArg(SysArg3));
    let max_size = tracee.regs.get(Modified, SysArg(SysArg6)) as usize;

    if sock_addr == 0 {
        return Ok(());
    }

    let size = (peek_word(tracee.regs.get_pid(), size_addr as *mut Word)? & 0xffff_ffff) as usize;
    let max_size = max_size.min(size_of::<sockaddr_un>());

    let path = match read_sockaddr_un_path(tracee, sock_addr, size.min(max_size))? {
        Some(path) => path,
        None => return Ok(()),
    };

    let guest_path = {
        let fs = tracee.fs.borrow();
        fs.detranslate_path(&path, None)?
    };
    let guest_path = match guest_path {
        Some(path) => path,
        None => return Ok(()),
    };

    let written = write_sockaddr_un_path(tracee, sock_addr, &guest_path)?;

    // Report the actual size of the detranslated address.
    let new_size = (OFFSETOF_PATH + written + 1) as Word;
    let size_bytes = (new_size as u32).to_le_bytes();
    tracee.regs.write_data(
        size_addr as *mut libc::c_void,
        &size_bytes,
        false,
    )?;

    Ok(())
}
