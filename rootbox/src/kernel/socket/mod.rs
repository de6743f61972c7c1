pub mod accept;
pub mod bind_connect;

use std::mem::size_of;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use libc::{c_void, sa_family_t, sockaddr_un, AF_UNIX};

use crate::errors::*;
use crate::process::tracee::Tracee;
use crate::register::{read_string, PtraceWriter, Word};

pub const OFFSETOF_PATH: usize = size_of::<sa_family_t>();
pub const SIZEOF_PATH: usize = 108; // sizeof(sockaddr_un.sun_path)

/// Reads a `sockaddr_un` from the tracee's memory and extracts its
/// filesystem path, if any. Returns `None` for non-unix sockets, abstract
/// names, and addresses too short to carry a path.
pub fn read_sockaddr_un_path(
    tracee: &Tracee,
    address: Word,
    size: usize,
) -> Result<Option<PathBuf>> {
    if size <= OFFSETOF_PATH || size > size_of::<sockaddr_un>() {
        return Ok(None);
    }

    let bytes = read_string(
        tracee.regs.get_pid(),
        (address + OFFSETOF_PATH as Word) as *mut Word,
        SIZEOF_PATH,
    )?;

    let family =
        crate::register::peek_word(tracee.regs.get_pid(), address as *mut Word)? as sa_family_t;
    if i32::from(family) != AF_UNIX {
        return Ok(None);
    }

    // An abstract socket name starts with a nul byte.
    if bytes.is_empty() {
        return Ok(None);
    }

    Ok(Some(PathBuf::from(unsafe {
        String::from_utf8_unchecked(bytes)
    })))
}

/// Overwrites the path part of a `sockaddr_un` in the tracee's memory,
/// truncating it to the `sun_path` capacity if needed. Returns the number
/// of path bytes actually written.
pub fn write_sockaddr_un_path(tracee: &Tracee, address: Word, path: &Path) -> Result<usize> {
    let bytes = path.as_os_str().as_bytes();
    let length = bytes.len().min(SIZEOF_PATH);

    let mut sun_path = [0u8; SIZEOF_PATH];
    sun_path[..length].copy_from_slice(&bytes[..length]);

    tracee.regs.write_data(
        (address + OFFSETOF_PATH as Word) as *mut c_void,
        &sun_path,
        false,
    )?;

    Ok(length)
}
