//! Access to the argv[]-style arrays of pointers living in the tracee's
//! memory: a null-terminated table of addresses, each pointing to a
//! NUL-terminated string.

use libc::{c_void, PATH_MAX};

use crate::errors::*;
use crate::process::tracee::Tracee;
use crate::register::{
    peek_word, read_string, Current, PtraceMemoryAllocator, PtraceWriter, SysArg, SysArgIndex,
    Word,
};

/// Maximum number of entries read from a tracee-provided array, to stay
/// safe against a corrupted (non terminated) table.
const MAX_ENTRIES: usize = 4096;

/// Reads the array of strings pointed to by the syscall argument
/// `sys_arg`. A null table address yields an empty vector.
pub fn read_string_array(tracee: &Tracee, sys_arg: SysArgIndex) -> Result<Vec<Vec<u8>>> {
    let table_address = tracee.regs.get(Current, SysArg(sys_arg));
    if table_address == 0 {
        return Ok(vec![]);
    }

    let mut strings = Vec::new();
    let word_size = std::mem::size_of::<Word>() as Word;

    for index in 0..MAX_ENTRIES {
        let slot_address = table_address + index as Word * word_size;
        let string_address = peek_word(tracee.regs.get_pid(), slot_address as *mut Word)?;
        if string_address == 0 {
            return Ok(strings);
        }

        let string = read_string(
            tracee.regs.get_pid(),
            string_address as *mut Word,
            PATH_MAX as usize,
        )?;
        strings.push(string);
    }

    Err(Error::errno_with_msg(E2BIG, "unterminated string array"))
}

/// Writes `strings` into a fresh block of the tracee's stack as a
/// null-terminated pointer table followed by the strings themselves, and
/// makes `sys_arg` point to the new table.
pub fn write_string_array(
    tracee: &mut Tracee,
    sys_arg: SysArgIndex,
    strings: &[Vec<u8>],
) -> Result<()> {
    let word_size = std::mem::size_of::<Word>();

    let table_size = (strings.len() + 1) * word_size;
    let strings_size: usize = strings.iter().map(|string| string.len() + 1).sum();

    let table_address = tracee
        .regs
        .alloc_mem_on_stack((table_size + strings_size) as isize)?;
    let mut string_address = table_address + table_size as Word;

    for (index, string) in strings.iter().enumerate() {
        let slot_address = table_address + (index * word_size) as Word;
        tracee.regs.write_word(slot_address, string_address)?;
        tracee
            .regs
            .write_data(string_address as *mut c_void, string, true)?;
        string_address += string.len() as Word + 1;
    }

    // Terminating null pointer.
    let last_slot = table_address + (strings.len() * word_size) as Word;
    tracee.regs.write_word(last_slot, 0)?;

    tracee.regs.set(
        SysArg(sys_arg),
        table_address,
        "pointing the syscall at the rewritten string array",
    );

    Ok(())
}
