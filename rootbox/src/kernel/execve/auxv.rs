use std::io::Write;

use crate::errors::*;
use crate::filesystem::binding::Binding;
use crate::filesystem::temp::TempFile;
use crate::process::tracee::Tracee;
use crate::register::{peek_word, Current, StackPointer, Word};

const AT_NULL: Word = 0;

/// Reads the auxiliary vector of a freshly exec'd tracee from its stack:
/// right above the stack pointer lie argc, argv[], envp[] and auxv[].
pub fn read_auxv(tracee: &Tracee) -> Result<Vec<(Word, Word)>> {
    let pid = tracee.regs.get_pid();
    let word_size = std::mem::size_of::<Word>() as Word;
    let mut cursor = tracee.regs.get(Current, StackPointer);

    let argc = peek_word(pid, cursor as *mut Word)?;

    // skip argc, argv[] and its null terminator
    cursor += (argc + 2) * word_size;

    // skip envp[] and its null terminator
    loop {
        let word = peek_word(pid, cursor as *mut Word)?;
        cursor += word_size;
        if word == 0 {
            break;
        }
    }

    // read auxv[] up to the AT_NULL pair
    let mut auxv = Vec::new();
    loop {
        let key = peek_word(pid, cursor as *mut Word)?;
        let value = peek_word(pid, (cursor + word_size) as *mut Word)?;
        cursor += 2 * word_size;

        auxv.push((key, value));
        if key == AT_NULL {
            return Ok(auxv);
        }
    }
}

/// Writes a packed auxv image into a temp file and binds it over
/// "/proc/<pid>/auxv", so that debuggers reading it through the guest view
/// get values consistent with the synthesized load.
pub fn bind_proc_pid_auxv(tracee: &mut Tracee) -> Result<()> {
    let auxv = read_auxv(tracee)?;

    let (temp_file, mut file) = TempFile::create_unique_file("rootbox-auxv")?;

    let mut bytes = Vec::with_capacity(auxv.len() * 2 * std::mem::size_of::<Word>());
    for (key, value) in &auxv {
        bytes.extend_from_slice(&key.to_ne_bytes());
        bytes.extend_from_slice(&value.to_ne_bytes());
    }
    file.write_all(&bytes)?;

    let guest_path = format!("/proc/{}/auxv", tracee.pid);
    tracee
        .fs
        .borrow_mut()
        .insort_binding(Binding::new(&temp_file.path, guest_path));

    // The file has to outlive this scope; it is removed with the temp
    // root when the tracer exits.
    std::mem::forget(temp_file);

    Ok(())
}
