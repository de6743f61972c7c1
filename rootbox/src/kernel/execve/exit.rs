use std::cell::RefCell;
use std::os::unix::prelude::OsStrExt;
use std::rc::Rc;

use libc::c_void;
use loader_shim::script::{
    LoadStatement, LoadStatementMmap, LoadStatementOpen, LoadStatementStackExec,
    LoadStatementStart,
};
use nix::sys::mman::MapFlags;
use nix::sys::signal::{kill, Signal};

use crate::errors::*;
use crate::kernel::execve::auxv;
use crate::kernel::execve::load_info::PAGE_MASK;
use crate::kernel::heap::Heap;
use crate::process::tracee::Tracee;
use crate::register::{
    Current, InstrPointer, Original, PtraceWriter, RtldFini, StackPointer, StateFlags, SysArg,
    SysArg2, SysArg3, SysResult, UserArg1, Word,
};

pub fn translate(tracee: &mut Tracee) -> Result<()> {
    if tracee.sentinel_execve {
        tracee.sentinel_execve = false;

        // Be sure not to confuse the ptracer with a cancelled syscall:
        // from its point of view an execve just returned successfully.
        tracee.regs.set(SysResult, 0, "the load just completed");
        tracee
            .regs
            .set_sys_num(sc::nr::EXECVE, "the sentinel appears as an execve");

        // According to most ABIs, all registers are scratched by execve;
        // the loader stashed the final stack pointer and entry point in
        // the sentinel's arguments.
        let stack_pointer = tracee.regs.get(Original, SysArg(SysArg2));
        let entry_point = tracee.regs.get(Original, SysArg(SysArg3));
        tracee
            .regs
            .set(StackPointer, stack_pointer, "stack pointer chosen by the loader");
        tracee
            .regs
            .set(InstrPointer, entry_point, "entry point of the new program");
        tracee.regs.set(RtldFini, 0, "no rtld_fini at this point");
        tracee.regs.set(StateFlags, 0, "clean state flags");

        // Keep the new register values as-is for the final push.
        tracee.regs.set_restore_original_regs(false);

        // This is required to make debuggers work correctly: they read
        // "/proc/<pid>/auxv" to locate the loaded objects.
        if let Err(error) = auxv::bind_proc_pid_auxv(tracee) {
            warn!("can't bind /proc/{}/auxv: {}", tracee.pid, error);
        }

        // If the PTRACE_O_TRACEEXEC option is *not* in effect for the
        // ptracer, the tracee still has to report the execve through the
        // legacy SIGTRAP.
        if tracee.as_ptracee.options & nix::sys::ptrace::Options::PTRACE_O_TRACEEXEC.bits() as Word
            == 0
        {
            let _ = kill(tracee.pid, Signal::SIGTRAP);
        }

        return Ok(());
    }

    let syscall_result = tracee.regs.get(Current, SysResult) as i64;
    if syscall_result < 0 {
        return Ok(());
    }

    // Execve happened; commit the new "/proc/self/exe".
    if tracee.new_exe.is_some() {
        tracee.exe = tracee.new_exe.take();
        tracee.update_proc_entry();
    }

    /* New processes have no heap. The process could have been cloned with
     * CLONE_VM, in which case the sibling keeps the old heap and this
     * tracee gets a fresh one. */
    if Rc::strong_count(&tracee.heap) > 1 {
        tracee.heap = Rc::new(RefCell::new(Heap::new()));
    } else {
        *tracee.heap.borrow_mut() = Heap::new();
    }

    transfer_load_script(tracee)
}

/// Composes the load script and the strings area, and writes them at the
/// top of the brand new stack.
pub fn transfer_load_script(tracee: &mut Tracee) -> Result<()> {
    // the stack pointer value right after execve
    let stack_pointer = tracee.regs.get(Current, StackPointer) as usize;

    // Detach the load info while the tracee's registers are being
    // modified; it is put back before returning.
    let load_info = match tracee.load_info.take() {
        Some(load_info) => load_info,
        None => return Err(Error::errno_with_msg(EPERM, "no load info at execve exit")),
    };
    let result = compose_and_write(tracee, &load_info, stack_pointer);
    tracee.load_info = Some(load_info);
    result
}

fn compose_and_write(
    tracee: &mut Tracee,
    load_info: &crate::kernel::execve::LoadInfo,
    stack_pointer: usize,
) -> Result<()> {

    // Strings addresses are required to generate the load script.
    let string1_bytes = load_info.user_path.as_ref().unwrap().as_os_str().as_bytes();
    let string1_size = string1_bytes.len() + 1;
    let string2_bytes = load_info
        .interp
        .as_ref()
        .map(|interp| interp.user_path.as_ref().unwrap().as_os_str().as_bytes());
    let string2_size = string2_bytes.map_or(0, |bytes| bytes.len() + 1);
    let string3_bytes = if load_info.user_path == load_info.raw_path {
        None
    } else {
        Some(load_info.raw_path.as_ref().unwrap().as_os_str().as_bytes())
    };
    let string3_size = string3_bytes.map_or(0, |bytes| bytes.len() + 1);

    // A padding is appended after the strings so the final stack pointer
    // stays aligned.
    let padding_size =
        (stack_pointer - string1_size - string2_size - string3_size) % tracee.sizeof_word();
    let strings_size = string1_size + string2_size + string3_size + padding_size;
    let string1_address = stack_pointer - strings_size;
    let string2_address = stack_pointer - strings_size + string1_size;
    let string3_address = if string3_size == 0 {
        string1_address
    } else {
        stack_pointer - strings_size + string1_size + string2_size
    };

    let mut buffer: Vec<u8> = vec![];

    // Load script statement: open.
    let stmt = LoadStatement::Open(LoadStatementOpen {
        string_address: string1_address as Word,
    });
    trace!("load statement: {:x?}", stmt);
    buffer.extend_from_slice(stmt.as_bytes());

    transcript_mappings(&mut buffer, &load_info.mappings);

    let entry_point = if let Some(interp) = load_info.interp.as_ref() {
        // Load the interpreter too (PT_INTERP).
        let stmt = LoadStatement::OpenNext(LoadStatementOpen {
            string_address: string2_address as Word,
        });
        trace!("load statement: {:x?}", stmt);
        buffer.extend_from_slice(stmt.as_bytes());

        transcript_mappings(&mut buffer, &interp.mappings);

        interp.elf_header.e_entry()
    } else {
        load_info.elf_header.e_entry()
    };

    // If the stack of the executable or of its interpreter is marked
    // executable (NX disabled), it has to be remapped accordingly.
    let needs_executable_stack = load_info.needs_executable_stack
        || load_info
            .interp
            .as_ref()
            .map_or(false, |interp| interp.needs_executable_stack);
    if needs_executable_stack {
        let stmt = LoadStatement::MakeStackExec(LoadStatementStackExec {
            start: (stack_pointer as Word) & *PAGE_MASK,
        });
        trace!("load statement: {:x?}", stmt);
        buffer.extend_from_slice(stmt.as_bytes());
    }

    // Load script statement: start. It slightly differs when ptraced: the
    // loader then signals the load completion through a sentinel execve.
    let start = LoadStatementStart {
        stack_pointer: stack_pointer as Word,
        entry_point: entry_point as Word,
        at_phdr: (load_info.elf_header.e_phoff() + load_info.mappings[0].addr as u64) as Word,
        at_phent: load_info.elf_header.e_phentsize() as Word,
        at_phnum: load_info.elf_header.e_phnum() as Word,
        at_entry: load_info.elf_header.e_entry() as Word,
        at_execfn: string3_address as Word,
    };
    let stmt = if tracee.as_ptracee.ptracer.is_some() {
        LoadStatement::StartTraced(start)
    } else {
        LoadStatement::Start(start)
    };
    trace!("load statement: {:x?}", stmt);
    buffer.extend_from_slice(stmt.as_bytes());

    // Concatenate the load script and the strings.
    buffer.extend_from_slice(string1_bytes);
    buffer.push(b'\0');
    if let Some(bytes) = string2_bytes {
        buffer.extend_from_slice(bytes);
        buffer.push(b'\0');
    }
    if let Some(bytes) = string3_bytes {
        buffer.extend_from_slice(bytes);
        buffer.push(b'\0');
    }

    // Write the load script into the tracee's stack and point both the
    // stack pointer and the loader's first argument at it.
    let new_stack_pointer = stack_pointer - padding_size - buffer.len();
    tracee
        .regs
        .write_data(new_stack_pointer as *mut c_void, &buffer, false)?;
    tracee.regs.set(
        StackPointer,
        new_stack_pointer as Word,
        "stack pointer on top of the load script",
    );
    tracee.regs.set(
        UserArg1,
        new_stack_pointer as Word,
        "the loader receives the load script address",
    );

    // We are in the sysexit stage: the current register values must be
    // used as-is at the end.
    tracee.regs.set_restore_original_regs(false);
    Ok(())
}

fn transcript_mappings(buffer: &mut Vec<u8>, mappings: &[crate::kernel::execve::Mapping]) {
    for mapping in mappings {
        let payload = LoadStatementMmap {
            addr: mapping.addr as Word,
            length: mapping.length as Word,
            prot: mapping.prot.bits() as Word,
            offset: mapping.offset as Word,
            clear_length: mapping.clear_length as Word,
        };
        let stmt = if mapping.flags.contains(MapFlags::MAP_ANONYMOUS) {
            LoadStatement::MmapAnonymous(payload)
        } else {
            LoadStatement::MmapFile(payload)
        };
        trace!("load statement: {:x?}", stmt);
        buffer.extend_from_slice(stmt.as_bytes());
    }
}
