//! Emulation of the ptrace(2) syscall issued by a tracee: a tracee can
//! itself be the ptracer of another tracee, while this tracer remains the
//! only real ptracer as far as the kernel is concerned.

use std::mem::size_of;

use libc::c_void;
use nix::errno::ENOTSUP;
use nix::sys::ptrace as nix_ptrace;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::errors::*;
use crate::process::proot::PRoot;
use crate::process::tracee::{Tracee, TraceeRestartMethod};
use crate::register::{
    peek_word, Original, PtraceWriter, RegisterSet, SysArg, SysArg1, SysArg2, SysArg3, SysArg4,
    Word,
};

const PTRACE_TRACEME: Word = 0;
const PTRACE_PEEKTEXT: Word = 1;
const PTRACE_PEEKDATA: Word = 2;
const PTRACE_PEEKUSER: Word = 3;
const PTRACE_POKETEXT: Word = 4;
const PTRACE_POKEDATA: Word = 5;
const PTRACE_POKEUSER: Word = 6;
const PTRACE_CONT: Word = 7;
const PTRACE_KILL: Word = 8;
const PTRACE_SINGLESTEP: Word = 9;
const PTRACE_GETREGS: Word = 12;
const PTRACE_SETREGS: Word = 13;
const PTRACE_GETFPREGS: Word = 14;
const PTRACE_SETFPREGS: Word = 15;
const PTRACE_ATTACH: Word = 16;
const PTRACE_DETACH: Word = 17;
const PTRACE_GETFPXREGS: Word = 18;
const PTRACE_SYSCALL: Word = 24;
const PTRACE_SETOPTIONS: Word = 0x4200;
const PTRACE_GETEVENTMSG: Word = 0x4201;
const PTRACE_GETSIGINFO: Word = 0x4202;
const PTRACE_SETSIGINFO: Word = 0x4203;
const PTRACE_GETREGSET: Word = 0x4204;
const PTRACE_SETREGSET: Word = 0x4205;
// ARM-specific requests kept for the compatibility mode.
const PTRACE_GETVFPREGS: Word = 27;
const PTRACE_SET_SYSCALL: Word = 23;
const PTRACE_SINGLEBLOCK: Word = 33;

/// The actual ptrace syscall is always cancelled: everything is emulated
/// at the exit stage.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    tracee.regs.cancel_syscall("ptrace is emulated");
    Ok(())
}

pub fn exit(proot: &PRoot, tracee: &mut Tracee) -> Result<Word> {
    let request = tracee.regs.get(Original, SysArg(SysArg1));
    let target_pid = Pid::from_raw(tracee.regs.get(Original, SysArg(SysArg2)) as i32);
    let address = tracee.regs.get(Original, SysArg(SysArg3));
    let data = tracee.regs.get(Original, SysArg(SysArg4));

    debug!(
        "-- {} ptrace(request: {:#x}, pid: {}, addr: {:#x}, data: {:#x})",
        tracee.pid, request, target_pid, address, data
    );

    if request == PTRACE_TRACEME {
        // A tracee may have only one ptracer.
        if tracee.as_ptracee.ptracer.is_some() {
            return Err(Error::errno(EPERM));
        }

        let parent_pid = match tracee.parent {
            Some(parent_pid) => parent_pid,
            None => return Err(Error::errno(EPERM)),
        };
        let parent = match proot.get_tracee(parent_pid) {
            Some(parent) => parent,
            None => return Err(Error::errno(EPERM)),
        };

        tracee.as_ptracee.ptracer = Some(parent_pid);
        parent.borrow_mut().as_ptracer.nb_ptracees += 1;

        /* The emulated ptracer may install its own seccomp filters, which
         * would race with the acceleration: disable it for this subtree. */
        tracee.seccomp = false;

        return Ok(0);
    }

    if request == PTRACE_ATTACH {
        if target_pid == tracee.pid {
            return Err(Error::errno(EPERM));
        }
        let ptracee = match proot.get_tracee(target_pid) {
            Some(ptracee) => ptracee,
            None => return Err(Error::errno(ESRCH)),
        };
        {
            let mut ptracee = ptracee.borrow_mut();
            if ptracee.as_ptracee.ptracer.is_some() {
                return Err(Error::errno(EPERM));
            }
            ptracee.as_ptracee.ptracer = Some(tracee.pid);
            ptracee.seccomp = false;
        }
        tracee.as_ptracer.nb_ptracees += 1;

        kill(target_pid, Signal::SIGSTOP)?;
        return Ok(0);
    }

    // From this point, the target has to be an already attached ptracee.
    if target_pid == tracee.pid {
        return Err(Error::errno(ESRCH));
    }
    let ptracee = match proot.get_tracee(target_pid) {
        Some(ptracee) => ptracee,
        None => return Err(Error::errno(ESRCH)),
    };
    if ptracee.borrow().as_ptracee.ptracer != Some(tracee.pid) {
        return Err(Error::errno(ESRCH));
    }
    let mut ptracee = ptracee.borrow_mut();

    match request {
        PTRACE_DETACH => {
            detach_from_ptracer(&mut ptracee, tracee);
            restart_ptracee(&mut ptracee, signal_from_data(data));
            Ok(0)
        }
        PTRACE_KILL => {
            kill(target_pid, Signal::SIGKILL)?;
            Ok(0)
        }
        PTRACE_CONT | PTRACE_SYSCALL | PTRACE_SINGLESTEP | PTRACE_SINGLEBLOCK => {
            ptracee.as_ptracee.ignore_syscalls = request == PTRACE_CONT;
            if request == PTRACE_SINGLESTEP || request == PTRACE_SINGLEBLOCK {
                ptracee.restart_how = TraceeRestartMethod::SingleStep;
            }
            restart_ptracee(&mut ptracee, signal_from_data(data));
            Ok(0)
        }
        PTRACE_SETOPTIONS => {
            ptracee.as_ptracee.options = data;
            Ok(0)
        }
        PTRACE_GETEVENTMSG => {
            let message = ptracee.as_ptracee.event_message;
            tracee.regs.write_word(data, message)?;
            Ok(0)
        }
        PTRACE_PEEKTEXT | PTRACE_PEEKDATA | PTRACE_PEEKUSER => {
            let word = if request == PTRACE_PEEKUSER {
                peek_user(ptracee.pid, address)?
            } else {
                peek_word(ptracee.pid, address as *mut Word)?
            };

            /* The raw syscall stores the peeked word at the address given
             * by the data parameter. */
            tracee.regs.write_word(data, word)?;
            Ok(0)
        }
        PTRACE_POKETEXT | PTRACE_POKEDATA | PTRACE_POKEUSER => {
            let value = if tracee.regs.is_32on64() {
                // Preserve the high halves of the target's words.
                let existing = peek_word(ptracee.pid, address as *mut Word)?;
                (existing & !0xffff_ffff) | (data & 0xffff_ffff)
            } else {
                data
            };

            if request == PTRACE_POKEUSER {
                poke_user(ptracee.pid, address, value)?;
            } else {
                ptracee.regs.write_word(address, value)?;
            }
            Ok(0)
        }
        PTRACE_GETREGS => {
            let regs: RegisterSet = nix_ptrace::getregs(ptracee.pid)?;
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    &regs as *const RegisterSet as *const u8,
                    size_of::<RegisterSet>(),
                )
            };
            tracee.regs.write_data(data as *mut c_void, bytes, false)?;
            Ok(0)
        }
        PTRACE_SETREGS => {
            let regs = read_struct_from(tracee, data)?;
            nix_ptrace::setregs(ptracee.pid, regs)?;
            // keep our own cache coherent
            let _ = ptracee.regs.fetch_regs();
            Ok(0)
        }
        PTRACE_GETREGSET | PTRACE_SETREGSET => {
            translate_regset(tracee, &mut ptracee, request, address, data)
        }
        PTRACE_GETSIGINFO => {
            let siginfo = nix_ptrace::getsiginfo(ptracee.pid)?;
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    &siginfo as *const libc::siginfo_t as *const u8,
                    size_of::<libc::siginfo_t>(),
                )
            };
            tracee.regs.write_data(data as *mut c_void, bytes, false)?;
            Ok(0)
        }
        PTRACE_SETSIGINFO => {
            let siginfo: libc::siginfo_t = read_plain_struct_from(tracee, data)?;
            nix_ptrace::setsiginfo(ptracee.pid, &siginfo)?;
            Ok(0)
        }
        PTRACE_SET_SYSCALL => {
            ptracee.regs.fetch_regs()?;
            ptracee
                .regs
                .set_sys_num(data as usize, "emulated PTRACE_SET_SYSCALL");
            ptracee.regs.push_regs()?;
            Ok(0)
        }
        PTRACE_GETFPREGS | PTRACE_GETVFPREGS | PTRACE_GETFPXREGS | PTRACE_SETFPREGS => {
            // Not supported under the compatibility mode, and of little
            // use otherwise.
            Err(Error::errno(ENOTSUP))
        }
        _ => {
            warn!(
                "-- {} unsupported ptrace request {:#x}",
                tracee.pid, request
            );
            Err(Error::errno(ENOTSUP))
        }
    }
}

/// Unlinks a ptracee from its ptracer.
pub fn detach_from_ptracer(ptracee: &mut Tracee, ptracer: &mut Tracee) {
    ptracee.as_ptracee.ptracer = None;
    ptracee.as_ptracee.event_proot = None;
    ptracee.as_ptracee.event_ptracer = None;

    assert!(ptracer.as_ptracer.nb_ptracees > 0);
    ptracer.as_ptracer.nb_ptracees -= 1;
}

/// Resumes a ptracee parked by an emulated ptrace stop.
fn restart_ptracee(ptracee: &mut Tracee, signal: Option<Signal>) {
    if ptracee.restart_how == TraceeRestartMethod::None
        || ptracee.restart_how == TraceeRestartMethod::DoNotRestart
    {
        ptracee.restart_how = if ptracee.seccomp {
            TraceeRestartMethod::WithoutExitStage
        } else {
            TraceeRestartMethod::WithExitStage
        };
    }
    ptracee.restart(signal);
}

fn signal_from_data(data: Word) -> Option<Signal> {
    use std::convert::TryFrom;
    if data == 0 {
        None
    } else {
        Signal::try_from(data as i32).ok()
    }
}

fn peek_user(pid: Pid, offset: Word) -> Result<Word> {
    let word = unsafe {
        libc::ptrace(
            libc::PTRACE_PEEKUSER,
            pid.as_raw(),
            offset as *mut c_void,
            std::ptr::null_mut::<c_void>(),
        )
    };
    Ok(word as Word)
}

fn poke_user(pid: Pid, offset: Word, value: Word) -> Result<()> {
    let status = unsafe {
        libc::ptrace(
            libc::PTRACE_POKEUSER,
            pid.as_raw(),
            offset as *mut c_void,
            value as *mut c_void,
        )
    };
    if status < 0 {
        return Err(Error::errno(EFAULT));
    }
    Ok(())
}

/// GETREGSET/SETREGSET carry an iovec in the ptracer's memory; the regset
/// itself transits through a local buffer, with size plumbing in both
/// directions.
fn translate_regset(
    tracer: &mut Tracee,
    ptracee: &mut Tracee,
    request: Word,
    regset_kind: Word,
    iovec_address: Word,
) -> Result<Word> {
    let word_size = size_of::<Word>() as Word;

    let local_base = peek_word(tracer.regs.get_pid(), iovec_address as *mut Word)?;
    let local_size = peek_word(
        tracer.regs.get_pid(),
        (iovec_address + word_size) as *mut Word,
    )?;

    let mut buffer = vec![0u8; (local_size as usize).min(4096)];
    let mut iovec = libc::iovec {
        iov_base: buffer.as_mut_ptr() as *mut c_void,
        iov_len: buffer.len(),
    };

    if request == PTRACE_SETREGSET {
        let bytes = read_string_bounded(tracer, local_base, buffer.len())?;
        buffer[..bytes.len()].copy_from_slice(&bytes);
    }

    let raw_request = if request == PTRACE_GETREGSET {
        libc::PTRACE_GETREGSET
    } else {
        libc::PTRACE_SETREGSET
    };
    let status = unsafe {
        libc::ptrace(
            raw_request,
            ptracee.pid.as_raw(),
            regset_kind as *mut c_void,
            &mut iovec as *mut libc::iovec,
        )
    };
    if status < 0 {
        return Err(Error::from(Errno::last()));
    }

    if request == PTRACE_GETREGSET {
        tracer
            .regs
            .write_data(local_base as *mut c_void, &buffer[..iovec.iov_len], false)?;
        // Report the actual size back through the iovec.
        tracer
            .regs
            .write_word(iovec_address + word_size, iovec.iov_len as Word)?;
    }

    Ok(0)
}

fn read_struct_from(tracee: &Tracee, address: Word) -> Result<RegisterSet> {
    read_plain_struct_from(tracee, address)
}

fn read_plain_struct_from<T: Copy>(tracee: &Tracee, address: Word) -> Result<T> {
    let size = size_of::<T>();
    let bytes = read_exact_bytes(tracee, address, size)?;
    Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

fn read_exact_bytes(tracee: &Tracee, address: Word, size: usize) -> Result<Vec<u8>> {
    let pid = tracee.regs.get_pid();
    let word_size = size_of::<Word>();
    let mut bytes = Vec::with_capacity(size + word_size);

    let mut offset = 0;
    while offset < size {
        let word = peek_word(pid, (address + offset as Word) as *mut Word)?;
        bytes.extend_from_slice(&word.to_ne_bytes());
        offset += word_size;
    }
    bytes.truncate(size);
    Ok(bytes)
}

fn read_string_bounded(tracee: &Tracee, address: Word, size: usize) -> Result<Vec<u8>> {
    read_exact_bytes(tracee, address, size)
}
