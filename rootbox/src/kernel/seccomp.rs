//! Seccomp acceleration and SIGSYS conversion.
//!
//! A BPF program is installed in the first tracee before it execs: the
//! syscalls of interest return `SECCOMP_RET_TRACE` (so the tracer gets a
//! cheap PTRACE_EVENT_SECCOMP at sysenter instead of systematic
//! PTRACE_SYSCALL stops), everything else is allowed.
//!
//! Independently, the host kernel's own policy (as found on Android) may
//! block legacy syscalls with SIGSYS; those are rewritten on the fly into
//! their `*at` equivalents and restarted.

use std::env;
use std::ffi::CString;
use std::mem::size_of;
use std::os::unix::ffi::OsStrExt;

use libc::{c_void, sock_filter, sock_fprog};
use sc::nr;

use crate::arch::{AUDIT_ARCH, SYSTRAP_SIZE};
use crate::errors::*;
use crate::filesystem::Translator;
use crate::process::tracee::{Tracee, TraceeRestartMethod, TraceeStatus};
use crate::register::{
    Current, InstrPointer, OriginalSeccompRewrite, PtraceWriter, SysArg, SysArg1, SysArg2,
    SysArg3, SysArg4, SysArg5, SysArg6, SysNum, SysResult, Word,
};

const SECCOMP_RET_KILL: u32 = 0x0000_0000;
const SECCOMP_RET_TRACE: u32 = 0x7ff0_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

/// Carried in the BPF return data: the tracer must also stop at the exit
/// stage of this syscall.
pub const FILTER_SYSEXIT: u32 = 0x1;

const PR_SET_NO_NEW_PRIVS: libc::c_int = 38;
const PR_SET_SECCOMP: libc::c_int = 22;
const SECCOMP_MODE_FILTER: libc::c_ulong = 2;

/// Which of the seccomp event and the syscall-enter stop arrives first
/// depends on the kernel flavour; it is observed at runtime rather than
/// assumed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeccompOrdering {
    Unknown,
    /// PTRACE_EVENT_SECCOMP arrives before the syscall-enter stop.
    SeccompFirst,
    /// The syscall-enter stop arrives first (older kernels).
    SigtrapFirst,
}

impl SeccompOrdering {
    pub fn from_environment() -> Self {
        if env::var_os("PROOT_ASSUME_NEW_SECCOMP").is_some() {
            SeccompOrdering::SeccompFirst
        } else {
            SeccompOrdering::Unknown
        }
    }
}

pub struct FilteredSysnum {
    pub sysnum: usize,
    pub flags: u32,
}

impl FilteredSysnum {
    const fn new(sysnum: usize, flags: u32) -> Self {
        FilteredSysnum { sysnum, flags }
    }
}

#[cfg(target_arch = "x86_64")]
lazy_static! {
    /// Syscalls the tracer wants to be notified about.
    pub static ref FILTERED_SYSNUMS: Vec<FilteredSysnum> = vec![
        FilteredSysnum::new(nr::ACCEPT, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::ACCEPT4, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::ACCESS, 0),
        FilteredSysnum::new(nr::ACCT, 0),
        FilteredSysnum::new(nr::BIND, 0),
        FilteredSysnum::new(nr::BRK, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::CHDIR, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::CHMOD, 0),
        FilteredSysnum::new(nr::CHOWN, 0),
        FilteredSysnum::new(nr::CHROOT, 0),
        FilteredSysnum::new(nr::CONNECT, 0),
        FilteredSysnum::new(nr::CREAT, 0),
        FilteredSysnum::new(nr::EXECVE, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::EXECVEAT, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::FACCESSAT, 0),
        FilteredSysnum::new(nr::FCHDIR, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::FCHMODAT, 0),
        FilteredSysnum::new(nr::FCHOWNAT, 0),
        FilteredSysnum::new(nr::FUTIMESAT, 0),
        FilteredSysnum::new(nr::GETCWD, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::GETPEERNAME, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::GETSOCKNAME, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::GETXATTR, 0),
        FilteredSysnum::new(nr::INOTIFY_ADD_WATCH, 0),
        FilteredSysnum::new(nr::LCHOWN, 0),
        FilteredSysnum::new(nr::LGETXATTR, 0),
        FilteredSysnum::new(nr::LINK, 0),
        FilteredSysnum::new(nr::LINKAT, 0),
        FilteredSysnum::new(nr::LISTXATTR, 0),
        FilteredSysnum::new(nr::LLISTXATTR, 0),
        FilteredSysnum::new(nr::LREMOVEXATTR, 0),
        FilteredSysnum::new(nr::LSETXATTR, 0),
        FilteredSysnum::new(nr::LSTAT, 0),
        FilteredSysnum::new(nr::MKDIR, 0),
        FilteredSysnum::new(nr::MKDIRAT, 0),
        FilteredSysnum::new(nr::MKNOD, 0),
        FilteredSysnum::new(nr::MKNODAT, 0),
        FilteredSysnum::new(nr::MOUNT, 0),
        FilteredSysnum::new(nr::NAME_TO_HANDLE_AT, 0),
        FilteredSysnum::new(nr::NEWFSTATAT, 0),
        FilteredSysnum::new(nr::OPEN, 0),
        FilteredSysnum::new(nr::OPENAT, 0),
        FilteredSysnum::new(nr::PIVOT_ROOT, 0),
        FilteredSysnum::new(nr::PRCTL, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::PTRACE, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::READLINK, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::READLINKAT, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::REMOVEXATTR, 0),
        FilteredSysnum::new(nr::RENAME, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::RENAMEAT, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::RENAMEAT2, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::RMDIR, 0),
        FilteredSysnum::new(nr::SETXATTR, 0),
        FilteredSysnum::new(nr::STAT, 0),
        FilteredSysnum::new(nr::STATFS, 0),
        FilteredSysnum::new(nr::STATX, 0),
        FilteredSysnum::new(nr::SWAPOFF, 0),
        FilteredSysnum::new(nr::SWAPON, 0),
        FilteredSysnum::new(nr::SYMLINK, 0),
        FilteredSysnum::new(nr::SYMLINKAT, 0),
        FilteredSysnum::new(nr::TRUNCATE, 0),
        FilteredSysnum::new(nr::UMOUNT2, 0),
        FilteredSysnum::new(nr::UNLINK, 0),
        FilteredSysnum::new(nr::UNLINKAT, 0),
        FilteredSysnum::new(nr::USELIB, 0),
        FilteredSysnum::new(nr::UTIME, 0),
        FilteredSysnum::new(nr::UTIMENSAT, 0),
        FilteredSysnum::new(nr::UTIMES, 0),
        FilteredSysnum::new(nr::WAIT4, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::WAITID, FILTER_SYSEXIT),
    ];
}

#[cfg(target_arch = "aarch64")]
lazy_static! {
    pub static ref FILTERED_SYSNUMS: Vec<FilteredSysnum> = vec![
        FilteredSysnum::new(nr::ACCEPT, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::ACCEPT4, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::ACCT, 0),
        FilteredSysnum::new(nr::BIND, 0),
        FilteredSysnum::new(nr::BRK, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::CHDIR, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::CHROOT, 0),
        FilteredSysnum::new(nr::CONNECT, 0),
        FilteredSysnum::new(nr::EXECVE, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::EXECVEAT, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::FACCESSAT, 0),
        FilteredSysnum::new(nr::FCHDIR, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::FCHMODAT, 0),
        FilteredSysnum::new(nr::FCHOWNAT, 0),
        FilteredSysnum::new(nr::GETCWD, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::GETPEERNAME, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::GETSOCKNAME, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::GETXATTR, 0),
        FilteredSysnum::new(nr::INOTIFY_ADD_WATCH, 0),
        FilteredSysnum::new(nr::LGETXATTR, 0),
        FilteredSysnum::new(nr::LINKAT, 0),
        FilteredSysnum::new(nr::LISTXATTR, 0),
        FilteredSysnum::new(nr::LLISTXATTR, 0),
        FilteredSysnum::new(nr::LREMOVEXATTR, 0),
        FilteredSysnum::new(nr::LSETXATTR, 0),
        FilteredSysnum::new(nr::MKDIRAT, 0),
        FilteredSysnum::new(nr::MKNODAT, 0),
        FilteredSysnum::new(nr::MOUNT, 0),
        FilteredSysnum::new(nr::NAME_TO_HANDLE_AT, 0),
        FilteredSysnum::new(nr::NEWFSTATAT, 0),
        FilteredSysnum::new(nr::OPENAT, 0),
        FilteredSysnum::new(nr::PIVOT_ROOT, 0),
        FilteredSysnum::new(nr::PRCTL, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::PTRACE, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::READLINKAT, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::REMOVEXATTR, 0),
        FilteredSysnum::new(nr::RENAMEAT, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::RENAMEAT2, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::SETXATTR, 0),
        FilteredSysnum::new(nr::STATFS, 0),
        FilteredSysnum::new(nr::STATX, 0),
        FilteredSysnum::new(nr::SWAPOFF, 0),
        FilteredSysnum::new(nr::SWAPON, 0),
        FilteredSysnum::new(nr::SYMLINKAT, 0),
        FilteredSysnum::new(nr::TRUNCATE, 0),
        FilteredSysnum::new(nr::UMOUNT2, 0),
        FilteredSysnum::new(nr::UNLINKAT, 0),
        FilteredSysnum::new(nr::UTIMENSAT, 0),
        FilteredSysnum::new(nr::WAIT4, FILTER_SYSEXIT),
        FilteredSysnum::new(nr::WAITID, FILTER_SYSEXIT),
    ];
}

/// Whether the exit stage of this syscall matters to the tracer.
pub fn needs_sysexit(sysnum: usize) -> bool {
    FILTERED_SYSNUMS
        .iter()
        .any(|entry| entry.sysnum == sysnum && entry.flags & FILTER_SYSEXIT != 0)
}

pub fn is_filtered(sysnum: usize) -> bool {
    FILTERED_SYSNUMS.iter().any(|entry| entry.sysnum == sysnum)
}

const fn bpf_stmt(code: u16, k: u32) -> sock_filter {
    sock_filter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

const fn bpf_jump(code: u16, k: u32, jt: u8, jf: u8) -> sock_filter {
    sock_filter { code, jt, jf, k }
}

const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

const SECCOMP_DATA_NR_OFFSET: u32 = 0;
const SECCOMP_DATA_ARCH_OFFSET: u32 = 4;

/// Builds the BPF program: dispatch on the architecture, then return
/// TRACE (with the FILTER_SYSEXIT bit in the return data) for each
/// filtered syscall, ALLOW otherwise. A terminal KILL guards against
/// foreign architectures.
pub fn build_filter() -> Vec<sock_filter> {
    let mut program = vec![
        bpf_stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_ARCH_OFFSET),
        bpf_jump(BPF_JMP | BPF_JEQ | BPF_K, AUDIT_ARCH, 1, 0),
        bpf_stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL),
        bpf_stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_NR_OFFSET),
    ];

    for entry in FILTERED_SYSNUMS.iter() {
        program.push(bpf_jump(
            BPF_JMP | BPF_JEQ | BPF_K,
            entry.sysnum as u32,
            0,
            1,
        ));
        program.push(bpf_stmt(
            BPF_RET | BPF_K,
            SECCOMP_RET_TRACE | entry.flags,
        ));
    }

    program.push(bpf_stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));
    program
}

/// Installs the filter in the calling process; meant to be run in the
/// first tracee right before it execs.
pub fn install_filter() -> Result<()> {
    let filter = build_filter();
    let program = sock_fprog {
        len: filter.len() as u16,
        filter: filter.as_ptr() as *mut sock_filter,
    };

    let status = unsafe { libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if status < 0 {
        return Err(Error::from(Errno::last()));
    }

    let status = unsafe {
        libc::prctl(
            PR_SET_SECCOMP,
            SECCOMP_MODE_FILTER,
            &program as *const sock_fprog,
        )
    };
    if status < 0 {
        return Err(Error::from(Errno::last()));
    }

    Ok(())
}

const TMPFS_MAGIC: i64 = 0x0102_1994;

/// A SIGSYS raised by the host's own seccomp policy is a rewrite request:
/// the blocked legacy syscall is converted into its modern equivalent,
/// the trap is re-executed, and the tracee never sees the signal.
pub fn handle_sigsys(tracee: &mut Tracee) -> Result<()> {
    // Whatever stage we thought the tracee was in, the kernel just
    // skipped the syscall: the next stop is an enter one.
    tracee.status = TraceeStatus::SysEnter;

    tracee.regs.fetch_regs()?;
    tracee.regs.save_current_regs(OriginalSeccompRewrite);
    // The rewritten registers must reach the kernel untouched.
    tracee.regs.set_restore_original_regs(false);

    let sysnum = tracee.regs.get_sys_num(Current);
    debug!("-- {} SIGSYS for syscall {}", tracee.pid, sysnum);

    let rewritten = rewrite_blocked_syscall(tracee, sysnum)?;

    match rewritten {
        SigsysAction::Restart => {
            // Move the instruction pointer back onto the trap so the
            // rewritten syscall executes; the stashed registers are put
            // back once it completes, so the tracee never observes the
            // rewrite.
            let instr_pointer = tracee.regs.get(Current, InstrPointer);
            tracee.regs.set(
                InstrPointer,
                instr_pointer - SYSTRAP_SIZE,
                "re-execute the rewritten syscall",
            );
            tracee.seccomp_rewrite_pending = true;
            tracee.restart_how = TraceeRestartMethod::WithExitStage;
        }
        SigsysAction::Emulated => {
            // The result was set in place, nothing to re-execute.
            tracee.restart_how = TraceeRestartMethod::WithoutExitStage;
        }
    }

    tracee.regs.push_regs()?;
    Ok(())
}

enum SigsysAction {
    /// The registers were rewritten; rewind and restart the trap.
    Restart,
    /// The syscall was emulated tracer-side; the result is already set.
    Emulated,
}

#[cfg(target_arch = "x86_64")]
fn rewrite_blocked_syscall(tracee: &mut Tracee, sysnum: usize) -> Result<SigsysAction> {
    let arg = |tracee: &Tracee, index| tracee.regs.get(Current, SysArg(index));

    match sysnum {
        _ if sysnum == nr::OPEN => {
            let (path, flags, mode) = (
                arg(tracee, SysArg1),
                arg(tracee, SysArg2),
                arg(tracee, SysArg3),
            );
            set_args(tracee, nr::OPENAT, &[at_fdcwd(), path, flags, mode]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::STAT || sysnum == nr::LSTAT => {
            let nofollow = if sysnum == nr::LSTAT {
                libc::AT_SYMLINK_NOFOLLOW as Word
            } else {
                0
            };
            let (path, buf) = (arg(tracee, SysArg1), arg(tracee, SysArg2));
            set_args(tracee, nr::NEWFSTATAT, &[at_fdcwd(), path, buf, nofollow]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::ACCESS => {
            let (path, mode) = (arg(tracee, SysArg1), arg(tracee, SysArg2));
            set_args(tracee, nr::FACCESSAT, &[at_fdcwd(), path, mode]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::MKDIR => {
            let (path, mode) = (arg(tracee, SysArg1), arg(tracee, SysArg2));
            set_args(tracee, nr::MKDIRAT, &[at_fdcwd(), path, mode]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::UNLINK => {
            let path = arg(tracee, SysArg1);
            set_args(tracee, nr::UNLINKAT, &[at_fdcwd(), path, 0]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::RMDIR => {
            let path = arg(tracee, SysArg1);
            set_args(
                tracee,
                nr::UNLINKAT,
                &[at_fdcwd(), path, libc::AT_REMOVEDIR as Word],
            );
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::RENAME => {
            let (old, new) = (arg(tracee, SysArg1), arg(tracee, SysArg2));
            set_args(tracee, nr::RENAMEAT, &[at_fdcwd(), old, at_fdcwd(), new]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::SYMLINK => {
            let (target, link) = (arg(tracee, SysArg1), arg(tracee, SysArg2));
            set_args(tracee, nr::SYMLINKAT, &[target, at_fdcwd(), link]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::LINK => {
            let (old, new) = (arg(tracee, SysArg1), arg(tracee, SysArg2));
            set_args(tracee, nr::LINKAT, &[at_fdcwd(), old, at_fdcwd(), new, 0]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::CHMOD => {
            let (path, mode) = (arg(tracee, SysArg1), arg(tracee, SysArg2));
            set_args(tracee, nr::FCHMODAT, &[at_fdcwd(), path, mode]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::CHOWN || sysnum == nr::LCHOWN => {
            let nofollow = if sysnum == nr::LCHOWN {
                libc::AT_SYMLINK_NOFOLLOW as Word
            } else {
                0
            };
            let (path, owner, group) = (
                arg(tracee, SysArg1),
                arg(tracee, SysArg2),
                arg(tracee, SysArg3),
            );
            set_args(tracee, nr::FCHOWNAT, &[at_fdcwd(), path, owner, group, nofollow]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::READLINK => {
            let (path, buf, size) = (
                arg(tracee, SysArg1),
                arg(tracee, SysArg2),
                arg(tracee, SysArg3),
            );
            set_args(tracee, nr::READLINKAT, &[at_fdcwd(), path, buf, size]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::PIPE => {
            let fds = arg(tracee, SysArg1);
            set_args(tracee, nr::PIPE2, &[fds, 0]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::DUP2 => {
            let (old, new) = (arg(tracee, SysArg1), arg(tracee, SysArg2));
            if old == new {
                // dup3(2) rejects equal descriptors, dup2(2) does not.
                tracee
                    .regs
                    .set(SysResult, new, "dup2 on the same descriptor");
                return Ok(SigsysAction::Emulated);
            }
            set_args(tracee, nr::DUP3, &[old, new, 0]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::GETPGRP => {
            set_args(tracee, nr::GETPGID, &[0]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::POLL => {
            let (fds, nfds, timeout) = (
                arg(tracee, SysArg1),
                arg(tracee, SysArg2),
                arg(tracee, SysArg3) as i64,
            );
            let timespec_address = write_scratch_timespec_ms(tracee, timeout)?;
            set_args(tracee, nr::PPOLL, &[fds, nfds, timespec_address, 0]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::SELECT => {
            let (nfds, rfds, wfds, efds) = (
                arg(tracee, SysArg1),
                arg(tracee, SysArg2),
                arg(tracee, SysArg3),
                arg(tracee, SysArg4),
            );
            let timeval_address = arg(tracee, SysArg5);
            let timespec_address = convert_timeval_to_timespec(tracee, timeval_address)?;
            set_args(
                tracee,
                nr::PSELECT6,
                &[nfds, rfds, wfds, efds, timespec_address, 0],
            );
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::UTIME || sysnum == nr::UTIMES => {
            // utimensat(AT_FDCWD, path, NULL, 0) sets both times to now,
            // which is also what utime(path, NULL) means; non-null
            // arguments are converted to a timespec pair.
            let (path, times) = (arg(tracee, SysArg1), arg(tracee, SysArg2));
            let times_address = if times == 0 {
                0
            } else if sysnum == nr::UTIME {
                convert_utimbuf_to_timespecs(tracee, times)?
            } else {
                convert_timevals_to_timespecs(tracee, times)?
            };
            set_args(tracee, nr::UTIMENSAT, &[at_fdcwd(), path, times_address, 0]);
            Ok(SigsysAction::Restart)
        }
        _ if sysnum == nr::STATFS => emulate_statfs(tracee),
        _ => {
            warn!(
                "-- {} unknown blocked syscall {}, returning -ENOSYS",
                tracee.pid, sysnum
            );
            tracee.regs.set(
                SysResult,
                -(ENOSYS as i64) as Word,
                "blocked syscall with no rewrite",
            );
            Ok(SigsysAction::Emulated)
        }
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn rewrite_blocked_syscall(tracee: &mut Tracee, sysnum: usize) -> Result<SigsysAction> {
    // The legacy syscalls do not exist on this ABI; nothing to rewrite.
    warn!(
        "-- {} unknown blocked syscall {}, returning -ENOSYS",
        tracee.pid, sysnum
    );
    tracee.regs.set(
        SysResult,
        -(ENOSYS as i64) as Word,
        "blocked syscall with no rewrite",
    );
    Ok(SigsysAction::Emulated)
}

fn at_fdcwd() -> Word {
    libc::AT_FDCWD as i64 as Word
}

fn set_args(tracee: &mut Tracee, sysnum: usize, args: &[Word]) {
    tracee.regs.set(SysNum, sysnum as Word, "rewritten syscall number");
    // At a signal stop the re-executed trap instruction takes its number
    // from the result register, not from the syscall slot.
    tracee
        .regs
        .set(SysResult, sysnum as Word, "rewritten syscall number (live)");
    let indexes = [SysArg1, SysArg2, SysArg3, SysArg4, SysArg5, SysArg6];
    for (index, value) in indexes.iter().zip(args.iter()) {
        tracee.regs.set(SysArg(*index), *value, "rewritten syscall argument");
    }
}

/// Writes a `timespec` below the tracee's stack (past the red zone) and
/// returns its address; a negative timeout means "infinite", i.e. NULL.
fn write_scratch_timespec_ms(tracee: &mut Tracee, timeout_ms: i64) -> Result<Word> {
    if timeout_ms < 0 {
        return Ok(0);
    }

    let timespec = libc::timespec {
        tv_sec: timeout_ms / 1000,
        tv_nsec: (timeout_ms % 1000) * 1_000_000,
    };
    write_scratch_timespecs(tracee, &[timespec])
}

fn write_scratch_timespecs(tracee: &mut Tracee, timespecs: &[libc::timespec]) -> Result<Word> {
    let size = size_of::<libc::timespec>() * timespecs.len();
    let stack_pointer = tracee.regs.get(Current, crate::register::StackPointer);
    let address = stack_pointer - crate::arch::RED_ZONE_SIZE as Word - size as Word;

    let bytes = unsafe {
        std::slice::from_raw_parts(timespecs.as_ptr() as *const u8, size)
    };
    tracee
        .regs
        .write_data(address as *mut c_void, bytes, false)?;
    Ok(address)
}

fn convert_timeval_to_timespec(tracee: &mut Tracee, timeval_address: Word) -> Result<Word> {
    if timeval_address == 0 {
        return Ok(0);
    }

    let pid = tracee.regs.get_pid();
    let tv_sec = crate::register::peek_word(pid, timeval_address as *mut Word)? as i64;
    let tv_usec = crate::register::peek_word(
        pid,
        (timeval_address + size_of::<Word>() as Word) as *mut Word,
    )? as i64;

    let timespec = libc::timespec {
        tv_sec,
        tv_nsec: tv_usec * 1000,
    };
    write_scratch_timespecs(tracee, &[timespec])
}

fn convert_timevals_to_timespecs(tracee: &mut Tracee, timevals_address: Word) -> Result<Word> {
    let pid = tracee.regs.get_pid();
    let word_size = size_of::<Word>() as Word;

    let mut timespecs = [libc::timespec { tv_sec: 0, tv_nsec: 0 }; 2];
    for (index, timespec) in timespecs.iter_mut().enumerate() {
        let base = timevals_address + (index as Word) * 2 * word_size;
        let tv_sec = crate::register::peek_word(pid, base as *mut Word)? as i64;
        let tv_usec = crate::register::peek_word(pid, (base + word_size) as *mut Word)? as i64;
        timespec.tv_sec = tv_sec;
        timespec.tv_nsec = tv_usec * 1000;
    }
    write_scratch_timespecs(tracee, &timespecs)
}

fn convert_utimbuf_to_timespecs(tracee: &mut Tracee, utimbuf_address: Word) -> Result<Word> {
    let pid = tracee.regs.get_pid();
    let word_size = size_of::<Word>() as Word;

    let actime = crate::register::peek_word(pid, utimbuf_address as *mut Word)? as i64;
    let modtime =
        crate::register::peek_word(pid, (utimbuf_address + word_size) as *mut Word)? as i64;

    let timespecs = [
        libc::timespec {
            tv_sec: actime,
            tv_nsec: 0,
        },
        libc::timespec {
            tv_sec: modtime,
            tv_nsec: 0,
        },
    ];
    write_scratch_timespecs(tracee, &timespecs)
}

/// statfs(2) is performed tracer-side: the path is translated, the host
/// answers, and the result is copied into the tracee. "/dev/shm" is
/// reported as tmpfs even when the host backs it with something else.
fn emulate_statfs(tracee: &mut Tracee) -> Result<SigsysAction> {
    use crate::register::PtraceReader;

    let raw_path = tracee.regs.get_sysarg_path(SysArg1)?;
    let buffer_address = tracee.regs.get(Current, SysArg(SysArg2));

    let is_dev_shm = raw_path.starts_with("/dev/shm");

    let host_path = tracee.fs.borrow().translate_path(&raw_path, true)?;
    let c_path = CString::new(host_path.as_os_str().as_bytes()).map_err(|_| Error::errno(EINVAL))?;

    let mut statfs: libc::statfs = unsafe { std::mem::zeroed() };
    let status = unsafe { libc::statfs(c_path.as_ptr(), &mut statfs) };
    if status < 0 {
        tracee.regs.set(
            SysResult,
            -(Errno::last() as i64) as Word,
            "emulated statfs failure",
        );
        return Ok(SigsysAction::Emulated);
    }

    if is_dev_shm {
        statfs.f_type = TMPFS_MAGIC;
    }

    let bytes = unsafe {
        std::slice::from_raw_parts(
            &statfs as *const libc::statfs as *const u8,
            size_of::<libc::statfs>(),
        )
    };
    tracee
        .regs
        .write_data(buffer_address as *mut c_void, bytes, false)?;
    tracee.regs.set(SysResult, 0, "emulated statfs success");

    Ok(SigsysAction::Emulated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_shape() {
        let filter = build_filter();

        // arch check + nr load + 2 instructions per entry + final allow
        assert_eq!(filter.len(), 4 + 2 * FILTERED_SYSNUMS.len() + 1);

        // the program ends with RET ALLOW
        let last = filter.last().unwrap();
        assert_eq!(last.code, BPF_RET | BPF_K);
        assert_eq!(last.k, SECCOMP_RET_ALLOW);

        // an unknown architecture is killed
        assert_eq!(filter[2].k, SECCOMP_RET_KILL);
    }

    #[test]
    fn test_filtered_sysnums_contain_the_core() {
        assert!(is_filtered(nr::EXECVE));
        assert!(needs_sysexit(nr::EXECVE));
        assert!(needs_sysexit(nr::PTRACE));
        assert!(needs_sysexit(nr::GETCWD));
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_open_is_filtered_without_sysexit() {
        assert!(is_filtered(nr::OPEN));
        assert!(!needs_sysexit(nr::OPEN));
    }
}
