use crate::arch::VOID_SYSNUM;
use crate::errors::Error;
use crate::kernel::execve;
use crate::kernel::groups::{syscall_group_from_sysnum, SyscallGroup};
use crate::kernel::heap::brk;
use crate::kernel::ptrace::{ptrace, wait};
use crate::kernel::socket::accept;
use crate::kernel::standard::*;
use crate::process::proot::PRoot;
use crate::process::tracee::Tracee;
use crate::register::{Modified, Original, SysResult, Word};

pub enum SyscallExitResult {
    /// The SysResult register won't be overwritten.
    None,
    /// New value for the syscall result.
    Value(Word),
    /// An error happened during the exit translation: the register
    /// becomes `-errno`.
    Error(Error),
}

pub fn translate(proot: &PRoot, tracee: &mut Tracee) {
    let sysnum = tracee.regs.get_sys_num(Original);
    let group = syscall_group_from_sysnum(sysnum);

    debug!("-- {} exit ({:?}, {:?})", tracee.pid, sysnum, group);

    let was_cancelled = tracee.regs.get_sys_num(Modified) == VOID_SYSNUM as usize;

    let result = match group {
        SyscallGroup::Brk => {
            brk::exit(tracee);
            SyscallExitResult::None
        }
        SyscallGroup::GetCwd => match getcwd::exit(tracee) {
            Ok(value) => SyscallExitResult::Value(value),
            Err(error) => SyscallExitResult::Error(error),
        },
        // Fully emulated at the enter stage.
        SyscallGroup::Chdir => SyscallExitResult::Value(0),
        SyscallGroup::Accept | SyscallGroup::GetSockOrPeerName => match accept::exit(tracee) {
            Ok(()) => SyscallExitResult::None,
            Err(error) => SyscallExitResult::Error(error),
        },
        SyscallGroup::Rename => match link_rename::exit(tracee) {
            Ok(()) => SyscallExitResult::None,
            Err(error) => SyscallExitResult::Error(error),
        },
        SyscallGroup::RenameAt => match rename_at::exit(tracee) {
            Ok(()) => SyscallExitResult::None,
            Err(error) => SyscallExitResult::Error(error),
        },
        SyscallGroup::ReadLink | SyscallGroup::ReadLinkAt => match readlink_at::exit(tracee) {
            Ok(Some(value)) => SyscallExitResult::Value(value),
            Ok(None) => SyscallExitResult::None,
            Err(error) => SyscallExitResult::Error(error),
        },
        SyscallGroup::Prctl => {
            if was_cancelled {
                prctl::exit(tracee);
            }
            SyscallExitResult::None
        }
        SyscallGroup::Execve => match execve::exit::translate(tracee) {
            Ok(()) => SyscallExitResult::None,
            Err(error) => SyscallExitResult::Error(error),
        },
        SyscallGroup::Ptrace => match ptrace::exit(proot, tracee) {
            Ok(value) => SyscallExitResult::Value(value),
            Err(error) => SyscallExitResult::Error(error),
        },
        SyscallGroup::Wait => {
            if !was_cancelled {
                SyscallExitResult::None
            } else {
                match wait::exit(proot, tracee) {
                    Ok(Some(value)) => SyscallExitResult::Value(value),
                    Ok(None) => SyscallExitResult::None,
                    Err(error) => SyscallExitResult::Error(error),
                }
            }
        }
        _ => SyscallExitResult::None,
    };

    match result {
        SyscallExitResult::None => (),
        SyscallExitResult::Value(value) => tracee.regs.set(
            SysResult,
            value as Word,
            "following exit translation, setting new syscall result",
        ),
        SyscallExitResult::Error(error) => tracee.regs.set(
            SysResult,
            // errno is negative
            -(error.get_errno() as i64) as Word,
            "following error during exit translation, setting errno",
        ),
    };
}
