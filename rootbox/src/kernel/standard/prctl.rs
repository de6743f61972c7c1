use crate::errors::*;
use crate::process::tracee::Tracee;
use crate::register::{Current, SysArg, SysArg1, SysResult};

/// prctl(PR_SET_DUMPABLE, 0) would prevent this tracer from accessing the
/// tracee's memory, so the request is silently cancelled: the tracee
/// observes a success with no state change.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let option = tracee.regs.get(Current, SysArg(SysArg1)) as i32;

    if option == libc::PR_SET_DUMPABLE {
        tracee
            .regs
            .cancel_syscall("PR_SET_DUMPABLE would break tracee memory access");
    }

    Ok(())
}

pub fn exit(tracee: &mut Tracee) {
    let option = tracee.regs.get(crate::register::Original, SysArg(SysArg1)) as i32;

    if option == libc::PR_SET_DUMPABLE {
        tracee
            .regs
            .set(SysResult, 0, "cancelled PR_SET_DUMPABLE reports success");
    }
}
