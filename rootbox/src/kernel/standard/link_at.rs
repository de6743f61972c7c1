use crate::errors::*;
use crate::kernel::standard::translate_path_at;
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceWriter, SysArg, SysArg1, SysArg2, SysArg3, SysArg4, SysArg5};

/// Translates linkat(2). `AT_SYMLINK_FOLLOW` in the flags argument makes
/// the kernel dereference the old path.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let old_dirfd = tracee.regs.get(Current, SysArg(SysArg1));
    let new_dirfd = tracee.regs.get(Current, SysArg(SysArg3));
    let flags = tracee.regs.get(Current, SysArg(SysArg5)) as i32;

    let deref_final = flags & libc::AT_SYMLINK_FOLLOW != 0;

    let old_host_path = translate_path_at(tracee, old_dirfd, SysArg2, deref_final)?;
    let new_host_path = translate_path_at(tracee, new_dirfd, SysArg4, false)?;

    tracee.regs.set_sysarg_path(
        SysArg2,
        &old_host_path,
        "during enter link_at translation, setting host path",
    )?;
    tracee.regs.set_sysarg_path(
        SysArg4,
        &new_host_path,
        "during enter link_at translation, setting host path",
    )?;

    Ok(())
}
