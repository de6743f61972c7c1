use crate::errors::*;
use crate::kernel::standard::translate_path_at;
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceWriter, SysArg, SysArg1, SysArg2, SysArg4};

/// Translates newfstatat(2), fchownat(2), utimensat(2), statx(2) and
/// name_to_handle_at(2): the fourth argument carries the `AT_*` flags.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let dirfd = tracee.regs.get(Current, SysArg(SysArg1));
    let flags = tracee.regs.get(Current, SysArg(SysArg4)) as i32;

    let deref_final = flags & libc::AT_SYMLINK_NOFOLLOW == 0;

    let host_path = translate_path_at(tracee, dirfd, SysArg2, deref_final)?;

    tracee.regs.set_sysarg_path(
        SysArg2,
        &host_path,
        "during enter stat_at translation, setting host path",
    )?;

    Ok(())
}
