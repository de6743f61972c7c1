use crate::errors::*;
use crate::kernel::standard::translate_path_at;
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceWriter, SysArg, SysArg2, SysArg3};

/// Translates symlinkat(2): like symlink(2), but the link path is relative
/// to a directory file descriptor.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let dirfd = tracee.regs.get(Current, SysArg(SysArg2));

    let host_path = translate_path_at(tracee, dirfd, SysArg3, false)?;

    tracee.regs.set_sysarg_path(
        SysArg3,
        &host_path,
        "during enter sym_link_at translation, setting host path",
    )?;

    Ok(())
}
