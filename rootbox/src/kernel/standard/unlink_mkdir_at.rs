use crate::errors::*;
use crate::kernel::standard::translate_path_at;
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceWriter, SysArg, SysArg1, SysArg2};

/// Translates unlinkat(2) and mkdirat(2): the final component is the entry
/// itself, never dereferenced.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let dirfd = tracee.regs.get(Current, SysArg(SysArg1));

    let host_path = translate_path_at(tracee, dirfd, SysArg2, false)?;

    tracee.regs.set_sysarg_path(
        SysArg2,
        &host_path,
        "during enter unlink_mkdir_at translation, setting host path",
    )?;

    Ok(())
}
