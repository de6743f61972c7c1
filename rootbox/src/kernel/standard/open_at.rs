use nix::fcntl::OFlag;

use crate::errors::*;
use crate::kernel::standard::translate_path_at;
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceWriter, SysArg, SysArg1, SysArg2, SysArg3};

pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let dirfd = tracee.regs.get(Current, SysArg(SysArg1));
    let flags = OFlag::from_bits_truncate(tracee.regs.get(Current, SysArg(SysArg3)) as _);

    let deref_final = !(flags.contains(OFlag::O_NOFOLLOW)
        || (flags.contains(OFlag::O_EXCL) && flags.contains(OFlag::O_CREAT)));

    let host_path = translate_path_at(tracee, dirfd, SysArg2, deref_final)?;

    tracee.regs.set_sysarg_path(
        SysArg2,
        &host_path,
        "during enter open_at translation, setting host path",
    )?;

    Ok(())
}
