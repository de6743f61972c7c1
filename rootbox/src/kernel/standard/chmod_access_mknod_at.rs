use crate::errors::*;
use crate::kernel::standard::translate_path_at;
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceWriter, SysArg, SysArg1, SysArg2};

/// Translates fchmodat(2), faccessat(2), futimesat(2) and mknodat(2).
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let dirfd = tracee.regs.get(Current, SysArg(SysArg1));

    let host_path = translate_path_at(tracee, dirfd, SysArg2, true)?;

    tracee.regs.set_sysarg_path(
        SysArg2,
        &host_path,
        "during enter chmod_access_mknod_at translation, setting host path",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::utils::tests::test_with_proot;

    #[test]
    fn test_faccessat() {
        test_with_proot(
            |_tracee, _is_sysenter, _before_translation| {},
            || {
                assert!(nc::faccessat(nc::AT_FDCWD, "/etc/passwd", nc::F_OK).is_ok());
                assert_eq!(
                    nc::faccessat(nc::AT_FDCWD, "/impossible_path", nc::F_OK),
                    Err(nc::ENOENT)
                );
            },
        )
    }
}
