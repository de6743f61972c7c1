use nix::fcntl::OFlag;

use crate::errors::*;
use crate::filesystem::Translator;
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceReader, PtraceWriter, SysArg, SysArg1, SysArg2};

pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let raw_path = tracee.regs.get_sysarg_path(SysArg1)?;

    let flags = OFlag::from_bits_truncate(tracee.regs.get(Current, SysArg(SysArg2)) as _);

    debug!("open({:?}, {:?})", raw_path, flags);
    let deref_final = !(flags.contains(OFlag::O_NOFOLLOW)
        || (flags.contains(OFlag::O_EXCL) && flags.contains(OFlag::O_CREAT)));
    let host_path = tracee.fs.borrow().translate_path(raw_path, deref_final)?;

    tracee.regs.set_sysarg_path(
        SysArg1,
        &host_path,
        "during enter open translation, setting host path",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::utils::tests::test_with_proot;

    #[test]
    fn test_open() {
        test_with_proot(
            |_tracee, _is_sysenter, _before_translation| {},
            || {
                let fd = nc::open("/etc/hostname", nc::O_RDONLY, 0);
                if let Ok(fd) = fd {
                    let mut buffer = [0u8; 64];
                    assert!(nc::read(fd, &mut buffer).is_ok());
                    nc::close(fd).unwrap();
                }
            },
        )
    }
}
