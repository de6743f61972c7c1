use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use libc::c_void;

use crate::errors::*;
use crate::filesystem::Translator;
use crate::kernel::standard::{translate_path_at, translate_sysarg_path};
use crate::process::tracee::Tracee;
use crate::register::{
    Current, Modified, PtraceReader, PtraceWriter, SysArg, SysArg1, SysArg2, SysArg3, SysArg4,
    SysArgIndex, SysResult, Word,
};

/// Translates readlink(2); the link itself is never dereferenced.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    translate_sysarg_path(tracee, SysArg1, false)
}

/// Translates readlinkat(2).
pub fn enter_at(tracee: &mut Tracee) -> Result<()> {
    let dirfd = tracee.regs.get(Current, SysArg(SysArg1));

    let host_path = translate_path_at(tracee, dirfd, SysArg2, false)?;

    tracee.regs.set_sysarg_path(
        SysArg2,
        &host_path,
        "during enter readlink_at translation, setting host path",
    )?;

    Ok(())
}

/// The kernel wrote a host-side target into the caller's buffer; rewrite
/// it into its guest meaning, bounded by the caller's buffer size.
pub fn exit(tracee: &mut Tracee) -> Result<Option<Word>> {
    let syscall_result = tracee.regs.get(Current, SysResult) as i64;
    if syscall_result < 0 {
        return Ok(None);
    }

    let sysnum = tracee.regs.get_sys_num(Modified);
    let (referrer_arg, buffer_arg, size_arg): (SysArgIndex, SysArgIndex, SysArgIndex) =
        if sysnum == sc::nr::READLINKAT {
            (SysArg2, SysArg3, SysArg4)
        } else {
            (SysArg1, SysArg2, SysArg3)
        };

    let buffer_address = tracee.regs.get(Modified, SysArg(buffer_arg));
    let buffer_size = tracee.regs.get(Modified, SysArg(size_arg)) as usize;

    // The kernel does not nul-terminate; the result is the byte count.
    let referee_bytes = crate::register::read_string(
        tracee.regs.get_pid(),
        buffer_address as *mut Word,
        syscall_result as usize + 1,
    )?;
    let referee = PathBuf::from(unsafe {
        String::from_utf8_unchecked(referee_bytes[..syscall_result as usize].to_vec())
    });

    // The referrer is the translated (host) link path.
    let referrer = tracee.regs.get_sysarg_path(referrer_arg)?;

    let detranslated = {
        let fs = tracee.fs.borrow();
        fs.detranslate_path(&referee, Some(&referrer))?
    };
    let guest_referee = match detranslated {
        Some(path) => path,
        None => return Ok(None),
    };

    let bytes = guest_referee.as_os_str().as_bytes();
    let new_size = bytes.len().min(buffer_size);

    tracee
        .regs
        .write_data(buffer_address as *mut c_void, &bytes[..new_size], false)?;

    Ok(Some(new_size as Word))
}

#[cfg(test)]
mod tests {
    use crate::utils::tests::test_with_proot;

    #[test]
    fn test_readlink() {
        test_with_proot(
            |_tracee, _is_sysenter, _before_translation| {},
            || {
                let filepath = "/tmp/file_for_test_readlink";
                let linkpath = "/tmp/link_for_test_readlink";

                let result = std::panic::catch_unwind(|| {
                    std::fs::File::create(filepath).unwrap();
                    nc::symlink(filepath, linkpath).unwrap();

                    let mut buf = [0_u8; nc::PATH_MAX as usize];
                    let n_read = nc::readlink(linkpath, &mut buf).unwrap() as usize;
                    assert_eq!(&buf[0..n_read], filepath.as_bytes());

                    // a truncated read still succeeds, per readlink(2)
                    let mut small = [0_u8; 4];
                    let n_read = nc::readlink(linkpath, &mut small).unwrap() as usize;
                    assert_eq!(n_read, 4);
                });

                let _ = std::fs::remove_file(linkpath);
                let _ = std::fs::remove_file(filepath);
                if let Err(err) = result {
                    std::panic::resume_unwind(err);
                }
            },
        )
    }
}
