use std::path::PathBuf;

use nix::sys::stat;
use nix::sys::stat::{Mode, SFlag};

use crate::errors::*;
use crate::filesystem::{Substitutor, Translator};
use crate::kernel::standard::get_dir_base;
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceReader, SysArg, SysArg1};

/// chdir(2) and fchdir(2) are fully emulated: the guest working directory
/// only lives in the tracee's `FileSystem`, so the actual syscall is
/// cancelled once the new value has been validated and stashed.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let sysnum = tracee.regs.get_sys_num(Current);

    let raw_guest_path = if sysnum == sc::nr::CHDIR {
        let mut path = tracee.regs.get_sysarg_path(SysArg1)?;
        // The ending "." ensures an error will be reported if the path
        // does not exist or is not a directory.
        path.push(".");
        if path.is_relative() {
            tracee.fs.borrow().get_cwd().join(path)
        } else {
            path
        }
    } else {
        let dirfd = tracee.regs.get(Current, SysArg(SysArg1));
        let mut path = get_dir_base(tracee, dirfd)?;
        path.push(".");
        path
    };

    let guest_path = tracee.fs.borrow().translate_guest_path(&raw_guest_path, true)?;
    let host_path = tracee
        .fs
        .borrow()
        .substitute(&guest_path, crate::filesystem::Side::Guest)?;

    let statl = stat::lstat(&host_path)?;

    if SFlag::from_bits_truncate(statl.st_mode) & SFlag::S_IFMT != SFlag::S_IFDIR {
        return Err(Error::errno(ENOTDIR));
    }

    // Check this directory is searchable.
    if Mode::from_bits_truncate(statl.st_mode) & Mode::S_IXUSR == Mode::empty() {
        return Err(Error::errno(EACCES));
    }

    /* Sadly this path was not detranslated statefully, which means there
     * is an ambiguity when several bindings share the same host path: the
     * deepest binding in scan order wins. */

    tracee.fs.borrow_mut().set_cwd(PathBuf::from(&guest_path));
    tracee.update_proc_entry();

    tracee
        .regs
        .cancel_syscall("chdir is emulated, the kernel sees nothing");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::utils::tests::test_with_proot;

    #[test]
    fn test_chdir_and_getcwd() {
        test_with_proot(
            |_tracee, _is_sysenter, _before_translation| {},
            || {
                let mut buffer = [0u8; 4096];

                nc::chdir("/tmp").unwrap();
                let size = nc::getcwd(buffer.as_mut_ptr() as usize, buffer.len()).unwrap();

                // getcwd returns the length of the string, nul included
                assert_eq!(size, 5);
                assert_eq!(&buffer[0..4], b"/tmp");

                // a non-existing directory must be rejected
                assert_eq!(nc::chdir("/impossible_path"), Err(nc::ENOENT));

                // a regular file must be rejected
                assert_eq!(nc::chdir("/etc/hostname"), Err(nc::ENOTDIR));
            },
        )
    }
}
