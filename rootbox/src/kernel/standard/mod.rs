pub mod chdir;
pub mod chmod_access_mknod_at;
pub mod dir_link_attr;
pub mod getcwd;
pub mod link_at;
pub mod link_rename;
pub mod open;
pub mod open_at;
pub mod prctl;
pub mod readlink_at;
pub mod rename_at;
pub mod standard_syscall;
pub mod stat_at;
pub mod sym_link;
pub mod sym_link_at;
pub mod unlink_mkdir_at;

use std::path::PathBuf;

use crate::errors::*;
use crate::filesystem::Translator;
use crate::process::tracee::Tracee;
use crate::register::{PtraceReader, PtraceWriter, SysArgIndex, Word};

pub const AT_FDCWD: i64 = libc::AT_FDCWD as i64;

/// Guest-side directory a `dirfd` argument refers to. The host path behind
/// the file descriptor is read from "/proc/<pid>/fd/<dirfd>" and translated
/// back into the guest view.
pub fn get_dir_base(tracee: &Tracee, dirfd: Word) -> Result<PathBuf> {
    if dirfd as i64 == AT_FDCWD {
        return Ok(tracee.fs.borrow().get_cwd().to_path_buf());
    }

    let link = PathBuf::from(format!("/proc/{}/fd/{}", tracee.pid, dirfd as i64));
    let host_path = link.read_link().errno(EBADF)?;

    let fs = tracee.fs.borrow();
    Ok(fs
        .detranslate_path(&host_path, None)?
        .unwrap_or(host_path))
}

/// Reads the path held by `path_arg`, resolves it against the directory
/// `dirfd` refers to when it is relative, and translates it to the host
/// side.
pub fn translate_path_at(
    tracee: &mut Tracee,
    dirfd: Word,
    path_arg: SysArgIndex,
    deref_final: bool,
) -> Result<PathBuf> {
    let raw_path = tracee.regs.get_sysarg_path(path_arg)?;

    let guest_path = if raw_path.is_absolute() {
        raw_path
    } else {
        get_dir_base(tracee, dirfd)?.join(raw_path)
    };

    tracee.fs.borrow().translate_path(guest_path, deref_final)
}

/// Common body of the simple one-path rewriters: read the path from
/// `path_arg`, translate it, and write the result back into a fresh block
/// of the tracee's stack.
pub fn translate_sysarg_path(
    tracee: &mut Tracee,
    path_arg: SysArgIndex,
    deref_final: bool,
) -> Result<()> {
    let raw_path = tracee.regs.get_sysarg_path(path_arg)?;

    let host_path = tracee.fs.borrow().translate_path(raw_path, deref_final)?;

    tracee.regs.set_sysarg_path(
        path_arg,
        &host_path,
        "during syscall enter translation, setting host path",
    )?;

    Ok(())
}
