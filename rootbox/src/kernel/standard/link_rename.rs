use std::path::PathBuf;

use crate::errors::*;
use crate::filesystem::binding::{compare_paths, PathComparison};
use crate::filesystem::Translator;
use crate::process::tracee::Tracee;
use crate::register::{
    Current, PtraceReader, PtraceWriter, SysArg1, SysArg2, SysArgIndex, SysResult,
};

/// Translates link(2) and rename(2): two independent paths, none of which
/// is dereferenced.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let old_path = tracee.regs.get_sysarg_path(SysArg1)?;
    let new_path = tracee.regs.get_sysarg_path(SysArg2)?;

    let old_host_path = tracee.fs.borrow().translate_path(old_path, false)?;
    let new_host_path = tracee.fs.borrow().translate_path(new_path, false)?;

    tracee.regs.set_sysarg_path(
        SysArg1,
        &old_host_path,
        "during enter link/rename translation, setting host path",
    )?;
    tracee.regs.set_sysarg_path(
        SysArg2,
        &new_host_path,
        "during enter link/rename translation, setting host path",
    )?;

    Ok(())
}

/// When the moved path is a prefix of (or equal to) the stashed working
/// directory, the cwd has to follow the rename.
pub fn exit(tracee: &mut Tracee) -> Result<()> {
    let syscall_result = tracee.regs.get(Current, SysResult) as i64;
    if syscall_result < 0 {
        return Ok(());
    }

    update_cwd_after_rename(tracee, SysArg1, SysArg2)
}

pub fn update_cwd_after_rename(
    tracee: &mut Tracee,
    old_reg: SysArgIndex,
    new_reg: SysArgIndex,
) -> Result<()> {
    // Get the old path, then convert it to the same "point-of-view" as the
    // stashed cwd (guest).
    let old_host_path = tracee.regs.get_sysarg_path(old_reg)?;
    let old_guest_path = {
        let fs = tracee.fs.borrow();
        fs.detranslate_path(&old_host_path, None)?
            .unwrap_or(old_host_path)
    };

    // Nothing special to do if the moved path is not the current working
    // directory.
    let cwd = tracee.fs.borrow().get_cwd().to_path_buf();
    match compare_paths(&old_guest_path, &cwd) {
        PathComparison::Equal | PathComparison::FirstIsPrefix => {}
        _ => return Ok(()),
    }

    let new_host_path = tracee.regs.get_sysarg_path(new_reg)?;
    let new_guest_path = {
        let fs = tracee.fs.borrow();
        fs.detranslate_path(&new_host_path, None)?
            .unwrap_or(new_host_path)
    };

    // Update the virtual current working directory.
    let suffix = cwd.strip_prefix(&old_guest_path).unwrap_or(&cwd);
    let new_cwd = if suffix.as_os_str().is_empty() {
        new_guest_path
    } else {
        new_guest_path.join(suffix)
    };

    tracee.fs.borrow_mut().set_cwd(PathBuf::from(new_cwd));
    tracee.update_proc_entry();
    Ok(())
}
