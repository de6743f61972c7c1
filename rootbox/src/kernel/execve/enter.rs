use crate::errors::*;
use crate::filesystem::Translator;
use crate::kernel::execve::elf::ExecutableClass;
use crate::kernel::execve::load_info::LoadInfo;
use crate::kernel::execve::loader::LoaderFile;
use crate::kernel::execve::{params, shebang};
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceReader, PtraceWriter, SysArg, SysArg1, SysArg2, SysArg4, SysArg5, SysArg6};

/// The traced variant of the loader signals the end of the load with a
/// sentinel execve carrying this argument pattern; the stack pointer and
/// the entry point ride in the second and third arguments.
pub fn is_loader_notification(tracee: &Tracee) -> bool {
    tracee.as_ptracee.ptracer.is_some()
        && tracee.regs.get(Current, SysArg(SysArg1)) == 1
        && tracee.regs.get(Current, SysArg(SysArg4)) == 2
        && tracee.regs.get(Current, SysArg(SysArg5)) == 3
        && tracee.regs.get(Current, SysArg(SysArg6)) == 4
}

pub fn translate(tracee: &mut Tracee, loader: &Option<LoaderFile>) -> Result<()> {
    if is_loader_notification(tracee) {
        // Syscalls can now be reported to its ptracer.
        tracee.as_ptracee.ignore_loader_syscalls = false;

        // Cancel this spurious execve, it was only used as a notification.
        tracee
            .regs
            .cancel_syscall("the sentinel execve is only a notification");
        tracee.sentinel_execve = true;
        return Ok(());
    }

    let loader = match loader {
        Some(loader) => loader,
        None => {
            return Err(Error::errno_with_msg(
                ENOENT,
                "no loader binary is available (see PROOT_LOADER)",
            ))
        }
    };

    let raw_path = tracee.regs.get_sysarg_path(SysArg1)?;
    debug!("execve({:?})", raw_path);

    let mut argv = params::read_string_array(tracee, SysArg2)?;

    let expanded = {
        let fs = tracee.fs.borrow();
        match shebang::expand(&fs, &raw_path, &mut argv) {
            Ok(expanded) => expanded,
            // The Linux kernel actually returns -EACCES when trying to
            // execute a directory.
            Err(error) if error.get_errno() == EISDIR => return Err(Error::errno(EACCES)),
            Err(error) => return Err(error),
        }
    };

    // Remember the new value for "/proc/self/exe". It points to a
    // canonicalized guest path, hence detranslate_path() instead of using
    // user_path directly.
    tracee.new_exe = {
        let fs = tracee.fs.borrow();
        match fs.detranslate_path(&expanded.host_path, None) {
            Ok(maybe_path) => Some(maybe_path.unwrap_or_else(|| expanded.host_path.clone())),
            Err(_) => None,
        }
    };

    let mut load_info = {
        let fs = tracee.fs.borrow();
        LoadInfo::from(&fs, &expanded.host_path)
            .with_context(|| format!("Failed to parse the ELF file {:?}", expanded.host_path))?
    };

    load_info.raw_path = Some(raw_path.clone());
    load_info.user_path = Some(expanded.user_path);
    load_info.host_path = Some(expanded.host_path);

    load_info.compute_load_addresses(false)?;

    if expanded.has_shebang {
        params::write_string_array(tracee, SysArg2, &argv)?;
    }

    // Execute the loader instead of the program.
    let wants_32bit = load_info.elf_header.get_class() == ExecutableClass::Class32;
    let loader_path = loader.get_loader_path(wants_32bit)?.to_path_buf();

    tracee.load_info = Some(load_info);

    tracee.regs.set_sysarg_path(
        SysArg1,
        &loader_path,
        "during enter execve translation, setting the loader path",
    )?;

    // Mask the syscalls performed by the loader to its ptracer.
    if tracee.as_ptracee.ptracer.is_some() {
        tracee.as_ptracee.ignore_loader_syscalls = true;
    }

    Ok(())
}
