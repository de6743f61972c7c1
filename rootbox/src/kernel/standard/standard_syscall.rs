use crate::errors::*;
use crate::kernel::standard::translate_sysarg_path;
use crate::process::tracee::Tracee;
use crate::register::SysArg1;

/// Syscalls whose only path argument comes first and is dereferenced, like
/// stat(2) or chmod(2).
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    translate_sysarg_path(tracee, SysArg1, true)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use crate::utils::tests::test_with_proot;

    /// Since the arguments of the standard syscalls follow a single
    /// pattern, only stat() is exercised here.
    #[test]
    fn test_standard_syscall() {
        test_with_proot(
            |_tracee, _is_sysenter, _before_translation| {},
            || {
                let filepath = "/tmp/file_for_test_standard_syscall";
                let linkpath = "/tmp/link_for_test_standard_syscall";

                let result = std::panic::catch_unwind(|| {
                    // init file and symlink file
                    File::create(filepath).unwrap();
                    std::os::unix::fs::symlink(filepath, linkpath).unwrap();

                    let mut stat = nc::stat_t::default();
                    nc::stat(linkpath, &mut stat).unwrap();
                    // should be a regular file, since the symlink is
                    // dereferenced automatically.
                    assert_eq!((stat.st_mode & nc::S_IFMT), nc::S_IFREG);
                    nc::stat(filepath, &mut stat).unwrap();
                    assert_eq!((stat.st_mode & nc::S_IFMT), nc::S_IFREG);
                });
                std::fs::remove_file(filepath).unwrap();
                std::fs::remove_file(linkpath).unwrap();
                if let Err(err) = result {
                    std::panic::resume_unwind(err);
                }
            },
        )
    }
}
