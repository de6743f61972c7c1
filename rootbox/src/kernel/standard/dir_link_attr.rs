use crate::errors::*;
use crate::kernel::standard::translate_sysarg_path;
use crate::process::tracee::Tracee;
use crate::register::SysArg1;

/// Syscalls acting on the link or directory entry itself (lstat, lchown,
/// unlink, rmdir, mkdir, l*xattr): the final component is never
/// dereferenced.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    translate_sysarg_path(tracee, SysArg1, false)
}

#[cfg(test)]
mod tests {
    use crate::utils::tests::test_with_proot;

    #[test]
    fn test_mkdir_rmdir_unlink() {
        test_with_proot(
            |_tracee, _is_sysenter, _before_translation| {},
            || {
                let dirpath = "/tmp/dir_for_test_dir_link_attr";
                let filepath = "/tmp/file_for_test_dir_link_attr";

                let result = std::panic::catch_unwind(|| {
                    nc::mkdir(dirpath, 0o755).unwrap();

                    let mut stat = nc::stat_t::default();
                    nc::lstat(dirpath, &mut stat).unwrap();
                    assert_eq!((stat.st_mode & nc::S_IFMT), nc::S_IFDIR);

                    nc::rmdir(dirpath).unwrap();
                    assert_eq!(nc::lstat(dirpath, &mut stat), Err(nc::ENOENT));

                    std::fs::File::create(filepath).unwrap();
                    nc::unlink(filepath).unwrap();
                    assert_eq!(nc::lstat(filepath, &mut stat), Err(nc::ENOENT));
                });

                let _ = std::fs::remove_dir(dirpath);
                let _ = std::fs::remove_file(filepath);
                if let Err(err) = result {
                    std::panic::resume_unwind(err);
                }
            },
        )
    }
}
