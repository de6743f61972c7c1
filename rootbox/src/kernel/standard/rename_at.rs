use crate::errors::*;
use crate::kernel::standard::link_rename::update_cwd_after_rename;
use crate::kernel::standard::translate_path_at;
use crate::process::tracee::Tracee;
use crate::register::{
    Current, PtraceWriter, SysArg, SysArg1, SysArg2, SysArg3, SysArg4, SysResult,
};

/// Translates renameat(2) and renameat2(2): both paths are resolved
/// against their respective directory file descriptors.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let old_dirfd = tracee.regs.get(Current, SysArg(SysArg1));
    let new_dirfd = tracee.regs.get(Current, SysArg(SysArg3));

    let old_host_path = translate_path_at(tracee, old_dirfd, SysArg2, false)?;
    let new_host_path = translate_path_at(tracee, new_dirfd, SysArg4, false)?;

    tracee.regs.set_sysarg_path(
        SysArg2,
        &old_host_path,
        "during enter rename_at translation, setting host path",
    )?;
    tracee.regs.set_sysarg_path(
        SysArg4,
        &new_host_path,
        "during enter rename_at translation, setting host path",
    )?;

    Ok(())
}

pub fn exit(tracee: &mut Tracee) -> Result<()> {
    let syscall_result = tracee.regs.get(Current, SysResult) as i64;
    if syscall_result < 0 {
        return Ok(());
    }

    update_cwd_after_rename(tracee, SysArg2, SysArg4)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use nix::{fcntl::OFlag, sys::stat::Mode};

    use crate::utils::tests::test_with_proot;

    /// Covers link(2), rename(2) and renameat(2).
    #[test]
    fn test_link_rename() {
        test_with_proot(
            |_tracee, _is_sysenter, _before_translation| {},
            || {
                let original_filepath = "/tmp/original_filepath_for_test_link_rename";
                let original_linkpath = "/tmp/original_linkpath_for_test_link_rename";
                let cloned_linkpath = "/tmp/cloned_linkpath_for_test_link_rename";
                let cloned_filepath = "/tmp/cloned_filepath_for_test_link_rename";
                let renamed_filepath = "/tmp/renamed_filepath_for_test_link_rename";
                let renamed_filename = "renamed_filepath_for_test_link_rename";
                let rerenamed_filename = "re-renamed_filepath_for_test_link_rename";
                let rerenamed_filepath = "/tmp/re-renamed_filepath_for_test_link_rename";

                let result = std::panic::catch_unwind(|| {
                    // open "/tmp"
                    let fd = nix::fcntl::open("/tmp", OFlag::O_RDONLY, Mode::empty()).unwrap();
                    // init file
                    File::create(original_filepath).unwrap();
                    std::os::unix::fs::symlink(original_filepath, original_linkpath).unwrap();

                    // link() does not dereference the symbolic link, so
                    // this clones the link itself
                    nc::link(original_linkpath, cloned_linkpath).unwrap();
                    let mut stat = nc::stat_t::default();
                    nc::lstat(cloned_linkpath, &mut stat).unwrap();
                    assert_eq!((stat.st_mode & nc::S_IFMT), nc::S_IFLNK);
                    let mut buf = [0_u8; nc::PATH_MAX as usize];
                    let n_read = nc::readlink(cloned_linkpath, &mut buf).unwrap() as usize;
                    assert_eq!(original_filepath.as_bytes(), &buf[0..n_read]);

                    // a hard link to the original file
                    nc::link(original_filepath, cloned_filepath).unwrap();
                    let mut cloned_filestat = nc::stat_t::default();
                    nc::lstat(cloned_filepath, &mut cloned_filestat).unwrap();
                    assert_eq!((cloned_filestat.st_mode & nc::S_IFMT), nc::S_IFREG);

                    let mut original_filestat = nc::stat_t::default();
                    nc::lstat(original_filepath, &mut original_filestat).unwrap();
                    assert_eq!(cloned_filestat.st_ino, original_filestat.st_ino);

                    // rename()
                    nc::rename(cloned_filepath, renamed_filepath).unwrap();
                    let mut stat = nc::stat_t::default();
                    assert_eq!(nc::lstat(cloned_filepath, &mut stat), Err(nc::ENOENT));
                    nc::lstat(renamed_filepath, &mut stat).unwrap();
                    assert_eq!((stat.st_mode & nc::S_IFMT), nc::S_IFREG);

                    // renameat()
                    nc::renameat(fd, renamed_filename, fd, rerenamed_filename).unwrap();
                    let mut stat = nc::stat_t::default();
                    assert_eq!(nc::lstat(renamed_filepath, &mut stat), Err(nc::ENOENT));
                    nc::lstat(rerenamed_filepath, &mut stat).unwrap();
                    assert_eq!((stat.st_mode & nc::S_IFMT), nc::S_IFREG);
                });

                let _ = std::fs::remove_file(original_filepath);
                let _ = std::fs::remove_file(original_linkpath);
                let _ = std::fs::remove_file(cloned_linkpath);
                let _ = std::fs::remove_file(cloned_filepath);
                let _ = std::fs::remove_file(renamed_filepath);
                let _ = std::fs::remove_file(rerenamed_filepath);
                if let Err(err) = result {
                    std::panic::resume_unwind(err);
                }
            },
        )
    }
}
