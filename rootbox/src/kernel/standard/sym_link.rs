use crate::errors::*;
use crate::kernel::standard::translate_sysarg_path;
use crate::process::tracee::Tracee;
use crate::register::SysArg2;

/// Translates symlink(2): only the link path (second argument) is a real
/// path, the target is stored verbatim.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    translate_sysarg_path(tracee, SysArg2, false)
}

#[cfg(test)]
mod tests {
    use crate::utils::tests::test_with_proot;

    #[test]
    fn test_symlink_stores_target_verbatim() {
        test_with_proot(
            |_tracee, _is_sysenter, _before_translation| {},
            || {
                let linkpath = "/tmp/link_for_test_symlink";

                let result = std::panic::catch_unwind(|| {
                    nc::symlink("/this/is/kept/verbatim", linkpath).unwrap();

                    let mut buf = [0_u8; nc::PATH_MAX as usize];
                    let n_read = nc::readlink(linkpath, &mut buf).unwrap() as usize;
                    assert_eq!(&buf[0..n_read], b"/this/is/kept/verbatim");
                });

                let _ = std::fs::remove_file(linkpath);
                if let Err(err) = result {
                    std::panic::resume_unwind(err);
                }
            },
        )
    }
}
