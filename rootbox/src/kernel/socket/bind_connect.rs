use crate::errors::*;
use crate::filesystem::binding::Binding;
use crate::filesystem::temp::TempFile;
use crate::filesystem::Translator;
use crate::kernel::socket::{read_sockaddr_un_path, write_sockaddr_un_path, SIZEOF_PATH};
use crate::process::tracee::Tracee;
use crate::register::{Current, SysArg, SysArg2, SysArg3};
use nix::NixPath;

/// Translates the Unix socket path embedded in the `sockaddr_un` argument
/// of bind(2) and connect(2). When the translated host path exceeds the
/// 108-byte `sun_path` limit, a shorter temporary name is minted and bound
/// to the intended guest path.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    let address = tracee.regs.get(Current, SysArg(SysArg2));
    let size = tracee.regs.get(Current, SysArg(SysArg3)) as usize;

    if address == 0 {
        return Ok(());
    }

    let user_path = match read_sockaddr_un_path(tracee, address, size)? {
        Some(path) => path,
        None => return Ok(()),
    };

    let mut host_path = tracee.fs.borrow().translate_path(&user_path, true)?;

    if host_path.len() > SIZEOF_PATH {
        let (shorter, _file) = TempFile::create_unique_file("rootbox")?;
        let shorter_host_path = shorter.path.clone();
        // The temp file only reserves the name; the binding below redirects
        // it to the intended path.
        std::mem::forget(shorter);

        if shorter_host_path.len() > SIZEOF_PATH {
            return Err(Error::errno(EINVAL));
        }

        let guest_path = {
            let fs = tracee.fs.borrow();
            fs.detranslate_path(&host_path, None)?
                .unwrap_or_else(|| host_path.clone())
        };

        tracee
            .fs
            .borrow_mut()
            .insort_binding(Binding::new(&shorter_host_path, guest_path));

        host_path = shorter_host_path;
    }

    write_sockaddr_un_path(tracee, address, &host_path)?;
    Ok(())
}
