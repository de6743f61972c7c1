use crate::errors::*;
use crate::kernel::execve;
use crate::kernel::groups::syscall_group_from_sysnum;
use crate::kernel::groups::SyscallGroup::*;
use crate::kernel::heap::brk;
use crate::kernel::ptrace::{ptrace, wait};
use crate::kernel::socket::{accept, bind_connect};
use crate::kernel::standard::*;
use crate::process::proot::{InfoBag, PRoot};
use crate::process::tracee::Tracee;
use crate::register::{Current, PtraceReader, SysArg1, SysArg2};

pub fn translate(info_bag: &InfoBag, proot: &PRoot, tracee: &mut Tracee) -> Result<()> {
    let sysnum = tracee.regs.get_sys_num(Current);
    let group = syscall_group_from_sysnum(sysnum);

    debug!("-- {} enter ({:?}, {:?})", tracee.pid, sysnum, group);

    match group {
        Accept => accept::enter(tracee),
        BindConnect => bind_connect::enter(tracee),
        Brk => brk::enter(tracee),
        Chdir => chdir::enter(tracee),
        ChmodAccessMkNodAt => chmod_access_mknod_at::enter(tracee),
        DirLinkAttr => dir_link_attr::enter(tracee),
        Execve => execve::enter::translate(tracee, &info_bag.loader),
        // Not translatable without a dirfd-relative ELF loader; the
        // caller falls back on execve.
        ExecveAt => Err(Error::errno(ENOSYS)),
        GetCwd => getcwd::enter(tracee),
        GetSockOrPeerName => accept::enter(tracee),
        InotifyAddWatch => translate_sysarg_path(tracee, SysArg2, true),
        Link => link_rename::enter(tracee),
        LinkAt => link_at::enter(tracee),
        Mount => enter_mount(tracee),
        Open => open::enter(tracee),
        OpenAt => open_at::enter(tracee),
        PivotRoot => enter_pivot_root(tracee),
        Prctl => prctl::enter(tracee),
        Ptrace => ptrace::enter(tracee),
        ReadLink => readlink_at::enter(tracee),
        ReadLinkAt => readlink_at::enter_at(tracee),
        Rename => link_rename::enter(tracee),
        RenameAt => rename_at::enter(tracee),
        StandardSyscall => standard_syscall::enter(tracee),
        StatAt => stat_at::enter(tracee),
        SymLink => sym_link::enter(tracee),
        SymLinkAt => sym_link_at::enter(tracee),
        UnlinkMkdirAt => unlink_mkdir_at::enter(tracee),
        Wait => wait::enter(proot, tracee).map(|_| ()),
        Ignored => Ok(()),
    }
}

/// mount(2): the source is a path only when it looks like one (it can
/// also be a filesystem type such as "tmpfs"); the target always is.
fn enter_mount(tracee: &mut Tracee) -> Result<()> {
    let source = tracee.regs.get_sysarg_path(SysArg1)?;
    if source.is_absolute() {
        translate_sysarg_path(tracee, SysArg1, true)?;
    }
    translate_sysarg_path(tracee, SysArg2, true)
}

fn enter_pivot_root(tracee: &mut Tracee) -> Result<()> {
    translate_sysarg_path(tracee, SysArg1, true)?;
    translate_sysarg_path(tracee, SysArg2, true)
}
