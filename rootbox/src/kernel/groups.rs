use sc::nr::*;

/// Organises system call numbers into an easily-matchable enumeration.
/// It's easier and cleaner to use cfg conditions here rather than in the
/// huge match in `translate_syscall_enter` and `translate_syscall_exit`.
#[derive(Debug, PartialEq)]
pub enum SyscallGroup {
    Ignored = 0,
    Execve,
    Ptrace,
    Wait,
    Brk,
    GetCwd,
    Chdir,
    BindConnect,
    Accept,
    GetSockOrPeerName,
    StandardSyscall, // syscalls that only require their path arguments to be translated
    Open,
    StatAt,
    ChmodAccessMkNodAt,
    InotifyAddWatch,
    DirLinkAttr,
    PivotRoot,
    LinkAt,
    Mount,
    OpenAt,
    Link,
    ReadLink,
    ReadLinkAt,
    Rename,
    RenameAt,
    SymLink,
    SymLinkAt,
    UnlinkMkdirAt,
    ExecveAt,
    Prctl,
}

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"))]
pub fn syscall_group_from_sysnum(sysnum: usize) -> SyscallGroup {
    match sysnum {
        EXECVE                                      => SyscallGroup::Execve,
        EXECVEAT                                    => SyscallGroup::ExecveAt,
        PTRACE                                      => SyscallGroup::Ptrace,
        WAIT4 | WAITID                              => SyscallGroup::Wait,
        BRK                                         => SyscallGroup::Brk,
        GETCWD                                      => SyscallGroup::GetCwd,
        FCHDIR | CHDIR                              => SyscallGroup::Chdir,
        BIND | CONNECT                              => SyscallGroup::BindConnect,
        ACCEPT | ACCEPT4                            => SyscallGroup::Accept,
        GETSOCKNAME | GETPEERNAME                   => SyscallGroup::GetSockOrPeerName,
        PRCTL                                       => SyscallGroup::Prctl,
        // int syscall(const char *pathname, ...)
        ACCESS | ACCT | CHMOD | CHOWN | CHROOT
            | GETXATTR | LISTXATTR | MKNOD | CREAT
            | REMOVEXATTR | SETXATTR | STAT
            | SWAPOFF | SWAPON | TRUNCATE
            | UMOUNT2 | USELIB | UTIME | UTIMES     => SyscallGroup::StandardSyscall,
        // int syscall(const char *pathname, int flags, ...)
        OPEN                                        => SyscallGroup::Open,
        // int syscall(int dirfd, const char *pathname, ... , int flags, ...)
        FCHOWNAT | NEWFSTATAT | UTIMENSAT
            | NAME_TO_HANDLE_AT | STATX             => SyscallGroup::StatAt,
        // int syscall(int dirfd, const char *pathname, ...)
        FCHMODAT | FACCESSAT | FUTIMESAT | MKNODAT  => SyscallGroup::ChmodAccessMkNodAt,
        INOTIFY_ADD_WATCH                           => SyscallGroup::InotifyAddWatch,
        LCHOWN | LGETXATTR | LLISTXATTR
            | LREMOVEXATTR | LSETXATTR | LSTAT
            | UNLINK | RMDIR | MKDIR                => SyscallGroup::DirLinkAttr,
        PIVOT_ROOT                                  => SyscallGroup::PivotRoot,
        LINKAT                                      => SyscallGroup::LinkAt,
        MOUNT                                       => SyscallGroup::Mount,
        OPENAT                                      => SyscallGroup::OpenAt,
        READLINK                                    => SyscallGroup::ReadLink,
        READLINKAT                                  => SyscallGroup::ReadLinkAt,
        UNLINKAT | MKDIRAT                          => SyscallGroup::UnlinkMkdirAt,
        LINK                                        => SyscallGroup::Link,
        RENAME                                      => SyscallGroup::Rename,
        RENAMEAT | RENAMEAT2                        => SyscallGroup::RenameAt,
        SYMLINK                                     => SyscallGroup::SymLink,
        SYMLINKAT                                   => SyscallGroup::SymLinkAt,
        _                                           => SyscallGroup::Ignored,
    }
}

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"))]
pub fn syscall_group_from_sysnum(sysnum: usize) -> SyscallGroup {
    // The legacy non-at syscalls do not exist on this ABI.
    match sysnum {
        EXECVE                                      => SyscallGroup::Execve,
        EXECVEAT                                    => SyscallGroup::ExecveAt,
        PTRACE                                      => SyscallGroup::Ptrace,
        WAIT4 | WAITID                              => SyscallGroup::Wait,
        BRK                                         => SyscallGroup::Brk,
        GETCWD                                      => SyscallGroup::GetCwd,
        FCHDIR | CHDIR                              => SyscallGroup::Chdir,
        BIND | CONNECT                              => SyscallGroup::BindConnect,
        ACCEPT | ACCEPT4                            => SyscallGroup::Accept,
        GETSOCKNAME | GETPEERNAME                   => SyscallGroup::GetSockOrPeerName,
        PRCTL                                       => SyscallGroup::Prctl,
        ACCT | CHROOT | GETXATTR | LISTXATTR
            | REMOVEXATTR | SETXATTR | SWAPOFF
            | SWAPON | TRUNCATE | UMOUNT2           => SyscallGroup::StandardSyscall,
        FCHOWNAT | NEWFSTATAT | UTIMENSAT
            | NAME_TO_HANDLE_AT | STATX             => SyscallGroup::StatAt,
        FCHMODAT | FACCESSAT | MKNODAT              => SyscallGroup::ChmodAccessMkNodAt,
        INOTIFY_ADD_WATCH                           => SyscallGroup::InotifyAddWatch,
        LGETXATTR | LLISTXATTR | LREMOVEXATTR
            | LSETXATTR                             => SyscallGroup::DirLinkAttr,
        PIVOT_ROOT                                  => SyscallGroup::PivotRoot,
        LINKAT                                      => SyscallGroup::LinkAt,
        MOUNT                                       => SyscallGroup::Mount,
        OPENAT                                      => SyscallGroup::OpenAt,
        READLINKAT                                  => SyscallGroup::ReadLinkAt,
        UNLINKAT | MKDIRAT                          => SyscallGroup::UnlinkMkdirAt,
        RENAMEAT | RENAMEAT2                        => SyscallGroup::RenameAt,
        SYMLINKAT                                   => SyscallGroup::SymLinkAt,
        _                                           => SyscallGroup::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_syscall_groups() {
        assert_eq!(syscall_group_from_sysnum(OPEN), SyscallGroup::Open);
        assert_eq!(syscall_group_from_sysnum(EXECVE), SyscallGroup::Execve);
        assert_eq!(syscall_group_from_sysnum(STAT), SyscallGroup::StandardSyscall);
        assert_eq!(syscall_group_from_sysnum(GETPID), SyscallGroup::Ignored);
        assert_eq!(syscall_group_from_sysnum(WAIT4), SyscallGroup::Wait);
        assert_eq!(syscall_group_from_sysnum(PTRACE), SyscallGroup::Ptrace);
    }
}
