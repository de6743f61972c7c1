/// Map the symbolic register names onto the fields of the kernel's
/// register-set structure for each supported ABI.
/// See sysdeps/unix/sysv/linux/${ARCH}/syscall.S from the GNU C Library.
#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"))]
#[macro_use]
pub mod regs_offset {
    macro_rules! get_reg {
        ($regs:expr, SysNum)       => ($regs.orig_rax);
        ($regs:expr, SysArg1)      => ($regs.rdi);
        ($regs:expr, SysArg2)      => ($regs.rsi);
        ($regs:expr, SysArg3)      => ($regs.rdx);
        ($regs:expr, SysArg4)      => ($regs.r10);
        ($regs:expr, SysArg5)      => ($regs.r8);
        ($regs:expr, SysArg6)      => ($regs.r9);
        ($regs:expr, SysResult)    => ($regs.rax);
        ($regs:expr, StackPointer) => ($regs.rsp);
        ($regs:expr, InstrPointer) => ($regs.rip);
        ($regs:expr, RtldFini)     => ($regs.rdx);
        ($regs:expr, StateFlags)   => ($regs.eflags);
        ($regs:expr, UserArg1)     => ($regs.rdi);
    }
}

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "x86"))]
#[macro_use]
pub mod regs_offset {
    macro_rules! get_reg {
        ($regs:expr, SysNum)       => ($regs.orig_eax);
        ($regs:expr, SysArg1)      => ($regs.ebx);
        ($regs:expr, SysArg2)      => ($regs.ecx);
        ($regs:expr, SysArg3)      => ($regs.edx);
        ($regs:expr, SysArg4)      => ($regs.esi);
        ($regs:expr, SysArg5)      => ($regs.edi);
        ($regs:expr, SysArg6)      => ($regs.ebp);
        ($regs:expr, SysResult)    => ($regs.eax);
        ($regs:expr, StackPointer) => ($regs.esp);
        ($regs:expr, InstrPointer) => ($regs.eip);
        ($regs:expr, RtldFini)     => ($regs.edx);
        ($regs:expr, StateFlags)   => ($regs.eflags);
        ($regs:expr, UserArg1)     => ($regs.eax);
    }
}

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"))]
#[macro_use]
pub mod regs_offset {
    macro_rules! get_reg {
        ($regs:expr, SysNum)       => ($regs.regs[8]);
        ($regs:expr, SysArg1)      => ($regs.regs[0]);
        ($regs:expr, SysArg2)      => ($regs.regs[1]);
        ($regs:expr, SysArg3)      => ($regs.regs[2]);
        ($regs:expr, SysArg4)      => ($regs.regs[3]);
        ($regs:expr, SysArg5)      => ($regs.regs[4]);
        ($regs:expr, SysArg6)      => ($regs.regs[5]);
        ($regs:expr, SysResult)    => ($regs.regs[0]);
        ($regs:expr, StackPointer) => ($regs.sp);
        ($regs:expr, InstrPointer) => ($regs.pc);
        ($regs:expr, RtldFini)     => ($regs.regs[0]);
        ($regs:expr, StateFlags)   => ($regs.pstate);
        ($regs:expr, UserArg1)     => ($regs.regs[0]);
    }
}
