//! Per-ABI constants: trap instruction size, stack red zone, and the fixed
//! virtual addresses reserved for position independent objects. Syscall
//! numbers themselves come from the `sc` crate, which already selects the
//! right table for the compilation target.

use crate::register::Word;

/// Syscall number used to cancel a system call while keeping the stop: it is
/// guaranteed to be invalid for every supported ABI, so the kernel returns
/// `-ENOSYS` without any side effect and the exit stage can overwrite the
/// result.
pub const VOID_SYSNUM: Word = Word::MAX;

/// Size in bytes of the instruction that raises a syscall. Chained syscalls
/// rewind the instruction pointer by this amount so the trap re-executes.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub const SYSTRAP_SIZE: Word = 2;
#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
pub const SYSTRAP_SIZE: Word = 4;

/// Bytes below the stack pointer that belong to the compiler, not to us.
#[cfg(target_arch = "x86_64")]
pub const RED_ZONE_SIZE: isize = 128;
#[cfg(not(target_arch = "x86_64"))]
pub const RED_ZONE_SIZE: isize = 0;

/// Fixed load bases for ET_DYN objects whose first segment starts at zero.
/// The executable and its interpreter get distinct windows so their segments
/// can never overlap; the 32-bit values serve the compatibility mode on
/// 64-bit hosts.
pub const EXEC_PIC_ADDRESS: Word = 0x500000000000;
pub const INTERP_PIC_ADDRESS: Word = 0x6f0000000000;
pub const EXEC_PIC_ADDRESS_32: Word = 0x0f000000;
pub const INTERP_PIC_ADDRESS_32: Word = 0xaf000000;

/// Whether a 32-bit loader companion is shipped for this host.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub const HAS_LOADER_32BIT: bool = true;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const HAS_LOADER_32BIT: bool = false;

/// The seccomp architecture token the BPF filter accepts.
#[cfg(target_arch = "x86_64")]
pub const AUDIT_ARCH: u32 = 0xc000_003e; // AUDIT_ARCH_X86_64
#[cfg(target_arch = "x86")]
pub const AUDIT_ARCH: u32 = 0x4000_0003; // AUDIT_ARCH_I386
#[cfg(target_arch = "aarch64")]
pub const AUDIT_ARCH: u32 = 0xc000_00b7; // AUDIT_ARCH_AARCH64
#[cfg(target_arch = "arm")]
pub const AUDIT_ARCH: u32 = 0x4000_0028; // AUDIT_ARCH_ARM

/// Maximum number of symlinks followed during canonicalization, mirroring
/// the kernel's MAXSYMLINKS.
pub const MAXSYMLINKS: usize = 40;
