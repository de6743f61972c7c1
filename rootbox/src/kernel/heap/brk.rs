use nix::sys::mman::{MapFlags, ProtFlags};
use nix::unistd::{sysconf, SysconfVar};

use crate::errors::Result;
use crate::process::tracee::Tracee;
use crate::register::{
    Current, Modified, Original, SysArg, SysArg1, SysArg2, SysArg3, SysArg4, SysArg5, SysArg6,
    SysResult, Word,
};

lazy_static! {
    /// The size of the heap can be zero, unlike the size of a memory
    /// mapping. As a consequence, the first page of the "heap" mapping is
    /// discarded in order to emulate an empty heap.
    static ref HEAP_OFFSET: Word = match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(value)) if value > 0 => value as Word,
        _ => 0x1000,
    };
}

#[cfg(any(target_arch = "x86", target_arch = "arm"))]
const MMAP_SYSNUM: usize = sc::nr::MMAP2;
#[cfg(not(any(target_arch = "x86", target_arch = "arm")))]
const MMAP_SYSNUM: usize = sc::nr::MMAP;

/// Puts the tracee's heap at a reliable location: by default the kernel
/// places it near the loader's BSS, but another mapping may then be placed
/// right after it, preventing the heap from growing.
pub fn enter(tracee: &mut Tracee) -> Result<()> {
    if tracee.heap.borrow().disabled {
        return Ok(());
    }

    let new_brk_address = tracee.regs.get(Current, SysArg(SysArg1));
    debug!("-- {} brk({:#x})", tracee.pid, new_brk_address);

    // Allocate a new mapping for the emulated heap.
    if tracee.heap.borrow().base == 0 {
        if new_brk_address != 0 {
            /* From this tracer's point of view this is the first time this
             * tracee calls brk(2), although an address was specified. This
             * is not supposed to happen the first time. It is likely
             * because this tracee is the very first child but the first
             * execve(2) didn't happen yet (the installation of seccomp
             * filters is made after this very first process is traced, and
             * malloc(3) might be called before the first execve(2)). */
            warn!("process {} is doing suspicious brk()", tracee.pid);
            return Ok(());
        }

        /* Put the heap as close to the BSS as possible since some programs
         * assume the gap between the end of the BSS and the start of the
         * heap is relatively small (ie. < 1MB) even when ASLR is enabled.
         * The last mapping of the executable is the BSS, and its end is
         * already aligned to a page boundary. */
        let bss_end = match tracee.load_info.as_ref() {
            Some(load_info) => match load_info.mappings.last() {
                Some(mapping) => mapping.addr + mapping.length,
                None => return Ok(()),
            },
            None => return Ok(()),
        };

        tracee.regs.set_sys_num(MMAP_SYSNUM, "emulate brk(0) with a fresh mapping");
        tracee
            .regs
            .set(SysArg(SysArg1), bss_end, "heap mapping address");
        tracee
            .regs
            .set(SysArg(SysArg2), *HEAP_OFFSET, "heap mapping length");
        tracee.regs.set(
            SysArg(SysArg3),
            (ProtFlags::PROT_READ | ProtFlags::PROT_WRITE).bits() as Word,
            "heap mapping prot",
        );
        tracee.regs.set(
            SysArg(SysArg4),
            (MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS).bits() as Word,
            "heap mapping flags",
        );
        tracee
            .regs
            .set(SysArg(SysArg5), -1i64 as Word, "heap mapping fd");
        tracee.regs.set(SysArg(SysArg6), 0, "heap mapping offset");

        return Ok(());
    }

    // The size of the heap can't be negative.
    if new_brk_address < tracee.heap.borrow().base {
        tracee.regs.cancel_syscall("brk() shrinking below the base");
        return Ok(());
    }

    let new_heap_size = new_brk_address - tracee.heap.borrow().base;
    let old_heap_size = tracee.heap.borrow().size;

    // Actually resizing.
    tracee.regs.set_sys_num(sc::nr::MREMAP, "emulate brk() with mremap");
    tracee.regs.set(
        SysArg(SysArg1),
        tracee.heap.borrow().base - *HEAP_OFFSET,
        "mremap old address",
    );
    tracee.regs.set(
        SysArg(SysArg2),
        old_heap_size + *HEAP_OFFSET,
        "mremap old size",
    );
    tracee.regs.set(
        SysArg(SysArg3),
        new_heap_size + *HEAP_OFFSET,
        "mremap new size",
    );
    tracee.regs.set(SysArg(SysArg4), 0, "mremap flags");
    tracee.regs.set(SysArg(SysArg5), 0, "mremap new address");

    Ok(())
}

/// c.f. the function above.
pub fn exit(tracee: &mut Tracee) {
    if tracee.heap.borrow().disabled {
        return;
    }

    let sysnum = tracee.regs.get_sys_num(Modified);
    let result = tracee.regs.get(Current, SysResult);
    let tracee_errno = result as i64;

    if sysnum == crate::arch::VOID_SYSNUM as usize {
        let (base, size) = {
            let heap = tracee.heap.borrow();
            (heap.base, heap.size)
        };
        tracee
            .regs
            .set(SysResult, base + size, "brk() result after cancellation");
    } else if sysnum == MMAP_SYSNUM {
        /* On error, mmap(2) returns -errno (the last 4k is reserved for
         * this), whereas brk(2) returns the previous value. */
        if tracee_errno < 0 && tracee_errno > -4096 {
            tracee.regs.set(SysResult, 0, "brk() initial failure");
            return;
        }

        {
            let mut heap = tracee.heap.borrow_mut();
            heap.base = result + *HEAP_OFFSET;
            heap.size = 0;
        }
        let base = tracee.heap.borrow().base;
        tracee.regs.set(SysResult, base, "brk() initial result");
    } else if sysnum == sc::nr::MREMAP {
        let base = tracee.heap.borrow().base;
        if (tracee_errno < 0 && tracee_errno > -4096) || base != result + *HEAP_OFFSET {
            /* On error, mremap(2) returns -errno, whereas brk(2) returns
             * the previous value. */
            let size = tracee.heap.borrow().size;
            tracee
                .regs
                .set(SysResult, base + size, "brk() failed resize");
            return;
        }

        let new_size = tracee.regs.get(Modified, SysArg(SysArg3)) - *HEAP_OFFSET;
        tracee.heap.borrow_mut().size = new_size;

        tracee
            .regs
            .set(SysResult, base + new_size, "brk() resized result");
    } else if sysnum == sc::nr::BRK {
        // Is it confirmed that this suspicious call to brk(2) is actually
        // legit?
        if result == tracee.regs.get(Original, SysArg(SysArg1)) && result != 0 {
            tracee.heap.borrow_mut().disabled = true;
        }
    } else {
        unreachable!();
    }

    debug!(
        "-- {} brk() = {:#x}",
        tracee.pid,
        tracee.regs.get(Current, SysResult)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_brk_shrink_below_base_is_cancelled() {
        let mut tracee = Tracee::mock(Pid::from_raw(-1));
        tracee.regs.save_current_regs(Original);

        tracee.heap.borrow_mut().base = 0x5000_0000;
        tracee.heap.borrow_mut().size = 0x2000;

        tracee
            .regs
            .set(SysArg(SysArg1), 0x4fff_0000, "brk below the base");
        enter(&mut tracee).unwrap();

        assert_eq!(
            tracee.regs.get(Current, crate::register::SysNum),
            crate::arch::VOID_SYSNUM
        );

        // the exit stage reports the current heap end
        tracee.regs.save_current_regs(Modified);
        exit(&mut tracee);
        assert_eq!(tracee.regs.get(Current, SysResult), 0x5000_2000);
    }

    #[test]
    fn test_brk_grow_is_rewritten_to_mremap() {
        let mut tracee = Tracee::mock(Pid::from_raw(-1));
        tracee.regs.save_current_regs(Original);

        tracee.heap.borrow_mut().base = 0x5000_0000;
        tracee.heap.borrow_mut().size = 0;

        tracee
            .regs
            .set(SysArg(SysArg1), 0x5000_4000, "grow the heap");
        enter(&mut tracee).unwrap();

        assert_eq!(tracee.regs.get_sys_num(Current), sc::nr::MREMAP);
        assert_eq!(
            tracee.regs.get(Current, SysArg(SysArg1)),
            0x5000_0000 - *HEAP_OFFSET
        );
        assert_eq!(
            tracee.regs.get(Current, SysArg(SysArg3)),
            0x4000 + *HEAP_OFFSET
        );

        // simulate a successful mremap
        tracee.regs.save_current_regs(Modified);
        tracee.regs.set(
            SysResult,
            0x5000_0000 - *HEAP_OFFSET,
            "simulated mremap result",
        );
        exit(&mut tracee);

        assert_eq!(tracee.heap.borrow().size, 0x4000);
        assert_eq!(tracee.regs.get(Current, SysResult), 0x5000_4000);
    }

    #[test]
    fn test_brk_mremap_error_returns_previous_end() {
        let mut tracee = Tracee::mock(Pid::from_raw(-1));
        tracee.regs.save_current_regs(Original);

        tracee.heap.borrow_mut().base = 0x5000_0000;
        tracee.heap.borrow_mut().size = 0x1000;

        tracee
            .regs
            .set(SysArg(SysArg1), 0x5100_0000, "grow the heap");
        enter(&mut tracee).unwrap();
        tracee.regs.save_current_regs(Modified);

        // simulate -ENOMEM from mremap
        tracee
            .regs
            .set(SysResult, -12i64 as Word, "simulated mremap failure");
        exit(&mut tracee);

        // the tracee sees the previous heap end, per the brk contract
        assert_eq!(tracee.regs.get(Current, SysResult), 0x5000_1000);
        assert_eq!(tracee.heap.borrow().size, 0x1000);
    }

    #[test]
    fn test_brk_disabled_after_legit_brk() {
        let mut tracee = Tracee::mock(Pid::from_raw(-1));

        tracee
            .regs
            .set(SysArg(SysArg1), 0x1234_5000, "legit brk address");
        tracee.regs.save_current_regs(Original);
        tracee.heap.borrow_mut().base = 0x5000_0000;
        tracee.regs.set_sys_num(sc::nr::BRK, "unmodified brk");
        tracee.regs.save_current_regs(Modified);
        tracee
            .regs
            .set(SysResult, 0x1234_5000, "kernel granted the exact address");

        exit(&mut tracee);

        assert!(tracee.heap.borrow().disabled);
    }
}
