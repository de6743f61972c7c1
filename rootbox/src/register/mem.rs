use crate::arch::RED_ZONE_SIZE;
use crate::errors::*;
use crate::register::{Current, Original, Registers, StackPointer, Word};

pub trait PtraceMemoryAllocator {
    fn alloc_mem_on_stack(&mut self, size: isize) -> Result<Word>;
}

impl PtraceMemoryAllocator for Registers {
    /// Allocates `size` bytes in the tracee's memory space by growing its
    /// stack downward.
    ///
    /// Only the cached stack pointer is modified here; the registers still
    /// have to be pushed for the update to take place.
    ///
    /// This must only be called at sysenter, since the stack pointer is
    /// systematically restored at the end of sysexit (except for execve,
    /// where the stack holds argc/argv/envp/auxv and is handled with care).
    ///
    /// Returns the address of the allocated block.
    fn alloc_mem_on_stack(&mut self, size: isize) -> Result<Word> {
        let original_stack_pointer = self.get(Original, StackPointer);
        let stack_pointer = self.get(Current, StackPointer);

        // Some ABIs reserve an amount of bytes below the stack pointer for
        // the compiler; skip it only on the first allocation.
        let corrected_size = match stack_pointer == original_stack_pointer {
            false => size,
            true => size + RED_ZONE_SIZE,
        };
        let overflow = corrected_size > 0 && stack_pointer <= corrected_size as Word;
        let underflow = corrected_size < 0
            && stack_pointer >= (usize::MAX as Word) - (-corrected_size as Word);

        if overflow || underflow {
            return Err(Error::errno_with_msg(
                EFAULT,
                "when allocating memory, under/overflow detected",
            ));
        }

        // Remember the stack grows downward.
        let new_stack_pointer = match corrected_size > 0 {
            true => stack_pointer - (corrected_size as Word),
            false => stack_pointer + (-corrected_size as Word),
        };

        self.set(StackPointer, new_stack_pointer, "allocating memory");

        Ok(new_stack_pointer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::regs::RegisterSet;
    use crate::register::Registers;
    use nix::unistd::getpid;
    use std::mem;

    #[test]
    fn test_mem_alloc_normal() {
        let mut raw_regs: RegisterSet = unsafe { mem::zeroed() };
        let starting_stack_pointer = 100000;

        get_reg!(raw_regs, StackPointer) = starting_stack_pointer;

        let mut regs = Registers::from(getpid(), raw_regs);

        regs.save_current_regs(Original);

        let alloc_size = 7575;
        let new_stack_pointer = regs.alloc_mem_on_stack(alloc_size).unwrap();

        // Remember the stack grows downward.
        assert!(new_stack_pointer < starting_stack_pointer);
        assert_eq!(
            starting_stack_pointer - new_stack_pointer,
            alloc_size as Word + RED_ZONE_SIZE as Word
        );
    }

    #[test]
    fn test_mem_alloc_second_alloc_skips_red_zone() {
        let mut raw_regs: RegisterSet = unsafe { mem::zeroed() };

        get_reg!(raw_regs, StackPointer) = 100000;

        let mut regs = Registers::from(getpid(), raw_regs);
        regs.save_current_regs(Original);

        let first = regs.alloc_mem_on_stack(100).unwrap();
        let second = regs.alloc_mem_on_stack(100).unwrap();

        // the red zone is only skipped once
        assert_eq!(first - second, 100);
    }

    #[test]
    fn test_mem_alloc_overflow() {
        let mut raw_regs: RegisterSet = unsafe { mem::zeroed() };
        let starting_stack_pointer = 120;

        get_reg!(raw_regs, StackPointer) = starting_stack_pointer;

        let mut regs = Registers::from(getpid(), raw_regs);

        regs.save_current_regs(Original);

        let alloc_size = 7575;
        let result = regs.alloc_mem_on_stack(alloc_size);

        assert_eq!(Err(Error::errno(EFAULT)), result);
    }
}
