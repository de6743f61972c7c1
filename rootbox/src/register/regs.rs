use crate::arch::VOID_SYSNUM;
use crate::errors::Result;
use crate::register::Word;
use libc::user_regs_struct;
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::fmt;

pub type RegisterSet = user_regs_struct;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RegVersion {
    /// Live register values, pushed back to the tracee on the next push.
    Current = 0,
    /// Snapshot taken at syscall entry.
    Original = 1,
    /// Snapshot taken after the enter-stage rewrite.
    Modified = 2,
    /// Snapshot taken when a SIGSYS rewrite starts, restored afterwards.
    OriginalSeccompRewrite = 3,
}
use self::RegVersion::*;

#[derive(Debug, Copy, Clone, PartialEq)]
#[allow(dead_code)]
pub enum SysArgIndex {
    SysArg1 = 0,
    SysArg2,
    SysArg3,
    SysArg4,
    SysArg5,
    SysArg6,
}
use self::SysArgIndex::*;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Register {
    SysNum,
    SysArg(SysArgIndex),
    SysResult,
    StackPointer,
    InstrPointer,
    RtldFini,
    StateFlags,
    UserArg1,
}
use self::Register::*;

#[derive(Debug)]
pub struct Registers {
    /// Pid of the tracee these registers belong to.
    pid: Pid,
    registers: [Option<RegisterSet>; 4],
    regs_were_changed: bool,
    restore_original_regs: bool,
    /// Compatibility mode: a 32-bit guest on a 64-bit host only sees (and
    /// may only clobber) the low halves of the registers.
    is_32on64: bool,
}

#[allow(dead_code)]
impl Registers {
    /// Creates an empty register bundle.
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            registers: [None, None, None, None],
            regs_were_changed: false,
            restore_original_regs: false,
            is_32on64: false,
        }
    }

    /// Same, but pre-populated with raw values. Useful for tests.
    pub fn from(pid: Pid, raw_regs: RegisterSet) -> Self {
        Self {
            pid,
            registers: [Some(raw_regs), None, None, None],
            regs_were_changed: false,
            restore_original_regs: false,
            is_32on64: false,
        }
    }

    /// Retrieves a value from one of the registers.
    ///
    /// The requested register version must have been saved beforehand,
    /// otherwise the call panics (deliberately, so the backtrace points at
    /// the missing save).
    #[inline]
    pub fn get(&self, version: RegVersion, register: Register) -> Word {
        let value = self.get_raw(self.get_regs(version), register);
        if self.is_32on64 {
            value & 0xffff_ffff
        } else {
            value
        }
    }

    /// Modifies the value of one of the `Current` registers.
    ///
    /// If `new_value` equals the current one, the dirty flag is left
    /// untouched so that an unnecessary `push_regs` can be elided.
    #[inline]
    pub fn set(&mut self, register: Register, new_value: Word, justification: &'static str) {
        let current_value = self.get(Current, register);
        let new_value = if self.is_32on64 {
            // Only overwrite the low half; the kernel keeps the high bits.
            (current_value & !0xffff_ffff) | (new_value & 0xffff_ffff)
        } else {
            new_value
        };

        debug!(
            "-- {}, modifying current reg: {:?}, current_value: {:#x}, new_value: {:#x}, {}",
            self.pid, register, current_value, new_value, justification
        );

        if current_value == new_value {
            return;
        }
        self.set_raw(register, new_value);
        self.regs_were_changed = true;
    }

    /// Saves the `Current` registers into the given `version` ones. This is
    /// the only way to populate the non-`Current` versions.
    #[inline]
    pub fn save_current_regs(&mut self, version: RegVersion) {
        if version != Current {
            let current_regs = *self.get_regs(Current);

            self.registers[version as usize] = Some(current_regs);
        }
    }

    /// Retrieves all the tracee's general purpose registers into `Current`.
    pub fn fetch_regs(&mut self) -> Result<()> {
        let regs: RegisterSet = ptrace::getregs(self.pid)?;

        self.registers[Current as usize] = Some(regs);
        self.regs_were_changed = false;
        Ok(())
    }

    /// Pushes the `Current` registers back to the process, if necessary.
    pub fn push_regs(&mut self) -> Result<()> {
        if !self.regs_were_changed {
            return Ok(());
        }

        if self.restore_original_regs {
            self.restore_regs();
        }

        let pid = self.pid;
        let current_regs = self.get_mut_regs(Current);

        trace!("push regs: {:x?}", current_regs);
        ptrace::setregs(pid, *current_regs)?;
        self.regs_were_changed = false;
        Ok(())
    }

    #[inline]
    fn get_raw(&self, raw_regs: &RegisterSet, register: Register) -> Word {
        match register {
            SysNum => get_reg!(raw_regs, SysNum),
            SysArg(SysArg1) => get_reg!(raw_regs, SysArg1),
            SysArg(SysArg2) => get_reg!(raw_regs, SysArg2),
            SysArg(SysArg3) => get_reg!(raw_regs, SysArg3),
            SysArg(SysArg4) => get_reg!(raw_regs, SysArg4),
            SysArg(SysArg5) => get_reg!(raw_regs, SysArg5),
            SysArg(SysArg6) => get_reg!(raw_regs, SysArg6),
            SysResult => get_reg!(raw_regs, SysResult),
            StackPointer => get_reg!(raw_regs, StackPointer),
            InstrPointer => get_reg!(raw_regs, InstrPointer),
            RtldFini => get_reg!(raw_regs, RtldFini),
            StateFlags => get_reg!(raw_regs, StateFlags) as Word,
            UserArg1 => get_reg!(raw_regs, UserArg1),
        }
    }

    /// Only the `Current` registers may be modified directly; the other
    /// versions are created through saves.
    #[inline]
    fn set_raw(&mut self, register: Register, new_value: Word) {
        let raw_regs = self.get_mut_regs(Current);

        match register {
            SysNum => get_reg!(raw_regs, SysNum) = new_value,
            SysArg(SysArg1) => get_reg!(raw_regs, SysArg1) = new_value,
            SysArg(SysArg2) => get_reg!(raw_regs, SysArg2) = new_value,
            SysArg(SysArg3) => get_reg!(raw_regs, SysArg3) = new_value,
            SysArg(SysArg4) => get_reg!(raw_regs, SysArg4) = new_value,
            SysArg(SysArg5) => get_reg!(raw_regs, SysArg5) = new_value,
            SysArg(SysArg6) => get_reg!(raw_regs, SysArg6) = new_value,
            SysResult => get_reg!(raw_regs, SysResult) = new_value,
            StackPointer => get_reg!(raw_regs, StackPointer) = new_value,
            InstrPointer => get_reg!(raw_regs, InstrPointer) = new_value,
            RtldFini => get_reg!(raw_regs, RtldFini) = new_value,
            StateFlags => get_reg!(raw_regs, StateFlags) = new_value as _,
            UserArg1 => get_reg!(raw_regs, UserArg1) = new_value,
        };
    }

    /// Overwrites the current regs with the ones saved in `version`,
    /// keeping the syscall result (it is precisely what the tracee must
    /// observe). Used to hide a seccomp-induced rewrite.
    pub fn restore_stash(&mut self, version: RegVersion) {
        let stashed_regs = self.registers[version as usize].unwrap();
        let current_regs = self.registers[Current as usize].as_mut().unwrap();

        get_reg!(current_regs, SysNum) = get_reg!(stashed_regs, SysNum);
        get_reg!(current_regs, SysArg1) = get_reg!(stashed_regs, SysArg1);
        get_reg!(current_regs, SysArg2) = get_reg!(stashed_regs, SysArg2);
        get_reg!(current_regs, SysArg3) = get_reg!(stashed_regs, SysArg3);
        get_reg!(current_regs, SysArg4) = get_reg!(stashed_regs, SysArg4);
        get_reg!(current_regs, SysArg5) = get_reg!(stashed_regs, SysArg5);
        get_reg!(current_regs, SysArg6) = get_reg!(stashed_regs, SysArg6);
        get_reg!(current_regs, StackPointer) = get_reg!(stashed_regs, StackPointer);
        self.regs_were_changed = true;
    }

    /// Overwrites the current regs with the original ones, keeping the
    /// syscall result (it is precisely what the exit stage computed).
    #[inline]
    fn restore_regs(&mut self) {
        let original_regs = self.registers[Original as usize].unwrap();
        let current_regs = self.registers[Current as usize].as_mut().unwrap();

        get_reg!(current_regs, SysNum) = get_reg!(original_regs, SysNum);
        get_reg!(current_regs, SysArg1) = get_reg!(original_regs, SysArg1);
        get_reg!(current_regs, SysArg2) = get_reg!(original_regs, SysArg2);
        get_reg!(current_regs, SysArg3) = get_reg!(original_regs, SysArg3);
        get_reg!(current_regs, SysArg4) = get_reg!(original_regs, SysArg4);
        get_reg!(current_regs, SysArg5) = get_reg!(original_regs, SysArg5);
        get_reg!(current_regs, SysArg6) = get_reg!(original_regs, SysArg6);
        get_reg!(current_regs, StackPointer) = get_reg!(original_regs, StackPointer);
    }

    #[inline]
    pub fn get_pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn is_32on64(&self) -> bool {
        self.is_32on64
    }

    #[inline]
    pub fn set_32on64(&mut self, is_32on64: bool) {
        self.is_32on64 = is_32on64;
    }

    #[inline]
    pub fn sizeof_word(&self) -> usize {
        if self.is_32on64 {
            std::mem::size_of::<u32>()
        } else {
            std::mem::size_of::<Word>()
        }
    }

    #[inline]
    fn get_regs(&self, version: RegVersion) -> &RegisterSet {
        match self.registers[version as usize] {
            Some(ref regs) => regs,
            None => unreachable!(),
        }
    }

    #[inline]
    fn get_mut_regs(&mut self, version: RegVersion) -> &mut RegisterSet {
        match self.registers[version as usize] {
            Some(ref mut regs) => regs,
            None => unreachable!(),
        }
    }

    /// Raw copy of one register-set version, for the ptrace emulator.
    #[inline]
    pub fn get_register_set(&self, version: RegVersion) -> RegisterSet {
        *self.get_regs(version)
    }

    /// Overwrites the `Current` register set wholesale, for the ptrace
    /// emulator (PTRACE_SETREGS).
    #[inline]
    pub fn set_register_set(&mut self, raw_regs: RegisterSet) {
        self.registers[Current as usize] = Some(raw_regs);
        self.regs_were_changed = true;
    }

    #[inline]
    pub fn get_sys_num(&self, version: RegVersion) -> usize {
        self.get(version, SysNum) as usize
    }

    #[inline]
    pub fn set_sys_num(&mut self, new_value: usize, justification: &'static str) {
        self.set(SysNum, new_value as Word, justification);
    }

    /// Voids the syscall number so the kernel executes nothing.
    #[inline]
    pub fn cancel_syscall(&mut self, justification: &'static str) {
        self.set(SysNum, VOID_SYSNUM, justification);
    }

    #[inline]
    pub fn set_restore_original_regs(&mut self, restore_original_regs: bool) {
        self.restore_original_regs = restore_original_regs;
    }

    /// Restores the original version of one register.
    #[inline]
    pub fn restore_original(&mut self, register: Register, justification: &'static str) {
        let original_value = self.get(Original, register);

        self.set(register, original_value, justification);
    }

    fn display(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let current_regs = &self.registers[Current as usize].unwrap();

        write!(
            f,
            "(pid {}: syscall {} - args [{}, {}, {}, {}, {}, {}], result {}, stack-ptr {})",
            self.pid,
            get_reg!(current_regs, SysNum),
            get_reg!(current_regs, SysArg1),
            get_reg!(current_regs, SysArg2),
            get_reg!(current_regs, SysArg3),
            get_reg!(current_regs, SysArg4),
            get_reg!(current_regs, SysArg5),
            get_reg!(current_regs, SysArg6),
            get_reg!(current_regs, SysResult),
            get_reg!(current_regs, StackPointer),
        )
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.display(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tests::{fork_test, get_test_rootfs_path};
    use nix::unistd::{execvp, Pid};
    use sc::nr::{CLOCK_NANOSLEEP, NANOSLEEP};
    use std::{ffi::CString, mem};

    #[test]
    fn test_regs_were_changed() {
        let mut regs = Registers::from(Pid::from_raw(-1), unsafe { mem::zeroed() });

        assert_eq!(false, regs.regs_were_changed);

        regs.set(SysNum, 123456, "");

        assert_eq!(true, regs.regs_were_changed);
        assert_eq!(123456, regs.get(Current, SysNum));
    }

    #[test]
    fn test_regs_cancel_syscall() {
        let mut regs = Registers::from(Pid::from_raw(-1), unsafe { mem::zeroed() });

        regs.cancel_syscall("test");
        assert_eq!(VOID_SYSNUM, regs.get(Current, SysNum));
    }

    #[test]
    fn test_regs_restore_keeps_result() {
        let mut regs = Registers::from(Pid::from_raw(-1), unsafe { mem::zeroed() });
        regs.save_current_regs(Original);

        regs.set(SysArg(SysArg1), 0xdead, "scratch an argument");
        regs.set(SysResult, 42, "simulated result");
        regs.restore_regs();

        assert_eq!(0, regs.get(Current, SysArg(SysArg1)));
        assert_eq!(42, regs.get(Current, SysResult));
    }

    #[test]
    fn test_fetch_regs_should_fail_test() {
        let mut regs = Registers::new(Pid::from_raw(-1));

        assert!(regs.fetch_regs().is_err());
    }

    #[test]
    fn test_fetch_regs_sysnum_sleep_test() {
        let rootfs_path = get_test_rootfs_path();

        fork_test(
            rootfs_path,
            // expecting a normal execution
            0,
            // parent
            |tracee, _| {
                // we only stop when the nanosleep syscall is detected
                let sys_num = tracee.regs.get_sys_num(Current);
                sys_num == NANOSLEEP || sys_num == CLOCK_NANOSLEEP
            },
            // child
            || {
                execvp(
                    &CString::new("sleep").unwrap(),
                    &[CString::new(".").unwrap(), CString::new("0").unwrap()],
                )
                .expect("failed execvp sleep");
            },
        );
    }

    #[test]
    /// Voids a NANOSLEEP syscall and simulates its result; fails if the
    /// syscall actually runs (it would sleep for 9999 seconds).
    fn test_push_regs_void_sysnum_sleep_test() {
        let rootfs_path = get_test_rootfs_path();
        let mut sleep_exit = false;

        fork_test(
            rootfs_path,
            0,
            |tracee, _| {
                let sys_num = tracee.regs.get_sys_num(Current);
                if sys_num == NANOSLEEP || sys_num == CLOCK_NANOSLEEP {
                    tracee.regs.set_restore_original_regs(false);
                    tracee.regs.save_current_regs(Original);

                    tracee
                        .regs
                        .cancel_syscall("cancel sleep for push regs test");
                    tracee.regs.push_regs().expect("pushing regs");

                    sleep_exit = true;
                } else if sleep_exit {
                    tracee.regs.set_restore_original_regs(true);
                    tracee.regs.set(SysResult, 0, "simulate successful sleep");
                    tracee.regs.push_regs().expect("pushing regs");
                    return true;
                }

                false
            },
            || {
                execvp(
                    &CString::new("sleep").unwrap(),
                    &[CString::new(".").unwrap(), CString::new("9999").unwrap()],
                )
                .expect("failed execvp sleep");
            },
        );
    }
}
