//! Queue of "unrequested" syscalls appended after a real syscall of a
//! tracee. Once the current syscall reaches its exit stage, each chained
//! syscall is forged in turn by rewinding the instruction pointer onto the
//! trap instruction, so the kernel sees them as ordinary syscalls issued by
//! the tracee itself.

use std::collections::VecDeque;

use nix::sys::signal::Signal;

use crate::arch::SYSTRAP_SIZE;
use crate::errors::Result;
use crate::process::tracee::{Tracee, TraceeRestartMethod};
use crate::register::{
    Current, InstrPointer, Original, SysArg, SysArg1, SysArg2, SysArg3, SysArg4, SysArg5, SysArg6,
    SysNum, SysResult, Word,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainedSyscall {
    pub sysnum: Word,
    pub sysargs: [Word; 6],
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SysnumWorkaroundState {
    Inactive,
    /// The faulty call is being re-executed with neutralized arguments.
    ProcessFaultyCall,
    /// The faulty call just completed, the real one comes next.
    ProcessReplacedCall,
}

impl Default for SysnumWorkaroundState {
    fn default() -> Self {
        SysnumWorkaroundState::Inactive
    }
}

/// Per-tracee chain state.
#[derive(Debug, Default)]
pub struct SyscallChain {
    pub syscalls: VecDeque<ChainedSyscall>,
    pub force_final_result: bool,
    pub final_result: Word,
    /// Signal received in the middle of a chain, delivered again once the
    /// chain is empty so the chain stays atomic for its tracee.
    pub suppressed_signal: Option<Signal>,
    pub sysnum_workaround_state: SysnumWorkaroundState,
}

impl SyscallChain {
    pub fn is_active(&self) -> bool {
        !self.syscalls.is_empty()
    }
}

/// Appends a new syscall to the chain of the given tracee. The caller is
/// free to force the result of the whole chain through
/// `chain.force_final_result`.
pub fn register_chained_syscall(
    tracee: &mut Tracee,
    sysnum: Word,
    sysargs: [Word; 6],
) -> Result<()> {
    tracee
        .chain
        .syscalls
        .push_back(ChainedSyscall { sysnum, sysargs });
    Ok(())
}

fn register_chained_syscall_front(
    tracee: &mut Tracee,
    sysnum: Word,
    sysargs: [Word; 6],
) -> Result<()> {
    tracee
        .chain
        .syscalls
        .push_front(ChainedSyscall { sysnum, sysargs });
    Ok(())
}

/// Pops the first element of the chain to forge a new syscall. Must be
/// called only at the very end of the sysexit stage.
pub fn chain_next_syscall(tracee: &mut Tracee) {
    let syscall = match tracee.chain.syscalls.pop_front() {
        Some(syscall) => syscall,
        None => {
            // No more chained syscalls: force the result of the initial
            // syscall (the one explicitly requested by the tracee).
            if tracee.chain.force_final_result {
                let final_result = tracee.chain.final_result;
                tracee
                    .regs
                    .set(SysResult, final_result, "forced final chain result");
            }
            tracee.chain.force_final_result = false;
            tracee.chain.final_result = 0;

            debug!("-- {} chain_next_syscall finish", tracee.pid);
            return;
        }
    };

    debug!("-- {} chain_next_syscall continue", tracee.pid);

    // Original register values will be restored right after the last
    // chained syscall.
    tracee.regs.set_restore_original_regs(false);

    tracee
        .regs
        .set(SysArg(SysArg1), syscall.sysargs[0], "chained syscall arg");
    tracee
        .regs
        .set(SysArg(SysArg2), syscall.sysargs[1], "chained syscall arg");
    tracee
        .regs
        .set(SysArg(SysArg3), syscall.sysargs[2], "chained syscall arg");
    tracee
        .regs
        .set(SysArg(SysArg4), syscall.sysargs[3], "chained syscall arg");
    tracee
        .regs
        .set(SysArg(SysArg5), syscall.sysargs[4], "chained syscall arg");
    tracee
        .regs
        .set(SysArg(SysArg6), syscall.sysargs[5], "chained syscall arg");
    tracee.regs.set(SysNum, syscall.sysnum, "chained sysnum");

    // Move the instruction pointer back to the original trap.
    let instr_pointer = tracee.regs.get(Current, InstrPointer);
    tracee.regs.set(
        InstrPointer,
        instr_pointer - SYSTRAP_SIZE,
        "rewind to the trap for the chained syscall",
    );

    // Break after the exit of this syscall, there may be another one in
    // the chain.
    tracee.restart_how = TraceeRestartMethod::WithExitStage;
}

/// Restarts the original syscall of the given tracee; the result of the
/// current one will be overwritten.
pub fn restart_original_syscall(tracee: &mut Tracee) -> Result<()> {
    let sysnum = tracee.regs.get(Original, SysNum);
    let sysargs = [
        tracee.regs.get(Original, SysArg(SysArg1)),
        tracee.regs.get(Original, SysArg(SysArg2)),
        tracee.regs.get(Original, SysArg(SysArg3)),
        tracee.regs.get(Original, SysArg(SysArg4)),
        tracee.regs.get(Original, SysArg(SysArg5)),
        tracee.regs.get(Original, SysArg(SysArg6)),
    ];
    register_chained_syscall(tracee, sysnum, sysargs)
}

/// Workaround for kernels that reject a sysnum change during a syscall
/// stop: the current syscall is re-executed with all its arguments set to
/// -1 (so it fails cleanly), and the intended call is chained right after.
pub fn restart_current_syscall_as_chained(tracee: &mut Tracee) -> Result<()> {
    assert_eq!(
        tracee.chain.sysnum_workaround_state,
        SysnumWorkaroundState::Inactive
    );
    tracee.chain.sysnum_workaround_state = SysnumWorkaroundState::ProcessFaultyCall;

    let sysnum = tracee.regs.get(Current, SysNum);
    let sysargs = [
        tracee.regs.get(Current, SysArg(SysArg1)),
        tracee.regs.get(Current, SysArg(SysArg2)),
        tracee.regs.get(Current, SysArg(SysArg3)),
        tracee.regs.get(Current, SysArg(SysArg4)),
        tracee.regs.get(Current, SysArg(SysArg5)),
        tracee.regs.get(Current, SysArg(SysArg6)),
    ];
    register_chained_syscall_front(tracee, sysnum, sysargs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tracee::Tracee;
    use nix::unistd::Pid;

    fn build_tracee() -> Tracee {
        let mut tracee = Tracee::mock(Pid::from_raw(-1));
        tracee.regs.save_current_regs(Original);
        tracee
    }

    #[test]
    fn test_chain_fifo_order() {
        let mut tracee = build_tracee();

        register_chained_syscall(&mut tracee, 11, [1, 2, 3, 4, 5, 6]).unwrap();
        register_chained_syscall(&mut tracee, 22, [0; 6]).unwrap();

        assert!(tracee.chain.is_active());

        chain_next_syscall(&mut tracee);
        assert_eq!(tracee.regs.get(Current, SysNum), 11);
        assert_eq!(tracee.regs.get(Current, SysArg(SysArg3)), 3);
        assert_eq!(tracee.restart_how, TraceeRestartMethod::WithExitStage);

        chain_next_syscall(&mut tracee);
        assert_eq!(tracee.regs.get(Current, SysNum), 22);

        assert!(!tracee.chain.is_active());
    }

    #[test]
    fn test_chain_forces_final_result() {
        let mut tracee = build_tracee();

        tracee.chain.force_final_result = true;
        tracee.chain.final_result = 42;

        // empty chain: the final result is applied and the state reset
        chain_next_syscall(&mut tracee);

        assert_eq!(tracee.regs.get(Current, SysResult), 42);
        assert_eq!(tracee.chain.force_final_result, false);
    }

    #[test]
    fn test_chain_rewinds_instruction_pointer() {
        let mut tracee = build_tracee();

        tracee
            .regs
            .set(InstrPointer, 0x1000, "test instruction pointer");
        register_chained_syscall(&mut tracee, 1, [0; 6]).unwrap();

        chain_next_syscall(&mut tracee);

        assert_eq!(
            tracee.regs.get(Current, InstrPointer),
            0x1000 - SYSTRAP_SIZE
        );
    }

    #[test]
    fn test_restart_original_syscall_uses_original_regs() {
        let mut tracee = build_tracee();

        tracee.regs.set(SysNum, 33, "scratch the sysnum");
        restart_original_syscall(&mut tracee).unwrap();

        // the chained call carries the ORIGINAL values, not the current
        // ones
        assert_eq!(tracee.chain.syscalls[0].sysnum, 0);
    }
}
