use crate::arch::VOID_SYSNUM;
use crate::errors::*;
use crate::kernel::chain::{self, SysnumWorkaroundState};
use crate::kernel::{enter, exit, seccomp};
use crate::process::proot::{InfoBag, PRoot};
use crate::process::tracee::{Tracee, TraceeRestartMethod, TraceeStatus};
use crate::register::{
    Current, Modified, Original, StackPointer, SysArg, SysArg1, SysArg2, SysArg3, SysArg4,
    SysArg5, SysArg6, SysNum, SysResult, Word,
};

pub trait SyscallTranslator {
    fn translate_syscall(&mut self, info_bag: &InfoBag, proot: &PRoot);
    fn translate_syscall_enter(&mut self, info_bag: &InfoBag, proot: &PRoot);
    fn translate_syscall_exit(&mut self, proot: &PRoot);
}

impl SyscallTranslator for Tracee {
    /// Retrieves the registers, handles either the enter or exit stage of
    /// the system call, and pushes the registers back.
    fn translate_syscall(&mut self, info_bag: &InfoBag, proot: &PRoot) {
        // The tracee was freed or killed concurrently; the registers can't
        // be fetched, just discard this spurious stop.
        if self.regs.fetch_regs().is_err() {
            return;
        }

        let is_enter_stage = self.status == TraceeStatus::SysEnter;

        match self.status {
            TraceeStatus::SysEnter => self.translate_syscall_enter(info_bag, proot),
            TraceeStatus::SysExit | TraceeStatus::Error(_) => self.translate_syscall_exit(proot),
        };

        let sysnum_overridable = is_enter_stage && !self.chain.is_active();
        if self.regs.push_regs().is_err() && sysnum_overridable {
            self.apply_sysnum_workaround();
        }
    }

    fn translate_syscall_enter(&mut self, info_bag: &InfoBag, proot: &PRoot) {
        // Never restore the original register values at the end of this
        // stage.
        self.regs.set_restore_original_regs(false);

        // A syscall chained by this tracer was not requested by the
        // tracee: it must not be translated.
        if self.chain.is_active() {
            self.restart_how = TraceeRestartMethod::WithExitStage;
            return;
        }

        self.regs.save_current_regs(Original);

        // Update the view "/proc/self" has to provide before any path gets
        // resolved.
        {
            let mut fs = self.fs.borrow_mut();
            fs.set_current_pid(self.pid.as_raw());
        }

        let status = enter::translate(info_bag, proot, self);

        match status {
            Err(error) => {
                /* Remember the tracee status for the "exit" stage and
                 * avoid the actual syscall if an error was reported by
                 * the translation. */
                self.regs
                    .cancel_syscall("following error during enter translation");
                self.status = TraceeStatus::Error(error);
            }
            Ok(()) => {
                self.status = TraceeStatus::SysExit;
            }
        }

        self.regs.save_current_regs(Modified);

        // Under the seccomp acceleration, the exit stage is skipped
        // entirely when nothing there needs us.
        if self.restart_how == TraceeRestartMethod::WithoutExitStage {
            let needs_sysexit = self.status.is_err()
                || self.chain.is_active()
                || seccomp::needs_sysexit(self.regs.get_sys_num(Original));

            if needs_sysexit {
                self.restart_how = TraceeRestartMethod::WithExitStage;
            } else {
                // Restore the stack pointer now since the sysexit stage
                // (which usually does it) won't be hit.
                self.status = TraceeStatus::SysEnter;
                self.regs
                    .restore_original(StackPointer, "following the skipped exit stage");
            }
        } else if self.restart_how == TraceeRestartMethod::None {
            self.restart_how = TraceeRestartMethod::WithExitStage;
        }
    }

    fn translate_syscall_exit(&mut self, proot: &PRoot) {
        // By default, restore the original register values at the end of
        // this stage.
        self.regs.set_restore_original_regs(true);

        // Exits of chained syscalls are invisible too, except for the
        // replaced call of the sysnum workaround, which carries the
        // result the tracee must observe.
        if !self.chain.is_active()
            || self.chain.sysnum_workaround_state == SysnumWorkaroundState::ProcessReplacedCall
        {
            self.chain.sysnum_workaround_state = SysnumWorkaroundState::Inactive;

            // Set the tracee's errno if an error occurred during the
            // enter stage.
            if self.status.is_err() {
                self.regs.set(
                    SysResult,
                    -(self.status.get_errno() as i64) as Word,
                    "following the enter stage failure, setting errno",
                );
            } else {
                exit::translate(proot, self);
            }
        } else if self.chain.sysnum_workaround_state == SysnumWorkaroundState::ProcessFaultyCall {
            self.chain.sysnum_workaround_state = SysnumWorkaroundState::ProcessReplacedCall;
        }

        // The completed syscall replaced one blocked by the host's
        // seccomp policy: put the pre-rewrite registers back (minus the
        // result) so the tracee never observes the rewrite.
        if self.seccomp_rewrite_pending {
            self.seccomp_rewrite_pending = false;
            self.regs.set_restore_original_regs(false);
            self.regs
                .restore_stash(crate::register::OriginalSeccompRewrite);
        }

        // Reset the tracee's status for the next syscall.
        self.status = TraceeStatus::SysEnter;

        // A pending chain forges the next syscall right now.
        if self.chain.is_active() || self.chain.force_final_result {
            chain::chain_next_syscall(self);
        }
    }
}

impl Tracee {
    /// Some kernels reject a syscall-number change performed with
    /// PTRACE_SETREGS: the intended call is chained behind the current
    /// one, whose arguments are all set to -1 so it fails cleanly.
    fn apply_sysnum_workaround(&mut self) {
        let original_sysnum = self.regs.get(Original, SysNum);
        let current_sysnum = self.regs.get(Current, SysNum);

        if original_sysnum == current_sysnum {
            return;
        }

        if current_sysnum != VOID_SYSNUM {
            let _ = chain::restart_current_syscall_as_chained(self);
        }

        for arg in &[SysArg1, SysArg2, SysArg3, SysArg4, SysArg5, SysArg6] {
            self.regs.set(
                SysArg(*arg),
                -1i64 as Word,
                "neutralizing the faulty call of the sysnum workaround",
            );
        }
        self.regs
            .set(SysNum, original_sysnum, "back to the writable sysnum");

        if self.regs.push_regs().is_err() {
            warn!("-- {} can't neutralize the faulty syscall", self.pid);
        }

        // The chained call is forged at the faulty call's exit stage.
        self.restart_how = TraceeRestartMethod::WithExitStage;
    }
}
