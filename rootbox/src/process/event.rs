use nix::sys::signal::Signal;

use crate::kernel::seccomp::SeccompOrdering;
use crate::process::proot::{InfoBag, PRoot};
use crate::process::tracee::{Tracee, TraceeRestartMethod, TraceeStatus};
use crate::process::translation::SyscallTranslator;

pub trait EventHandler {
    fn handle_syscall_stop_event(&mut self, info_bag: &mut InfoBag, proot: &PRoot);
    fn handle_sigstop_event(&mut self);
    fn handle_seccomp_event(&mut self, info_bag: &mut InfoBag, proot: &PRoot);
    fn handle_exec_vfork_event(&mut self);
    fn handle_signal_delivery(&mut self, signal: Signal) -> Option<Signal>;
}

impl EventHandler for Tracee {
    /// Standard handling of a syscall-stop: translate the system call's
    /// parameters, the restart is issued by the caller.
    fn handle_syscall_stop_event(&mut self, info_bag: &mut InfoBag, proot: &PRoot) {
        if info_bag.seccomp_enabled
            && info_bag.seccomp_ordering == SeccompOrdering::Unknown
            && self.status == TraceeStatus::SysEnter
        {
            // The enter stop showed up before any seccomp event: this
            // kernel reports seccomp events after the syscall stops.
            info_bag.seccomp_ordering = SeccompOrdering::SigtrapFirst;
        }

        if self.seccomp {
            match self.status {
                TraceeStatus::SysEnter => {
                    // sysenter: ensure the sysexit stage will be hit under
                    // seccomp.
                    self.restart_how = TraceeRestartMethod::WithExitStage;
                    self.sysexit_pending = true;
                }
                TraceeStatus::SysExit | TraceeStatus::Error(_) => {
                    // sysexit: the next sysenter will be notified by
                    // seccomp.
                    self.restart_how = TraceeRestartMethod::WithoutExitStage;
                    self.sysexit_pending = false;
                }
            }
        } else {
            self.restart_how = TraceeRestartMethod::WithExitStage;
        }

        self.translate_syscall(info_bag, proot);
    }

    fn handle_sigstop_event(&mut self) {
        debug!("-- {} sigstop", self.pid);

        // A new child stops with SIGSTOP before its creation event has
        // been processed; it simply gets restarted.
        if self.restart_how == TraceeRestartMethod::None {
            self.restart_how = if self.seccomp {
                TraceeRestartMethod::WithoutExitStage
            } else {
                TraceeRestartMethod::WithExitStage
            };
        }
    }

    /// PTRACE_EVENT_SECCOMP is the cheap sysenter notification: the whole
    /// enter stage happens here when this kernel reports it first.
    fn handle_seccomp_event(&mut self, info_bag: &mut InfoBag, proot: &PRoot) {
        if info_bag.seccomp_ordering == SeccompOrdering::Unknown {
            info_bag.seccomp_ordering = SeccompOrdering::SeccompFirst;
        }

        match info_bag.seccomp_ordering {
            SeccompOrdering::SeccompFirst => {
                self.seccomp = true;

                if self.status == TraceeStatus::SysEnter && !self.sysexit_pending {
                    // Handle the sysenter now and avoid the subsequent
                    // syscall-stop when the exit stage is not needed.
                    self.restart_how = TraceeRestartMethod::WithoutExitStage;
                    self.translate_syscall(info_bag, proot);
                }
            }
            SeccompOrdering::SigtrapFirst => {
                // The syscall stops drive everything on this kernel; the
                // seccomp events bring no extra information.
                if self.restart_how == TraceeRestartMethod::None {
                    self.restart_how = TraceeRestartMethod::WithExitStage;
                }
            }
            SeccompOrdering::Unknown => unreachable!(),
        }
    }

    fn handle_exec_vfork_event(&mut self) {
        debug!("-- {} exec or vfork-done event", self.pid);

        if self.restart_how == TraceeRestartMethod::None {
            self.restart_how = TraceeRestartMethod::WithExitStage;
        }
    }

    /// A plain signal delivery: forwarded to the tracee on restart, unless
    /// it lands in the middle of a chain, in which case it is stashed and
    /// re-delivered once the chain empties (tracees observe chains
    /// atomically).
    fn handle_signal_delivery(&mut self, signal: Signal) -> Option<Signal> {
        if self.chain.is_active() {
            debug!(
                "-- {} suppressing {:?} while a chain is running",
                self.pid, signal
            );
            self.chain.suppressed_signal = Some(signal);
            None
        } else {
            Some(signal)
        }
    }
}
