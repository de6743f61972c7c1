use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::errors::*;
use crate::filesystem::{proc, FileSystem};
use crate::kernel::chain::SyscallChain;
use crate::kernel::execve::LoadInfo;
use crate::kernel::heap::Heap;
use crate::register::{Registers, Word};

#[derive(Debug, PartialEq)]
pub enum TraceeStatus {
    /// Enter stage of a syscall.
    SysEnter,
    /// Exit stage of a syscall, no error so far.
    SysExit,
    /// Exit stage of a syscall whose translation failed: the (negated)
    /// errno becomes the syscall result.
    Error(Error),
}

impl TraceeStatus {
    pub fn is_err(&self) -> bool {
        matches!(*self, TraceeStatus::Error(_))
    }

    pub fn is_ok(&self) -> bool {
        !self.is_err()
    }

    pub fn get_errno(&self) -> i32 {
        match self {
            TraceeStatus::Error(err) => err.get_errno() as i32,
            _ => 0,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum TraceeRestartMethod {
    /// Restart the tracee without going through the exit stage
    /// (PTRACE_CONT).
    WithoutExitStage,
    /// Restart the tracee and stop at the exit stage (PTRACE_SYSCALL).
    WithExitStage,
    /// Single step (emulated PTRACE_SINGLESTEP from a ptracer).
    SingleStep,
    /// Do not restart the tracee: it stays stopped, typically because its
    /// emulated ptracer has to collect an event first.
    DoNotRestart,
    /// Nothing to restart yet.
    None,
}

/// State of this process as an emulated ptracer.
#[derive(Debug, Default)]
pub struct PtracerState {
    pub nb_ptracees: usize,
    /// Terminated ptracees not yet collected through the emulated wait.
    pub zombies: Vec<Pid>,
    /// Pid argument of the emulated wait in progress.
    pub wait_pid: i32,
    /// Options of the emulated wait in progress.
    pub wait_options: Word,
    /// True while this ptracer is parked inside the emulated wait.
    pub waits_in_proot: bool,
}

/// State of this process as an emulated ptracee.
#[derive(Debug, Default)]
pub struct PtraceeState {
    /// The emulated ptracer, at most one.
    pub ptracer: Option<Pid>,
    /// Wait status the tracer observed but has not yet delivered.
    pub event_proot: Option<i32>,
    /// Wait status delivered (or being delivered) to the ptracer.
    pub event_ptracer: Option<i32>,
    /// Message for the emulated PTRACE_GETEVENTMSG.
    pub event_message: Word,
    /// Options set through the emulated PTRACE_SETOPTIONS.
    pub options: Word,
    /// Syscall stops are not reported to the ptracer (PTRACE_CONT).
    pub ignore_syscalls: bool,
    /// Syscall stops of the loader are never reported to the ptracer.
    pub ignore_loader_syscalls: bool,
    /// Terminated, but not yet reaped by the ptracer.
    pub is_zombie: bool,
}

#[derive(Debug)]
pub struct Tracee {
    /// Process identifier.
    pub pid: Pid,
    /// Process that created this tracee, if it is known.
    pub parent: Option<Pid>,
    /// Whether the process is currently running (between a restart and
    /// the next stop).
    pub running: bool,
    /// Whether the process is terminated.
    pub terminated: bool,
    /// Whether the tracee is in the enter or exit stage.
    pub status: TraceeStatus,
    /// How the tracee will be restarted after the current stop.
    pub restart_how: TraceeRestartMethod,
    /// Value of `restart_how` before a PTRACE_EVENT interrupted a chain,
    /// so the chain can resume with the right method.
    pub last_restart_how: TraceeRestartMethod,
    /// Contains the bindings and the cwd, shared per CLONE_FS.
    pub fs: Rc<RefCell<FileSystem>>,
    /// Emulated heap, shared per CLONE_VM.
    pub heap: Rc<RefCell<Heap>>,
    /// Cached version of the process' general purpose registers.
    pub regs: Registers,
    /// State of the seccomp acceleration for this tracee.
    pub seccomp: bool,
    /// Ensure the sysexit stage is always hit under seccomp.
    pub sysexit_pending: bool,
    /// Path to the executable, à la /proc/self/exe. Updated at execve
    /// enter, committed at execve exit.
    pub new_exe: Option<PathBuf>,
    pub exe: Option<PathBuf>,
    /// Load map of the executable being (or last) exec'd.
    pub load_info: Option<LoadInfo>,
    /// The next execve exit stage finalizes a loader notification.
    pub sentinel_execve: bool,
    /// A SIGSYS rewrite is in flight: the pre-rewrite registers have to
    /// be restored once the replacement syscall completes.
    pub seccomp_rewrite_pending: bool,
    /// Queue of syscalls to run behind the tracee's back.
    pub chain: SyscallChain,
    /// This process as an emulated ptracer.
    pub as_ptracer: PtracerState,
    /// This process as an emulated ptracee.
    pub as_ptracee: PtraceeState,
}

impl Tracee {
    pub fn new(pid: Pid, fs: Rc<RefCell<FileSystem>>, heap: Rc<RefCell<Heap>>) -> Tracee {
        Tracee {
            pid,
            parent: None,
            running: false,
            terminated: false,
            status: TraceeStatus::SysEnter, // it always starts by the enter stage
            restart_how: TraceeRestartMethod::None,
            last_restart_how: TraceeRestartMethod::None,
            fs,
            heap,
            regs: Registers::new(pid),
            seccomp: false,
            sysexit_pending: false,
            new_exe: None,
            exe: None,
            load_info: None,
            sentinel_execve: false,
            seccomp_rewrite_pending: false,
            chain: SyscallChain::default(),
            as_ptracer: PtracerState::default(),
            as_ptracee: PtraceeState::default(),
        }
    }

    /// A tracee with zeroed registers, for unit tests that never touch a
    /// real process.
    #[cfg(test)]
    pub fn mock(pid: Pid) -> Tracee {
        let mut tracee = Tracee::new(
            pid,
            Rc::new(RefCell::new(FileSystem::new())),
            Rc::new(RefCell::new(Heap::new())),
        );
        tracee.regs = Registers::from(pid, unsafe { std::mem::zeroed() });
        tracee
    }

    #[inline]
    pub fn reset_restart_how(&mut self) {
        self.running = false;
        self.last_restart_how = self.restart_how;
        self.restart_how = TraceeRestartMethod::None;
    }

    /// Restarts the tracee, delivering `signal` if any.
    pub fn restart(&mut self, signal: Option<Signal>) {
        let restart_result = match self.restart_how {
            TraceeRestartMethod::WithoutExitStage => ptrace::cont(self.pid, signal),
            TraceeRestartMethod::WithExitStage => ptrace::syscall(self.pid, signal),
            TraceeRestartMethod::SingleStep => ptrace::step(self.pid, signal),
            TraceeRestartMethod::DoNotRestart | TraceeRestartMethod::None => return,
        };

        if let Err(error) = restart_result {
            // The tracee has most likely died concurrently.
            warn!("-- {} can't restart the tracee: {}", self.pid, error);
        }

        self.running = true;
        self.restart_how = TraceeRestartMethod::None;
    }

    #[inline]
    pub fn sizeof_word(&self) -> usize {
        self.regs.sizeof_word()
    }

    /// Refreshes the "/proc/<pid>" view of this tracee.
    pub fn update_proc_entry(&self) {
        let fs = self.fs.borrow();
        proc::register_tracee(
            self.pid.as_raw(),
            proc::ProcEntry {
                exe: self
                    .exe
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("/")),
                cwd: fs.get_cwd().to_path_buf(),
                root: fs.get_root().to_path_buf(),
            },
        );
    }
}

impl Drop for Tracee {
    fn drop(&mut self) {
        proc::forget_tracee(self.pid.as_raw());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tests::fork_test;

    #[test]
    fn create_tracee() {
        let tracee = Tracee::mock(Pid::from_raw(42));
        assert_eq!(tracee.pid, Pid::from_raw(42));
        assert_eq!(tracee.status, TraceeStatus::SysEnter);
        assert_eq!(tracee.restart_how, TraceeRestartMethod::None);
    }

    #[test]
    /// Checks the ptrace plumbing works on a real child process: no panic
    /// means set_ptrace_options and restart went through.
    fn create_set_ptrace_options() {
        fork_test(
            std::path::PathBuf::from("/"),
            // expecting a normal execution
            0,
            // parent
            |_, _| true,
            // child
            || {},
        );
    }
}
