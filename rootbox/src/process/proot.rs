use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::env;
use std::ffi::CString;
use std::rc::Rc;

use libc::{c_int, c_void, pid_t, siginfo_t};
use nix::sys::ptrace;
use nix::sys::ptrace::Event as PtraceEvent;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait;
use nix::sys::wait::WaitPidFlag;
use nix::sys::wait::WaitStatus::*;
use nix::unistd::{execvp, fork, getpid, ForkResult, Pid};

use crate::errors::*;
use crate::filesystem::FileSystem;
use crate::kernel::execve::loader::LoaderFile;
use crate::kernel::heap::Heap;
use crate::kernel::ptrace::wait as ptrace_wait;
use crate::kernel::seccomp::{self, SeccompOrdering};
use crate::process::event::EventHandler;
use crate::process::tracee::{Tracee, TraceeRestartMethod};
use crate::register::{Current, SysArg, SysArg1, Word};

const CLONE_VM: Word = 0x100;
const CLONE_FS: Word = 0x200;

lazy_static! {
    /// Pids of the alive tracees, readable from the signal handlers.
    static ref ALIVE_PIDS: std::sync::Mutex<Vec<pid_t>> = std::sync::Mutex::new(Vec::new());
}

/// Global info common to all tracees.
#[derive(Debug)]
pub struct InfoBag {
    /// Whether the first stop has been processed (and the
    /// `set_ptrace_options` step done).
    pub deliver_sigtrap: bool,
    /// Host-side loader binaries, used by execve.
    pub loader: Option<LoaderFile>,
    /// A BPF filter was installed in the first tracee.
    pub seccomp_enabled: bool,
    /// Which of the seccomp event or the syscall stop this kernel reports
    /// first.
    pub seccomp_ordering: SeccompOrdering,
    /// Kill the remaining tracees when the first one exits.
    pub kill_on_exit: bool,
}

impl InfoBag {
    pub fn new() -> InfoBag {
        InfoBag {
            deliver_sigtrap: false,
            loader: LoaderFile::locate().ok(),
            seccomp_enabled: false,
            seccomp_ordering: SeccompOrdering::from_environment(),
            kill_on_exit: false,
        }
    }
}

pub struct PRoot {
    pub info_bag: RefCell<InfoBag>,
    tracees: RefCell<HashMap<Pid, Rc<RefCell<Tracee>>>>,
    alive_tracees: RefCell<Vec<Pid>>,
    /// Tracees to forget at the next event-loop iteration (they can't be
    /// removed while their RefCell is borrowed).
    removal_queue: RefCell<Vec<Pid>>,
    /// Pid of the very first tracee, whose exit status becomes ours.
    initial_tracee: Cell<Option<Pid>>,
    /// Exit status of the last terminated tracee.
    exit_status: Cell<i32>,
}

impl PRoot {
    pub fn new() -> PRoot {
        PRoot {
            info_bag: RefCell::new(InfoBag::new()),
            tracees: RefCell::new(HashMap::new()),
            alive_tracees: RefCell::new(vec![]),
            removal_queue: RefCell::new(vec![]),
            initial_tracee: Cell::new(None),
            exit_status: Cell::new(0),
        }
    }

    pub fn get_exit_status(&self) -> i32 {
        self.exit_status.get()
    }

    pub fn set_kill_on_exit(&self, kill_on_exit: bool) {
        self.info_bag.borrow_mut().kill_on_exit = kill_on_exit;
    }

    /// Forks the first tracee: the child declares itself ptrace-able,
    /// installs the seccomp filter and execs the guest command.
    pub fn launch_process(&self, initial_fs: FileSystem, command: &[CString]) -> Result<()> {
        let install_seccomp = env::var_os("PROOT_NO_SECCOMP").is_none();

        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                self.info_bag.borrow_mut().seccomp_enabled = install_seccomp;
                self.initial_tracee.set(Some(child));

                let fs = Rc::new(RefCell::new(initial_fs));
                let heap = Rc::new(RefCell::new(Heap::new()));
                let tracee = self.create_tracee(child, fs, heap);
                tracee.borrow().update_proc_entry();
                Ok(())
            }
            ForkResult::Child => {
                // Declare the tracee as ptraceable.
                ptrace::traceme().expect("ptrace traceme");

                // Synchronise with the parent's event loop by waiting
                // until it's ready (otherwise the execvp is executed too
                // quickly).
                kill(getpid(), Signal::SIGSTOP).expect("first child synchronisation");

                if install_seccomp {
                    if let Err(error) = seccomp::install_filter() {
                        eprintln!("warning: can't install the seccomp filter: {}", error);
                    }
                }

                execvp(&command[0], command).expect("failed to exec the guest command");
                unreachable!()
            }
        }
    }

    /// Infinite loop waiting for tracee events with waitpid(2): each stop
    /// is fully processed, then the tracee is restarted, until no tracee
    /// remains.
    pub fn event_loop(&self) {
        while !self.alive_tracees.borrow().is_empty() {
            self.drain_removal_queue();

            let wait_status =
                match wait::waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
                    Ok(status) => status,
                    Err(error) => {
                        warn!("event loop waitpid failure: {}", error);
                        break;
                    }
                };

            match wait_status {
                Exited(pid, exit_status) => {
                    debug!("-- {} exited with status {}", pid, exit_status);
                    self.handle_tracee_termination(pid, (exit_status as i32) << 8, exit_status);
                }
                Signaled(pid, term_signal, _dumped_core) => {
                    debug!("-- {} killed by {:?}", pid, term_signal);
                    self.handle_tracee_termination(
                        pid,
                        term_signal as i32,
                        128 + term_signal as i32,
                    );
                }
                Stopped(pid, stop_signal) => {
                    self.handle_stopped(pid, stop_signal);
                }
                PtraceEvent(pid, _signal, status_additional) => {
                    self.handle_ptrace_event(pid, status_additional);
                }
                PtraceSyscall(pid) => {
                    self.handle_syscall_stop(pid);
                }
                Continued(pid) => {
                    debug!("-- {} continued", pid);
                }
                StillAlive => {
                    debug!("-- still alive");
                }
            }
        }

        self.drain_removal_queue();
    }

    /// The tracee was stopped by a plain signal (signal-delivery-stop).
    fn handle_stopped(&self, pid: Pid, stop_signal: Signal) {
        let tracee = match self.get_tracee(pid) {
            Some(tracee) => tracee,
            None => {
                debug!("-- {} stopped but unknown, ignored", pid);
                return;
            }
        };
        let mut tracee = tracee.borrow_mut();
        tracee.reset_restart_how();

        let first_stop = !self.info_bag.borrow().deliver_sigtrap;
        let mut forwarded_signal = None;

        match stop_signal {
            Signal::SIGSTOP | Signal::SIGTRAP if first_stop => {
                // First stop of the first tracee: install the ptrace
                // options and swallow the synchronisation signal.
                self.set_ptrace_options(&tracee);
                self.info_bag.borrow_mut().deliver_sigtrap = true;
                tracee.handle_sigstop_event();
            }
            Signal::SIGSTOP => {
                tracee.handle_sigstop_event();
            }
            Signal::SIGSYS => {
                // Raised by the host's own seccomp policy: rewrite the
                // blocked syscall and swallow the signal.
                if let Err(error) = seccomp::handle_sigsys(&mut tracee) {
                    warn!("-- {} SIGSYS rewrite failed: {}", pid, error);
                    forwarded_signal = Some(Signal::SIGSYS);
                }
            }
            signal => {
                // Report the stop to the emulated ptracer, if any.
                if tracee.as_ptracee.ptracer.is_some() {
                    let status = stop_status(signal as i32);
                    if ptrace_wait::handle_ptracee_event(self, &mut tracee, status) {
                        return;
                    }
                }
                forwarded_signal = tracee.handle_signal_delivery(signal);
                if tracee.restart_how == TraceeRestartMethod::None {
                    tracee.restart_how = if tracee.seccomp {
                        TraceeRestartMethod::WithoutExitStage
                    } else {
                        TraceeRestartMethod::WithExitStage
                    };
                }
            }
        }

        tracee.restart(forwarded_signal);
    }

    /// The tracee was stopped by a PTRACE_EVENT.
    fn handle_ptrace_event(&self, pid: Pid, status_additional: c_int) {
        let tracee = match self.get_tracee(pid) {
            Some(tracee) => tracee,
            None => return,
        };
        let mut tracee = tracee.borrow_mut();
        tracee.reset_restart_how();

        if status_additional == PtraceEvent::PTRACE_EVENT_FORK as i32
            || status_additional == PtraceEvent::PTRACE_EVENT_VFORK as i32
            || status_additional == PtraceEvent::PTRACE_EVENT_CLONE as i32
        {
            self.handle_new_child_event(&mut tracee, status_additional);
        } else if status_additional == PtraceEvent::PTRACE_EVENT_EXEC as i32
            || status_additional == PtraceEvent::PTRACE_EVENT_VFORK_DONE as i32
        {
            if status_additional == PtraceEvent::PTRACE_EVENT_EXEC as i32
                && tracee.as_ptracee.ptracer.is_some()
                && tracee.as_ptracee.options
                    & ptrace::Options::PTRACE_O_TRACEEXEC.bits() as Word
                    != 0
            {
                let status = stop_status(
                    Signal::SIGTRAP as i32 | ((PtraceEvent::PTRACE_EVENT_EXEC as i32) << 8),
                );
                if ptrace_wait::handle_ptracee_event(self, &mut tracee, status) {
                    return;
                }
            }
            tracee.handle_exec_vfork_event();
        } else if status_additional == PtraceEvent::PTRACE_EVENT_SECCOMP as i32 {
            let mut info_bag = self.info_bag.borrow_mut();
            tracee.handle_seccomp_event(&mut info_bag, self);
        } else if status_additional == PtraceEvent::PTRACE_EVENT_EXIT as i32 {
            // The exit status is delivered with the subsequent waitpid
            // notification; nothing to do here.
        }

        if tracee.restart_how == TraceeRestartMethod::None {
            // A PTRACE_EVENT that interrupted a chain resumes with the
            // remembered restart method.
            tracee.restart_how = match tracee.last_restart_how {
                TraceeRestartMethod::None => TraceeRestartMethod::WithExitStage,
                method => method,
            };
        }
        tracee.restart(None);
    }

    /// The tracee was stopped by the execution of a system call
    /// (PTRACE_O_TRACESYSGOOD is in effect).
    fn handle_syscall_stop(&self, pid: Pid) {
        let tracee = match self.get_tracee(pid) {
            Some(tracee) => tracee,
            None => return,
        };
        let mut tracee = tracee.borrow_mut();
        tracee.reset_restart_how();

        {
            let mut info_bag = self.info_bag.borrow_mut();
            tracee.handle_syscall_stop_event(&mut info_bag, self);
        }

        // Report this stop to the emulated ptracer, unless it has to stay
        // hidden (PTRACE_CONT, or syscalls issued by the loader).
        if tracee.as_ptracee.ptracer.is_some()
            && !tracee.as_ptracee.ignore_syscalls
            && !tracee.as_ptracee.ignore_loader_syscalls
        {
            let status = stop_status(Signal::SIGTRAP as i32 | 0x80);
            if ptrace_wait::handle_ptracee_event(self, &mut tracee, status) {
                return;
            }
        }

        // Once a chain is over, re-deliver the signal it suppressed.
        let suppressed = if tracee.chain.is_active() {
            None
        } else {
            tracee.chain.suppressed_signal.take()
        };

        tracee.restart(suppressed);
    }

    /// Creation of a new process: `CLONE_FS` shares the filesystem
    /// namespace, `CLONE_VM` shares the emulated heap, everything else is
    /// copied.
    fn handle_new_child_event(&self, parent: &mut Tracee, event: c_int) {
        let child_pid = match ptrace::getevent(parent.pid) {
            Ok(child_pid) => Pid::from_raw(child_pid as i32),
            Err(error) => {
                warn!("-- {} can't get the new child pid: {}", parent.pid, error);
                return;
            }
        };

        debug!("-- {} new child {} (event {})", parent.pid, child_pid, event);

        let clone_flags = if event == PtraceEvent::PTRACE_EVENT_CLONE as i32 {
            // The clone flags are still readable from the parent's
            // registers at this stop.
            let _ = parent.regs.fetch_regs();
            parent.regs.get(Current, SysArg(SysArg1))
        } else {
            0
        };

        let fs = if clone_flags & CLONE_FS != 0 {
            parent.fs.clone()
        } else {
            Rc::new(RefCell::new(parent.fs.borrow().fork()))
        };
        let heap = if clone_flags & CLONE_VM != 0 {
            parent.heap.clone()
        } else {
            let copy = {
                let heap = parent.heap.borrow();
                Heap {
                    base: heap.base,
                    size: heap.size,
                    disabled: heap.disabled,
                }
            };
            Rc::new(RefCell::new(copy))
        };

        // GETEVENTMSG from an emulated ptracer reports the new pid.
        parent.as_ptracee.event_message = child_pid.as_raw() as Word;

        let child = self.create_tracee(child_pid, fs, heap);
        {
            let mut child = child.borrow_mut();
            child.parent = Some(parent.pid);
            child.exe = parent.exe.clone();
            child.seccomp = parent.seccomp;
            child.update_proc_entry();
        }
    }

    fn handle_tracee_termination(&self, pid: Pid, wait_status: i32, exit_status: i32) {
        self.exit_status.set(exit_status);

        if let Some(tracee) = self.get_tracee(pid) {
            let mut tracee = tracee.borrow_mut();
            tracee.terminated = true;

            if tracee.as_ptracee.ptracer.is_some() {
                ptrace_wait::handle_ptracee_termination(self, &mut tracee, wait_status);
            }

            // A zombie ptracee stays in the table until its ptracer reaps
            // it.
            if !tracee.as_ptracee.is_zombie {
                self.mark_tracee_for_removal(pid);
            }
        }

        self.register_tracee_finished(pid);

        if self.info_bag.borrow().kill_on_exit && Some(pid) == self.initial_tracee.get() {
            self.kill_all_tracees();
        }
    }

    fn set_ptrace_options(&self, tracee: &Tracee) {
        let mut options = ptrace::Options::PTRACE_O_TRACESYSGOOD
            | ptrace::Options::PTRACE_O_TRACEFORK
            | ptrace::Options::PTRACE_O_TRACEVFORK
            | ptrace::Options::PTRACE_O_TRACEVFORKDONE
            | ptrace::Options::PTRACE_O_TRACEEXEC
            | ptrace::Options::PTRACE_O_TRACECLONE
            | ptrace::Options::PTRACE_O_TRACEEXIT;

        if self.info_bag.borrow().seccomp_enabled {
            options |= ptrace::Options::PTRACE_O_TRACESECCOMP;
        }

        if let Err(error) = ptrace::setoptions(tracee.pid, options) {
            warn!("-- {} can't set ptrace options: {}", tracee.pid, error);
        }
    }

    /******** Utilities ****************/

    pub fn create_tracee(
        &self,
        pid: Pid,
        fs: Rc<RefCell<FileSystem>>,
        heap: Rc<RefCell<Heap>>,
    ) -> Rc<RefCell<Tracee>> {
        let tracee = Rc::new(RefCell::new(Tracee::new(pid, fs, heap)));
        self.tracees.borrow_mut().insert(pid, tracee.clone());
        self.register_alive_tracee(pid);
        tracee
    }

    pub fn get_tracee(&self, pid: Pid) -> Option<Rc<RefCell<Tracee>>> {
        self.tracees.borrow().get(&pid).cloned()
    }

    /// Applies `predicate` to every tracee that is not currently being
    /// processed.
    pub fn any_tracee(&self, predicate: impl Fn(&Tracee) -> bool) -> bool {
        self.tracees
            .borrow()
            .values()
            .any(|tracee| match tracee.try_borrow() {
                Ok(tracee) => predicate(&tracee),
                Err(_) => false,
            })
    }

    pub fn for_each_tracee(&self, mut func: impl FnMut(&mut Tracee)) {
        for tracee in self.tracees.borrow().values() {
            if let Ok(mut tracee) = tracee.try_borrow_mut() {
                func(&mut tracee);
            }
        }
    }

    /// Queues a tracee for removal; effective at the next event-loop
    /// iteration.
    pub fn mark_tracee_for_removal(&self, pid: Pid) {
        self.removal_queue.borrow_mut().push(pid);
    }

    fn drain_removal_queue(&self) {
        let pids: Vec<Pid> = self.removal_queue.borrow_mut().drain(..).collect();
        for pid in pids {
            self.tracees.borrow_mut().remove(&pid);
        }
    }

    pub fn kill_all_tracees(&self) {
        for pid in self.alive_tracees.borrow().iter() {
            let _ = kill(*pid, Signal::SIGKILL);
        }
    }

    fn register_alive_tracee(&self, pid: Pid) {
        self.alive_tracees.borrow_mut().push(pid);
        ALIVE_PIDS.lock().unwrap().push(pid.as_raw());
    }

    fn register_tracee_finished(&self, finished_pid: Pid) {
        self.alive_tracees
            .borrow_mut()
            .retain(|pid| *pid != finished_pid);
        ALIVE_PIDS
            .lock()
            .unwrap()
            .retain(|pid| *pid != finished_pid.as_raw());
    }
}

/// Packs a stop signal the way waitpid(2) reports it.
fn stop_status(signal: c_int) -> c_int {
    (signal << 8) | 0x7f
}

/// A fatal signal reached the tracer: kill every tracee before dying.
pub extern "C" fn stop_program(sig_num: c_int, _: *mut siginfo_t, _: *mut c_void) {
    for pid in ALIVE_PIDS.lock().unwrap().iter() {
        unsafe {
            libc::kill(*pid, libc::SIGKILL);
        }
    }
    panic!(
        "abnormal signal {} received, all tracees were killed",
        sig_num
    );
}

pub extern "C" fn show_info(_: pid_t) {
    eprintln!(
        "rootbox: {} tracee(s) alive",
        ALIVE_PIDS.lock().unwrap().len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn create_proot_and_tracee() {
        let proot = PRoot::new();

        // tracee 0 shouldn't exist
        assert!(proot.get_tracee(Pid::from_raw(0)).is_none());

        let fs = Rc::new(RefCell::new(FileSystem::new()));
        let heap = Rc::new(RefCell::new(Heap::new()));
        proot.create_tracee(Pid::from_raw(0), fs, heap);

        // tracee 0 should exist now
        assert!(proot.get_tracee(Pid::from_raw(0)).is_some());

        proot.register_tracee_finished(Pid::from_raw(0));
    }

    #[test]
    fn test_any_tracee_skips_borrowed() {
        let proot = PRoot::new();
        let fs = Rc::new(RefCell::new(FileSystem::new()));
        let heap = Rc::new(RefCell::new(Heap::new()));
        let tracee = proot.create_tracee(Pid::from_raw(1), fs, heap);

        let held = tracee.borrow_mut();
        // the borrowed tracee is not visited, hence no panic
        assert!(!proot.any_tracee(|tracee| tracee.pid == Pid::from_raw(1)));

        drop(held);
        assert!(proot.any_tracee(|tracee| tracee.pid == Pid::from_raw(1)));

        proot.register_tracee_finished(Pid::from_raw(1));
    }
}
