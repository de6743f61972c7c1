//! Emulation of wait4(2) issued by an emulated ptracer: the kernel never
//! sees the events of an emulated ptracee (this tracer consumes them), so
//! the corresponding waits have to be answered here, preserving the
//! kernel's "one event per wait" contract.

use libc::c_void;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::errors::*;
use crate::kernel::chain;
use crate::kernel::ptrace::ptrace::detach_from_ptracer;
use crate::process::proot::PRoot;
use crate::process::tracee::{Tracee, TraceeRestartMethod};
use crate::register::{
    Original, PtraceWriter, SysArg, SysArg1, SysArg2, SysArg3, SysResult, Word,
};

/// Does `wait_pid` (the first argument of wait4) select this ptracee?
fn pid_matches(wait_pid: i32, ptracee: &Tracee) -> bool {
    // A negative value other than -1 selects a process group; it is
    // approximated by "any" here, like the original does for the common
    // cases.
    wait_pid == -1 || wait_pid == ptracee.pid.as_raw()
}

/// A wait4 is hijacked only when it can be answered by an emulated
/// ptracee's event; other waits are left to the kernel.
pub fn enter(proot: &PRoot, tracee: &mut Tracee) -> Result<bool> {
    if tracee.as_ptracer.nb_ptracees == 0 && tracee.as_ptracer.zombies.is_empty() {
        return Ok(false);
    }

    let wait_pid = tracee.regs.get(Original, SysArg(SysArg1)) as i32;

    let has_matching_ptracee = proot.any_tracee(|candidate| {
        candidate.as_ptracee.ptracer == Some(tracee.pid) && pid_matches(wait_pid, candidate)
    });
    if !has_matching_ptracee {
        return Ok(false);
    }

    tracee
        .regs
        .cancel_syscall("wait4 on an emulated ptracee is emulated");
    Ok(true)
}

/// Answers the emulated wait4: either with a pending event, or by parking
/// the ptracer until one shows up (`None` then leaves the syscall result
/// alone, it will be poked at delivery time).
pub fn exit(proot: &PRoot, tracee: &mut Tracee) -> Result<Option<Word>> {
    let wait_pid = tracee.regs.get(Original, SysArg(SysArg1)) as i32;
    let wait_options = tracee.regs.get(Original, SysArg(SysArg3));

    tracee.as_ptracer.wait_pid = wait_pid;
    tracee.as_ptracer.wait_options = wait_options;

    if let Some((pid, status)) = collect_pending_event(proot, tracee, wait_pid)? {
        let status_address = tracee.regs.get(Original, SysArg(SysArg2));
        if status_address != 0 {
            let bytes = (status as u32).to_le_bytes();
            tracee
                .regs
                .write_data(status_address as *mut c_void, &bytes, false)?;
        }
        return Ok(Some(pid.as_raw() as Word));
    }

    if wait_options & libc::WNOHANG as Word != 0 {
        return Ok(Some(0));
    }

    // No event yet: park this ptracer inside the emulated wait. Its
    // syscall result will be poked when a matching event shows up.
    tracee.as_ptracer.waits_in_proot = true;
    tracee.restart_how = TraceeRestartMethod::DoNotRestart;
    Ok(None)
}

/// Finds (and consumes) a pending event among this ptracer's ptracees and
/// zombies.
fn collect_pending_event(
    proot: &PRoot,
    ptracer: &mut Tracee,
    wait_pid: i32,
) -> Result<Option<(Pid, i32)>> {
    // Zombie ptracees are collected first: their event is final.
    if let Some(index) = ptracer
        .as_ptracer
        .zombies
        .iter()
        .position(|zombie_pid| wait_pid == -1 || wait_pid == zombie_pid.as_raw())
    {
        let zombie_pid = ptracer.as_ptracer.zombies.remove(index);

        if let Some(zombie) = proot.get_tracee(zombie_pid) {
            let mut zombie = zombie.borrow_mut();

            /* The Linux kernel reports the terminating event of a process
             * to both its parent and its tracer, except when they are the
             * same: then the event is reported only once. In that case
             * the emulated event is discarded and the original wait4 is
             * re-executed, so the exit status is collected from a kernel
             * point-of-view (the process doesn't stay a zombie forever). */
            if zombie.parent == Some(ptracer.pid) {
                zombie.as_ptracee.event_proot = None;
                detach_from_ptracer(&mut zombie, ptracer);
                proot.mark_tracee_for_removal(zombie_pid);
                chain::restart_original_syscall(ptracer)?;
                return Ok(None);
            }

            let status = zombie.as_ptracee.event_proot.take().unwrap_or(0);
            detach_from_ptracer(&mut zombie, ptracer);
            proot.mark_tracee_for_removal(zombie_pid);
            return Ok(Some((zombie_pid, status)));
        }
        return Ok(None);
    }

    let mut result = None;
    proot.for_each_tracee(|candidate| {
        if result.is_some() {
            return;
        }
        if candidate.as_ptracee.ptracer != Some(ptracer.pid)
            || !pid_matches(wait_pid, candidate)
        {
            return;
        }
        if let Some(status) = candidate.as_ptracee.event_proot.take() {
            candidate.as_ptracee.event_ptracer = Some(status);
            result = Some((candidate.pid, status));
        }
    });

    Ok(result)
}

/// Reports a stop (or termination) of `ptracee` to its emulated ptracer.
/// Returns true when the event was queued or delivered, in which case the
/// ptracee must stay stopped until its ptracer restarts it.
pub fn handle_ptracee_event(proot: &PRoot, ptracee: &mut Tracee, wait_status: i32) -> bool {
    let ptracer_pid = match ptracee.as_ptracee.ptracer {
        Some(ptracer_pid) => ptracer_pid,
        None => return false,
    };
    let ptracer = match proot.get_tracee(ptracer_pid) {
        Some(ptracer) => ptracer,
        None => return false,
    };
    let mut ptracer = ptracer.borrow_mut();

    ptracee.as_ptracee.event_proot = Some(wait_status);

    // Keep the ptracee stopped until its ptracer restarts it (termination
    // events are final: there is nothing left to restart).
    if !ptracee.terminated {
        ptracee.restart_how = TraceeRestartMethod::DoNotRestart;
    }

    if ptracer.as_ptracer.waits_in_proot
        && pid_matches(ptracer.as_ptracer.wait_pid, ptracee)
    {
        // The ptracer was parked in its emulated wait: answer it now.
        deliver_event_to_waiting_ptracer(&mut ptracer, ptracee, wait_status);
    } else {
        // The ptracer will pick the event up at its next wait4.
        let _ = kill(ptracer_pid, Signal::SIGCHLD);
    }

    true
}

fn deliver_event_to_waiting_ptracer(ptracer: &mut Tracee, ptracee: &mut Tracee, wait_status: i32) {
    ptracee.as_ptracee.event_proot = None;
    ptracee.as_ptracee.event_ptracer = Some(wait_status);

    let status_address = ptracer.regs.get(Original, SysArg(SysArg2));
    if status_address != 0 {
        let bytes = (wait_status as u32).to_le_bytes();
        if let Err(error) =
            ptracer
                .regs
                .write_data(status_address as *mut c_void, &bytes, false)
        {
            warn!("-- {} can't report the wait status: {}", ptracer.pid, error);
        }
    }

    ptracer.regs.set(
        SysResult,
        ptracee.pid.as_raw() as Word,
        "the emulated wait returns this ptracee",
    );
    let _ = ptracer.regs.push_regs();

    ptracer.as_ptracer.waits_in_proot = false;
    ptracer.restart_how = TraceeRestartMethod::WithExitStage;
    ptracer.restart(None);

    // The ptracer observes the usual asynchronous notification too.
    let _ = kill(ptracer.pid, Signal::SIGCHLD);
}

/// Death of an emulated ptracee: when its ptracer is also its parent the
/// termination event short-circuits (the kernel will notify the parent
/// itself); otherwise the tracee becomes a zombie held by its ptracer
/// until reaped.
pub fn handle_ptracee_termination(proot: &PRoot, ptracee: &mut Tracee, wait_status: i32) {
    let ptracer_pid = match ptracee.as_ptracee.ptracer {
        Some(ptracer_pid) => ptracer_pid,
        None => return,
    };
    let ptracer = match proot.get_tracee(ptracer_pid) {
        Some(ptracer) => ptracer,
        None => return,
    };
    let mut ptracer = ptracer.borrow_mut();

    if ptracee.parent == Some(ptracer_pid) {
        /* The kernel reports the termination to the parent by itself, and
         * only once when the parent is also the tracer: discard the
         * emulated event and let the parked wait4 re-execute for real, so
         * the zombie gets reaped kernel-side. */
        detach_from_ptracer(ptracee, &mut ptracer);
        if ptracer.as_ptracer.waits_in_proot {
            ptracer.as_ptracer.waits_in_proot = false;
            if chain::restart_original_syscall(&mut ptracer).is_ok() {
                chain::chain_next_syscall(&mut ptracer);
                let _ = ptracer.regs.push_regs();
                ptracer.restart(None);
            }
        }
        return;
    }

    ptracee.as_ptracee.is_zombie = true;
    ptracee.as_ptracee.event_proot = Some(wait_status);
    ptracer.as_ptracer.zombies.push(ptracee.pid);

    if ptracer.as_ptracer.waits_in_proot && pid_matches(ptracer.as_ptracer.wait_pid, ptracee) {
        let zombie_pid = ptracee.pid;
        ptracer
            .as_ptracer
            .zombies
            .retain(|candidate| *candidate != zombie_pid);
        ptracee.as_ptracee.event_proot = None;
        detach_from_ptracer(ptracee, &mut ptracer);
        proot.mark_tracee_for_removal(zombie_pid);
        deliver_event_to_waiting_ptracer(&mut ptracer, ptracee, wait_status);
    } else {
        let _ = kill(ptracer_pid, Signal::SIGCHLD);
    }
}
