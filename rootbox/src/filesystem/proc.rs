//! Emulation of the symlinks the kernel generates under "/proc".
//!
//! A few entries there ("/proc/self", "/proc/<pid>/exe", ...) must reflect
//! the guest view of a traced process, not what the host kernel would
//! answer. The tracer is single threaded, so a process-wide registry of the
//! per-tracee values is enough; it is refreshed by the tracee lifecycle
//! (creation, execve, chdir) and consulted during canonicalization.

use libc::pid_t;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::*;
use crate::filesystem::binding::{compare_paths, PathComparison};

/// Guest-side view of one tracee, as exposed through "/proc/<pid>".
#[derive(Debug, Clone)]
pub struct ProcEntry {
    pub exe: PathBuf,
    pub cwd: PathBuf,
    pub root: PathBuf,
}

lazy_static! {
    static ref TRACEES: Mutex<HashMap<pid_t, ProcEntry>> = Mutex::new(HashMap::new());
}

/// Publishes (or refreshes) the "/proc/<pid>" view of a tracee.
pub fn register_tracee(pid: pid_t, entry: ProcEntry) {
    TRACEES.lock().unwrap().insert(pid, entry);
}

/// Forgets a terminated tracee.
pub fn forget_tracee(pid: pid_t) {
    TRACEES.lock().unwrap().remove(&pid);
}

fn get_tracee(pid: pid_t) -> Option<ProcEntry> {
    TRACEES.lock().unwrap().get(&pid).cloned()
}

/// What the canonicalizer should do with a "/proc" component.
#[derive(Debug, PartialEq)]
pub enum ProcAction {
    /// Not an emulated entry, process it the usual way.
    Default,
    /// The component is an emulated symlink, restart from its target.
    Canonicalize(PathBuf),
    /// Keep the component syntactic, without dereferencing it.
    DontCanonicalize,
}

/// Emulates the result of readlink("`base`/`component`") for the tracee
/// `pid`, where `base` is the canonical guest path walked so far.
pub fn readlink_proc(pid: pid_t, base: &Path, component: &OsStr) -> Result<ProcAction> {
    // Substitute "/proc/self" with "/proc/<pid>".
    match compare_paths("/proc", base) {
        PathComparison::Equal => {
            if component == "self" {
                return Ok(ProcAction::Canonicalize(PathBuf::from(format!(
                    "/proc/{}",
                    pid
                ))));
            }
            return Ok(ProcAction::Default);
        }
        PathComparison::FirstIsPrefix => {} // handled below
        _ => return Ok(ProcAction::Default),
    }

    // Handle links in "/proc/<pid>/".
    let mut components = base.components();
    components.next(); // RootDir
    components.next(); // "proc"
    let target_pid: pid_t = match components
        .next()
        .and_then(|comp| comp.as_os_str().to_str())
        .and_then(|string| string.parse().ok())
    {
        Some(target_pid) => target_pid,
        None => return Ok(ProcAction::Default),
    };

    let proc_pid = PathBuf::from(format!("/proc/{}", target_pid));
    match compare_paths(&proc_pid, base) {
        PathComparison::Equal => {
            let known_tracee = match get_tracee(target_pid) {
                Some(entry) => entry,
                None => return Ok(ProcAction::Default),
            };

            // Substitute the link "/proc/<pid>/???" with the registered
            // tracee state.
            if component == "exe" {
                return Ok(ProcAction::Canonicalize(known_tracee.exe));
            }
            if component == "cwd" {
                return Ok(ProcAction::Canonicalize(known_tracee.cwd));
            }
            if component == "root" {
                return Ok(ProcAction::Canonicalize(known_tracee.root));
            }
            Ok(ProcAction::Default)
        }
        PathComparison::FirstIsPrefix => {
            // Handle links in "/proc/<pid>/fd/".
            if base == proc_pid.join("fd") {
                // Sanity check: a number is expected.
                if component
                    .to_str()
                    .map(|string| string.parse::<u32>().is_ok())
                    != Some(true)
                {
                    return Err(Error::errno(EPERM));
                }

                /* Don't dereference "/proc/<pid>/fd/???" now: they can
                 * point to anonymous pipes or sockets, otherwise they point
                 * to a path already canonicalized by the kernel. */
                return Ok(ProcAction::DontCanonicalize);
            }
            Ok(ProcAction::Default)
        }
        _ => Ok(ProcAction::Default),
    }
}

/// Emulates the result of readlink("`referrer`") where `referrer` is a
/// strict subpath of "/proc": the case of *reading* one of the emulated
/// links. Returns `None` when the link is not emulated.
pub fn readlink_proc2(pid: pid_t, referrer: &Path) -> Result<Option<PathBuf>> {
    debug_assert_eq!(
        compare_paths("/proc", referrer),
        PathComparison::FirstIsPrefix
    );

    let base = match referrer.parent() {
        Some(base) => base,
        None => return Ok(None),
    };
    let component = match referrer.file_name() {
        Some(component) => component,
        None => return Ok(None),
    };

    let comparison = compare_paths("/proc", base);
    if comparison != PathComparison::Equal && comparison != PathComparison::FirstIsPrefix {
        return Ok(None);
    }

    match readlink_proc(pid, base, component)? {
        ProcAction::Canonicalize(target) => Ok(Some(target)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readlink_proc_self() {
        let action = readlink_proc(42, Path::new("/proc"), OsStr::new("self")).unwrap();
        assert_eq!(action, ProcAction::Canonicalize(PathBuf::from("/proc/42")));
    }

    #[test]
    fn test_readlink_proc_registered_tracee() {
        register_tracee(
            4242,
            ProcEntry {
                exe: PathBuf::from("/bin/sleep"),
                cwd: PathBuf::from("/tmp"),
                root: PathBuf::from("/home/rootfs"),
            },
        );

        let action = readlink_proc(1, Path::new("/proc/4242"), OsStr::new("exe")).unwrap();
        assert_eq!(
            action,
            ProcAction::Canonicalize(PathBuf::from("/bin/sleep"))
        );

        let action = readlink_proc(1, Path::new("/proc/4242"), OsStr::new("cwd")).unwrap();
        assert_eq!(action, ProcAction::Canonicalize(PathBuf::from("/tmp")));

        let action = readlink_proc(1, Path::new("/proc/4242"), OsStr::new("root")).unwrap();
        assert_eq!(
            action,
            ProcAction::Canonicalize(PathBuf::from("/home/rootfs"))
        );

        forget_tracee(4242);

        let action = readlink_proc(1, Path::new("/proc/4242"), OsStr::new("exe")).unwrap();
        assert_eq!(action, ProcAction::Default);
    }

    #[test]
    fn test_readlink_proc_fd_entries_stay_syntactic() {
        let action = readlink_proc(1, Path::new("/proc/1000/fd"), OsStr::new("3")).unwrap();
        assert_eq!(action, ProcAction::DontCanonicalize);

        let result = readlink_proc(1, Path::new("/proc/1000/fd"), OsStr::new("not_a_number"));
        assert_eq!(result, Err(Error::errno(EPERM)));
    }

    #[test]
    fn test_readlink_proc2() {
        register_tracee(
            4243,
            ProcEntry {
                exe: PathBuf::from("/bin/true"),
                cwd: PathBuf::from("/"),
                root: PathBuf::from("/home/rootfs"),
            },
        );

        let target = readlink_proc2(1, Path::new("/proc/4243/exe")).unwrap();
        assert_eq!(target, Some(PathBuf::from("/bin/true")));

        let target = readlink_proc2(1, Path::new("/proc/4243/status")).unwrap();
        assert_eq!(target, None);

        forget_tracee(4243);
    }
}
