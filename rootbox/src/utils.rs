#[cfg(test)]
pub mod tests {
    use std::cell::RefCell;
    use std::fs;
    use std::path::PathBuf;
    use std::rc::Rc;

    use nix::sys::ptrace;
    use nix::sys::signal::{kill, Signal};
    use nix::sys::wait::WaitStatus::*;
    use nix::sys::wait::{waitpid, WaitPidFlag};
    use nix::unistd::{fork, getpid, ForkResult, Pid};

    use crate::filesystem::{temp, FileSystem, Initialiser};
    use crate::kernel::heap::Heap;
    use crate::process::proot::{InfoBag, PRoot};
    use crate::process::tracee::Tracee;

    /// Directory used as a guest rootfs by the tests. It can be overridden
    /// with `PROOT_TEST_ROOTFS`; by default a small fixture (bin/, etc/,
    /// home/) is created under the temp root.
    pub fn get_test_rootfs_path() -> PathBuf {
        if let Some(rootfs) = std::env::var_os("PROOT_TEST_ROOTFS") {
            return PathBuf::from(rootfs);
        }

        let rootfs = temp::temp_root().join("rootbox-test-rootfs");
        let _ = fs::create_dir_all(rootfs.join("bin"));
        let _ = fs::create_dir_all(rootfs.join("etc"));
        let _ = fs::create_dir_all(rootfs.join("home"));
        let _ = fs::File::create(rootfs.join("bin/sleep"));
        let _ = fs::File::create(rootfs.join("etc/passwd"));
        rootfs
    }

    /// Allow tests to fork and deal with child processes without mixing
    /// them.
    pub fn test_in_subprocess<F: FnMut()>(mut func: F) {
        match unsafe { fork() }.expect("fork in test") {
            ForkResult::Child => {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(&mut func));
                std::process::exit(if result.is_ok() { 0 } else { 101 });
            }
            ForkResult::Parent { child } => {
                assert_eq!(waitpid(child, None), Ok(Exited(child, 0)))
            }
        }
    }

    /// Simulates the tracer by forking a parent and a child process. The
    /// child is traced and executes its function; the parent loops on the
    /// child's syscall stops, handing each one to `func_parent`, and only
    /// stops driving once that closure returns true.
    pub fn fork_test<
        FuncParent: FnMut(&mut Tracee, &mut InfoBag) -> bool,
        FuncChild: FnMut(),
    >(
        fs_root: PathBuf,
        expected_exit_status: i32,
        mut func_parent: FuncParent,
        mut func_child: FuncChild,
    ) {
        test_in_subprocess(|| {
            match unsafe { fork() }.expect("fork in test") {
                ForkResult::Parent { child } => {
                    let mut info_bag = InfoBag::new();
                    let fs = FileSystem::with_root(&fs_root).expect("create test filesystem");
                    let mut tracee = Tracee::new(
                        child,
                        Rc::new(RefCell::new(fs)),
                        Rc::new(RefCell::new(Heap::new())),
                    );

                    // the parent waits for the child's signal before
                    // setting the options
                    assert_eq!(
                        waitpid(child, Some(WaitPidFlag::__WALL)).expect("waitpid"),
                        Stopped(child, Signal::SIGSTOP)
                    );
                    ptrace::setoptions(child, ptrace::Options::PTRACE_O_TRACESYSGOOD)
                        .expect("set ptrace options");

                    restart(child);

                    // we loop until the parent function decides to stop
                    loop {
                        match waitpid(child, Some(WaitPidFlag::__WALL)).expect("waitpid") {
                            PtraceSyscall(pid) => {
                                assert_eq!(pid, child);
                                tracee.regs.fetch_regs().expect("fetch regs");

                                if func_parent(&mut tracee, &mut info_bag) {
                                    break;
                                }
                            }
                            Exited(_, _) => panic!("the tracee exited too early"),
                            Signaled(_, _, _) => panic!("the tracee was killed unexpectedly"),
                            _ => {}
                        }
                        restart(child);
                    }

                    restart(child);
                    end(child, expected_exit_status);
                }
                ForkResult::Child => {
                    ptrace::traceme().expect("test ptrace traceme");
                    // we use a SIGSTOP to synchronise both processes
                    kill(getpid(), Signal::SIGSTOP).expect("test child sigstop");

                    func_child();
                    std::process::exit(0);
                }
            }
        });
    }

    /// Runs `func_child` under a complete tracer whose rootfs is the host
    /// one, so every translation is exercised while the observable
    /// behavior stays that of the host. `func_checker` is called on each
    /// syscall stop (currently a hook point, unused by most tests).
    pub fn test_with_proot<FuncChecker, FuncChild>(_func_checker: FuncChecker, mut func_child: FuncChild)
    where
        FuncChecker: FnMut(&Tracee, bool, bool),
        FuncChild: FnMut(),
    {
        test_in_subprocess(|| {
            match unsafe { fork() }.expect("fork in test") {
                ForkResult::Parent { child } => {
                    let proot = PRoot::new();

                    let mut fs = FileSystem::with_root("/").expect("create test filesystem");
                    fs.initialize().expect("initialize test filesystem");

                    proot.create_tracee(
                        child,
                        Rc::new(RefCell::new(fs)),
                        Rc::new(RefCell::new(Heap::new())),
                    );

                    proot.event_loop();

                    assert_eq!(proot.get_exit_status(), 0);
                }
                ForkResult::Child => {
                    ptrace::traceme().expect("test ptrace traceme");
                    kill(getpid(), Signal::SIGSTOP).expect("test child sigstop");

                    let result =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(&mut func_child));
                    std::process::exit(if result.is_ok() { 0 } else { 102 });
                }
            }
        });
    }

    /// Restarts a child process just once.
    fn restart(child: Pid) {
        ptrace::syscall(child, None).expect("restart the tracee");
    }

    /// Waits/restarts a child process until it exits.
    fn end(child: Pid, expected_status: i32) {
        loop {
            match waitpid(child, Some(WaitPidFlag::__WALL)).expect("waitpid") {
                Exited(pid, exit_status) => {
                    assert_eq!(pid, child);

                    // the tracee should have exited with the expected
                    // status
                    assert_eq!(exit_status, expected_status);
                    break;
                }
                _ => {
                    // restarting the tracee
                    restart(child);
                }
            }
        }
    }
}
