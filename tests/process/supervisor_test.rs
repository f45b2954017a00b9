/*!
 * Supervisor Tests
 * Thread and forked workers: exit codes, panics, kills and descriptor hygiene
 */

use pretty_assertions::assert_eq;
use rig_kernel::process::{spawn_worker, ExitReason, Isolation, WorkerBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_thread_worker_reports_code() {
    let worker = spawn_worker("answer", Isolation::Thread, || 42).unwrap();
    assert_eq!(worker.isolation(), Isolation::Thread);
    let exit = worker.join().unwrap();
    assert_eq!(exit.name, "answer");
    assert_eq!(exit.reason, ExitReason::Exited(42));
    assert_eq!(exit.code(), 42);
}

#[test]
fn test_thread_worker_shares_memory() {
    let flag = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&flag);
    let worker = spawn_worker("flagger", Isolation::Thread, move || {
        seen.store(true, Ordering::SeqCst);
        0
    })
    .unwrap();
    assert!(worker.join().unwrap().success());
    assert!(flag.load(Ordering::SeqCst));
}

#[test]
fn test_thread_workers_get_distinct_ids() {
    let a = spawn_worker("a", Isolation::Thread, || 0).unwrap();
    let b = spawn_worker("b", Isolation::Thread, || 0).unwrap();
    assert_ne!(a.id(), b.id());
    a.join().unwrap();
    b.join().unwrap();
}

#[test]
fn test_is_finished_polls_without_blocking() {
    let (tx, rx) = flume::bounded::<()>(0);
    let mut worker = spawn_worker("gate", Isolation::Thread, move || {
        let _ = rx.recv();
        0
    })
    .unwrap();
    assert!(!worker.is_finished());
    drop(tx);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !worker.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(worker.is_finished());
    assert!(worker.join().unwrap().success());
}

#[cfg(unix)]
mod forked {
    use super::*;
    use pretty_assertions::assert_eq;
    use rig_kernel::ipc::socket_pair;
    use serial_test::serial;
    use std::sync::atomic::AtomicU32;
    use std::sync::Once;

    static TEST_PID: AtomicU32 = AtomicU32::new(0);
    static EXIT_HOOK: Once = Once::new();

    extern "C" fn abort_outside_test_process() {
        if std::process::id() != TEST_PID.load(Ordering::SeqCst) {
            std::process::abort();
        }
    }

    /// Make any forked child that runs exit handlers die by SIGABRT
    fn arm_exit_hook() {
        EXIT_HOOK.call_once(|| {
            TEST_PID.store(std::process::id(), Ordering::SeqCst);
            // SAFETY: the handler only compares pids and may abort
            let rc = unsafe { nix::libc::atexit(abort_outside_test_process) };
            assert_eq!(rc, 0);
        });
    }

    #[test]
    #[serial]
    fn test_process_worker_reports_code() {
        let worker = spawn_worker("child", Isolation::Process, || 3).unwrap();
        assert_eq!(worker.isolation(), Isolation::Process);
        assert_ne!(worker.id(), std::process::id());
        assert_eq!(worker.join().unwrap().reason, ExitReason::Exited(3));
    }

    #[test]
    #[serial]
    fn test_process_worker_memory_is_isolated() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&flag);
        let worker = spawn_worker("isolated", Isolation::Process, move || {
            seen.store(true, Ordering::SeqCst);
            0
        })
        .unwrap();
        assert!(worker.join().unwrap().success());
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    #[serial]
    fn test_process_worker_panic_exits_nonzero() {
        let worker = spawn_worker("panics", Isolation::Process, || panic!("child blew up")).unwrap();
        let exit = worker.join().unwrap();
        assert_eq!(exit.reason, ExitReason::Exited(101));
        assert!(!exit.success());
    }

    #[test]
    #[serial]
    fn test_process_worker_can_be_killed() {
        let mut worker = spawn_worker("sleeper", Isolation::Process, || loop {
            thread::sleep(Duration::from_secs(1));
        })
        .unwrap();
        assert!(!worker.is_finished());

        worker.kill().unwrap();
        let exit = worker.join().unwrap();
        assert_eq!(exit.reason, ExitReason::Signaled(9));
        assert_eq!(exit.code(), 137);
    }

    #[test]
    #[serial]
    fn test_parent_sees_eof_when_child_exits() {
        let (parent_end, child_end) = socket_pair::<(), u32>().unwrap();
        let builder = WorkerBuilder::new("talker")
            .isolation(Isolation::Process)
            .close_in_child(parent_end.raw_fd().unwrap());

        let worker = builder
            .spawn(move || match child_end.open() {
                Ok(endpoint) => match endpoint.send(7) {
                    Ok(()) => 0,
                    Err(_) => 2,
                },
                Err(_) => 1,
            })
            .unwrap();

        // Opened only after the fork, so its reader never reaches the child
        let endpoint = parent_end.open().unwrap();
        assert_eq!(endpoint.recv().unwrap(), 7);
        assert!(worker.join().unwrap().success());
        assert!(endpoint.recv().unwrap_err().is_closed());
    }

    #[test]
    #[serial]
    fn test_child_skips_exit_handlers() {
        arm_exit_hook();
        let worker = spawn_worker("quiet-exit", Isolation::Process, || 5).unwrap();
        assert_eq!(worker.join().unwrap().reason, ExitReason::Exited(5));

        let worker = spawn_worker("quiet-panic", Isolation::Process, || panic!("no handlers either")).unwrap();
        assert_eq!(worker.join().unwrap().reason, ExitReason::Exited(101));
    }
}
