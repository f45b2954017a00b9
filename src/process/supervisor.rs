/*!
 * Worker Supervisor
 * Runs a body behind a thread or process boundary and reports how it ended
 *
 * Restart policy is "never": a dead worker is reported to its owner and
 * left dead. An experiment restarted behind the owner's back would lose
 * its state without anyone noticing.
 */

use super::types::{ExitReason, Isolation, ProcessError, ProcessResult, WorkerExit};
use crate::core::types::WorkerId;
use crate::ipc::rpc::dispatch::panic_message;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[cfg(unix)]
use crate::core::limits::PANIC_EXIT_CODE;
#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
#[cfg(unix)]
use nix::unistd::{close, fork, ForkResult, Pid};
#[cfg(unix)]
use std::os::fd::RawFd;

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

/// Builder for a supervised worker
#[derive(Debug, Clone)]
pub struct WorkerBuilder {
    name: String,
    isolation: Isolation,
    #[cfg(unix)]
    close_in_child: Vec<RawFd>,
}

impl WorkerBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            isolation: Isolation::default(),
            #[cfg(unix)]
            close_in_child: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Descriptor the forked child closes before running the body
    ///
    /// Used for the parent's ends of socket pairs, so the parent sees EOF
    /// once the child exits. Ignored under thread isolation.
    #[cfg(unix)]
    #[inline]
    #[must_use]
    pub fn close_in_child(mut self, fd: RawFd) -> Self {
        self.close_in_child.push(fd);
        self
    }

    /// Start the worker; the body's return value is its exit code
    pub fn spawn<F>(self, body: F) -> ProcessResult<WorkerHandle>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        match self.isolation {
            Isolation::Thread => self.spawn_thread(body),
            #[cfg(unix)]
            Isolation::Process => self.spawn_process(body),
        }
    }

    fn spawn_thread<F>(self, body: F) -> ProcessResult<WorkerHandle>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("worker-{}", self.name))
            .spawn(body)
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {}", self.name, e)))?;
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        info!(worker = %self.name, id, isolation = "thread", "Worker spawned");
        Ok(WorkerHandle {
            id,
            name: self.name,
            inner: Inner::Thread(Some(handle)),
        })
    }

    #[cfg(unix)]
    fn spawn_process<F>(self, body: F) -> ProcessResult<WorkerHandle>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        // SAFETY: the child only closes descriptors, runs the body and exits;
        // it never returns into the caller's stack
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                info!(worker = %self.name, pid = child.as_raw(), isolation = "process", "Worker spawned");
                Ok(WorkerHandle {
                    id: child.as_raw() as WorkerId,
                    name: self.name,
                    inner: Inner::Process { pid: child, exit: None },
                })
            }
            Ok(ForkResult::Child) => {
                for fd in &self.close_in_child {
                    let _ = close(*fd);
                }
                let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body))
                    .unwrap_or(PANIC_EXIT_CODE);
                // No atexit handlers or stdio flushing: locks held by other
                // parent threads at fork time are never released here
                unsafe { nix::libc::_exit(code) }
            }
            Err(e) => Err(ProcessError::SpawnFailed(format!("{}: fork: {}", self.name, e))),
        }
    }
}

/// Start a worker named `name` under `isolation`
pub fn spawn_worker<F>(name: impl Into<String>, isolation: Isolation, body: F) -> ProcessResult<WorkerHandle>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    WorkerBuilder::new(name).isolation(isolation).spawn(body)
}

enum Inner {
    Thread(Option<JoinHandle<i32>>),
    #[cfg(unix)]
    Process { pid: Pid, exit: Option<ExitReason> },
}

/// Owner's handle on a running worker
pub struct WorkerHandle {
    id: WorkerId,
    name: String,
    inner: Inner,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("isolation", &self.isolation())
            .finish()
    }
}

impl WorkerHandle {
    /// OS pid for process workers, sequence number for thread workers
    #[inline]
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn isolation(&self) -> Isolation {
        match self.inner {
            Inner::Thread(_) => Isolation::Thread,
            #[cfg(unix)]
            Inner::Process { .. } => Isolation::Process,
        }
    }

    /// Whether the worker has ended, without blocking
    pub fn is_finished(&mut self) -> bool {
        match &mut self.inner {
            Inner::Thread(handle) => handle.as_ref().map_or(true, JoinHandle::is_finished),
            #[cfg(unix)]
            Inner::Process { pid, exit } => {
                if exit.is_some() {
                    return true;
                }
                match waitpid(*pid, Some(WaitPidFlag::WNOHANG)) {
                    Ok(status) => {
                        *exit = exit_reason(status);
                        exit.is_some()
                    }
                    // Already reaped elsewhere
                    Err(_) => true,
                }
            }
        }
    }

    /// Wait for the worker to end
    pub fn join(mut self) -> ProcessResult<WorkerExit> {
        let reason = match &mut self.inner {
            Inner::Thread(handle) => {
                let handle = handle
                    .take()
                    .ok_or_else(|| ProcessError::JoinFailed(format!("{}: already joined", self.name)))?;
                match handle.join() {
                    Ok(code) => ExitReason::Exited(code),
                    Err(payload) => ExitReason::Panicked(panic_message(payload.as_ref())),
                }
            }
            #[cfg(unix)]
            Inner::Process { pid, exit } => {
                let reason = match exit.take() {
                    Some(reason) => reason,
                    None => wait_blocking(*pid)
                        .map_err(|e| ProcessError::JoinFailed(format!("{}: {}", self.name, e)))?,
                };
                *exit = Some(reason.clone());
                reason
            }
        };

        let exit = WorkerExit {
            name: self.name.clone(),
            reason,
        };
        if exit.success() {
            info!(worker = %exit.name, "Worker exited");
        } else {
            warn!(worker = %exit.name, reason = ?exit.reason, "Worker ended abnormally");
        }
        Ok(exit)
    }

    /// Kill a process worker
    ///
    /// Threads cannot be killed; they end when their body returns.
    pub fn kill(&mut self) -> ProcessResult<()> {
        match &self.inner {
            Inner::Thread(_) => Err(ProcessError::KillFailed(format!(
                "{}: thread workers cannot be killed",
                self.name
            ))),
            #[cfg(unix)]
            Inner::Process { pid, exit } => {
                if exit.is_some() {
                    return Ok(());
                }
                kill(*pid, Signal::SIGKILL)
                    .map_err(|e| ProcessError::KillFailed(format!("{}: {}", self.name, e)))?;
                debug!(worker = %self.name, pid = pid.as_raw(), "Sent SIGKILL");
                Ok(())
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let unjoined = match &self.inner {
            Inner::Thread(handle) => handle.is_some(),
            #[cfg(unix)]
            Inner::Process { exit, .. } => exit.is_none(),
        };
        if unjoined && !self.is_finished() {
            warn!(worker = %self.name, "Worker handle dropped while the worker is still running");
        }
    }
}

#[cfg(unix)]
fn exit_reason(status: WaitStatus) -> Option<ExitReason> {
    match status {
        WaitStatus::Exited(_, code) => Some(ExitReason::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Some(ExitReason::Signaled(signal as i32)),
        _ => None,
    }
}

#[cfg(unix)]
fn wait_blocking(pid: Pid) -> Result<ExitReason, Errno> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(reason) = exit_reason(status) {
                    return Ok(reason);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}
