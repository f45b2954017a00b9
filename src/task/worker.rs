/*!
 * Task Worker
 * Worker-side loop: build the task, serve commands, clean up
 */

use super::experiment::TaskAdapter;
use super::host::TaskFactory;
use super::notify::Notifier;
use super::types::TaskConfig;
use crate::ipc::rpc::dispatch::panic_message;
use crate::ipc::rpc::{serve_request, ServerEndpoint};
use crate::ipc::Request;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

/// Everything a worker needs besides the factory
#[derive(Debug)]
pub struct WorkerContext {
    pub config: TaskConfig,
    pub commands: ServerEndpoint,
    pub notifier: Notifier,
    pub recovery_window: Duration,
    pub poll_interval: Duration,
    pub run_id: Uuid,
}

/// How a worker loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The task reached its terminal state
    Finished,
    /// The host sent the shutdown sentinel
    Shutdown,
    /// Construction or start failed
    StartupFailed,
    /// No follow-up arrived within the recovery window
    Abandoned,
    /// The command channel broke
    TransportLost,
}

impl WorkerOutcome {
    /// Exit code of the worker
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            WorkerOutcome::Finished | WorkerOutcome::Shutdown => 0,
            WorkerOutcome::StartupFailed => 1,
            WorkerOutcome::Abandoned => 2,
            WorkerOutcome::TransportLost => 3,
        }
    }
}

/// Run one task to completion
///
/// Cleanup runs exactly once for a constructed task, however the loop
/// ended. `Exited` is always the last notification sent.
pub fn run_worker(factory: &TaskFactory, ctx: WorkerContext) -> WorkerOutcome {
    let span = info_span!("task_worker", run_id = %ctx.run_id, task = %ctx.config.name);
    let _entered = span.enter();

    let outcome = match build(factory, &ctx) {
        Err(diagnostic) => {
            error!(%diagnostic, "Task failed to start");
            ctx.notifier.error(diagnostic);
            WorkerOutcome::StartupFailed
        }
        Ok(mut task) => {
            let outcome = match catch_unwind(AssertUnwindSafe(|| task.start())) {
                Ok(Ok(())) => {
                    info!("Task started");
                    ctx.notifier.set_state(task.state().as_deref());
                    serve(&mut task, &ctx)
                }
                Ok(Err(e)) => {
                    let diagnostic = format!("{:?}", e);
                    error!(%diagnostic, "Task failed to start");
                    ctx.notifier.error(diagnostic);
                    WorkerOutcome::StartupFailed
                }
                Err(payload) => {
                    let diagnostic = format!("task start panicked: {}", panic_message(payload.as_ref()));
                    error!(%diagnostic, "Task failed to start");
                    ctx.notifier.error(diagnostic);
                    WorkerOutcome::StartupFailed
                }
            };
            task.cleanup();
            outcome
        }
    };

    info!(?outcome, "Task worker finished");
    ctx.notifier.exited(outcome.code());
    outcome
}

fn build(factory: &TaskFactory, ctx: &WorkerContext) -> Result<TaskAdapter, String> {
    let notifier = ctx.notifier.clone();
    match catch_unwind(AssertUnwindSafe(|| factory(&ctx.config, notifier))) {
        Ok(Ok(task)) => Ok(TaskAdapter::new(task)),
        Ok(Err(e)) => Err(format!("{:?}", e)),
        Err(payload) => Err(format!(
            "task construction panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn serve(task: &mut TaskAdapter, ctx: &WorkerContext) -> WorkerOutcome {
    // Set while the host owes a follow-up to a failed call
    let mut recovery_deadline: Option<Instant> = None;

    loop {
        if task.is_terminal() {
            ctx.notifier.set_state(None);
            return WorkerOutcome::Finished;
        }

        let wait = match recovery_deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    let msg = format!(
                        "no command within {:?} after a failed call, task abandoned",
                        ctx.recovery_window
                    );
                    error!("{}", msg);
                    ctx.notifier.error(msg);
                    return WorkerOutcome::Abandoned;
                }
                (deadline - now).min(ctx.poll_interval)
            }
            None => ctx.poll_interval,
        };

        let request = match ctx.commands.recv_timeout(wait) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Command channel lost");
                ctx.notifier.error(format!("command channel lost: {}", e));
                return WorkerOutcome::TransportLost;
            }
        };
        recovery_deadline = None;

        if request == Request::Shutdown {
            info!("Shutdown requested");
            return WorkerOutcome::Shutdown;
        }

        let reply = serve_request(task, &request);
        let failed = reply.as_ref().err().cloned();
        if let Err(e) = ctx.commands.send(reply) {
            error!(error = %e, "Failed to send reply");
            ctx.notifier.error(format!("command channel lost: {}", e));
            return WorkerOutcome::TransportLost;
        }
        if let Some(e) = failed {
            warn!(
                request = ?request.name(),
                error = %e,
                window = ?ctx.recovery_window,
                "Call failed, waiting for a follow-up"
            );
            recovery_deadline = Some(Instant::now() + ctx.recovery_window);
        }
    }
}
