/*!
 * Task Host
 * Supervisor-side owner of the worker running one experiment task
 *
 * At most one task is active per host. Status lives on a `StatusBoard`
 * fed by a listener thread that consumes the worker's notifications. A
 * task that ends on its own is released by that listener, so the host
 * returns to `Idle` without being asked.
 *
 * Lock order: `control` serializes host operations and may be held while
 * joining workers; `active` is only held briefly and never across a join.
 */

use super::config::HostConfig;
use super::experiment::ExperimentTask;
use super::notify::{Notification, NotificationSink, Notifier, StatusBoard};
use super::types::{
    HostError, HostResult, PauseLabel, StateError, StatusRecord, StopOutcome, TaskConfig, TaskStatus,
};
use super::worker::{run_worker, WorkerContext, WorkerOutcome};
use crate::core::types::{Kwargs, Value};
use crate::ipc::rpc::RemoteProxy;
use crate::monitoring::span_control;
use crate::ipc::{link_pair, Endpoint, Link, Reply, Request};
use crate::process::{ProcessError, WorkerBuilder, WorkerHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builds the task inside the worker
pub type TaskFactory =
    Arc<dyn Fn(&TaskConfig, Notifier) -> anyhow::Result<Box<dyn ExperimentTask>> + Send + Sync>;

struct TaskHandle {
    run_id: Uuid,
    proxy: RemoteProxy,
    worker: WorkerHandle,
    listener: Option<JoinHandle<()>>,
}

/// Runs experiment tasks in supervised workers
pub struct TaskHost {
    factory: TaskFactory,
    config: HostConfig,
    sink: Arc<dyn NotificationSink>,
    board: Arc<StatusBoard>,
    active: Arc<Mutex<Option<TaskHandle>>>,
    control: Mutex<()>,
}

impl std::fmt::Debug for TaskHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHost")
            .field("config", &self.config)
            .field("status", &self.board.current())
            .finish()
    }
}

impl TaskHost {
    pub fn new<F>(factory: F, sink: Arc<dyn NotificationSink>) -> Self
    where
        F: Fn(&TaskConfig, Notifier) -> anyhow::Result<Box<dyn ExperimentTask>> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            config: HostConfig::default(),
            sink,
            board: Arc::new(StatusBoard::new()),
            active: Arc::new(Mutex::new(None)),
            control: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Current status record
    #[must_use]
    pub fn status(&self) -> StatusRecord {
        self.board.current()
    }

    /// Receive every future status record
    #[must_use]
    pub fn subscribe(&self) -> flume::Receiver<StatusRecord> {
        self.board.subscribe()
    }

    /// Start a task
    ///
    /// Rejected without spawning anything while another task is active. A
    /// task that ended but has not been released yet is released first.
    pub fn runtask(&self, config: TaskConfig) -> HostResult<Uuid> {
        let span = span_control("runtask");
        let _entered = span.enter();
        let result = self.start_run(config);
        if let Ok(run_id) = &result {
            span.record_run(run_id);
        }
        span.record_result(&result);
        result
    }

    fn start_run(&self, config: TaskConfig) -> HostResult<Uuid> {
        let _control = self.control.lock();
        let current = self.board.current();
        if current.status.is_active() {
            return Err(StateError::AlreadyActive {
                status: current.status,
            }
            .into());
        }
        let stale = self.active.lock().take();
        if let Some(stale) = stale {
            info!(run_id = %stale.run_id, status = %current.status, "Releasing ended task");
            release(stale);
        }

        let run_id = Uuid::new_v4();
        let status = config.initial_status();
        self.board.publish(StatusRecord::started(status, run_id));

        // Held until the handle is installed, so the listener of a task that
        // dies at once still finds it
        let mut active = self.active.lock();
        match self.launch(config, status, run_id) {
            Ok(handle) => {
                *active = Some(handle);
                Ok(run_id)
            }
            Err(e) => {
                warn!(%run_id, error = %e, "Task failed to launch");
                self.board.publish(StatusRecord::idle());
                Err(e)
            }
        }
    }

    fn launch(&self, config: TaskConfig, status: TaskStatus, run_id: Uuid) -> HostResult<TaskHandle> {
        let transport = self.config.isolation.transport();
        let (client_link, server_link) = link_pair::<Request, Reply>(transport)?;
        let (events_link, notify_link) = link_pair::<(), Notification>(transport)?;

        let builder = WorkerBuilder::new(format!("task-{}", config.name)).isolation(self.config.isolation);
        let builder = close_host_ends(builder, &client_link, &events_link);

        let factory = Arc::clone(&self.factory);
        let recovery_window = self.config.recovery_window;
        let poll_interval = self.config.poll_interval;
        let task_name = config.name.clone();
        let worker = builder.spawn(move || {
            let (commands, events) = match (server_link.open(), notify_link.open()) {
                (Ok(commands), Ok(events)) => (commands, events),
                _ => return WorkerOutcome::TransportLost.code(),
            };
            let ctx = WorkerContext {
                config,
                commands,
                notifier: Notifier::new(status, events),
                recovery_window,
                poll_interval,
                run_id,
            };
            run_worker(&factory, ctx).code()
        })?;

        let opened = client_link
            .open()
            .and_then(|client| events_link.open().map(|events| (client, events)));
        let (client, events) = match opened {
            Ok(ends) => ends,
            Err(e) => {
                // Our ends are gone, so the worker sees a closed channel and exits
                let _ = worker.join();
                return Err(e.into());
            }
        };

        let board = Arc::clone(&self.board);
        let sink = Arc::clone(&self.sink);
        let active = Arc::clone(&self.active);
        let listener = thread::Builder::new()
            .name(format!("task-events-{}", task_name))
            .spawn(move || {
                listen(events, &board, sink.as_ref(), run_id);
                reclaim_ended(&active, &board, run_id);
            })
            .map_err(|e| ProcessError::SpawnFailed(format!("event listener: {}", e)))?;

        info!(%run_id, task = %task_name, %status, isolation = %self.config.isolation, "Task launched");
        Ok(TaskHandle {
            run_id,
            proxy: RemoteProxy::new(client),
            worker,
            listener: Some(listener),
        })
    }

    /// Toggle the task's pause flag, returning the label it reports
    pub fn pausetask(&self) -> HostResult<PauseLabel> {
        let span = span_control("pausetask");
        let _entered = span.enter();
        let result = self.toggle_pause();
        span.record_result(&result);
        result
    }

    fn toggle_pause(&self) -> HostResult<PauseLabel> {
        let proxy = self.active_proxy()?;
        let value = proxy.call_with("pause", Vec::new())?;
        let label = value
            .as_str()
            .and_then(PauseLabel::parse)
            .ok_or_else(|| HostError::UnexpectedReply {
                method: "pause".to_string(),
                value: value.to_string(),
            })?;
        self.board.update(|record| record.label = Some(label));
        info!(label = label.as_str(), "Task pause toggled");
        Ok(label)
    }

    /// End the active task and release it
    ///
    /// Calling this without an active task is a programming error and is
    /// rejected without touching anything. A failing `end_task` comes back
    /// as `StopOutcome::Failed`; the task is released either way.
    pub fn stoptask(&self) -> HostResult<StopOutcome> {
        let span = span_control("stoptask");
        let _entered = span.enter();
        let result = self.end_run();
        span.record_result(&result);
        result
    }

    fn end_run(&self) -> HostResult<StopOutcome> {
        let _control = self.control.lock();
        let record = self.board.current();
        if !record.status.is_active() {
            return Err(StateError::NotActive {
                status: record.status,
            }
            .into());
        }
        let handle = self.active.lock().take().ok_or(StateError::NoTask)?;

        let outcome = match handle.proxy.call_with("end_task", Vec::new()) {
            Ok(_) => StopOutcome::Stopped(record),
            Err(e) => {
                warn!(run_id = %handle.run_id, error = %e, "end_task failed");
                StopOutcome::Failed { msg: e.to_string() }
            }
        };
        release(handle);
        self.board.publish(StatusRecord::idle());
        Ok(outcome)
    }

    /// Release an ended task now and return to `Idle`
    ///
    /// Ended tasks are released automatically; this only saves waiting for
    /// that and does nothing when the host is already idle.
    pub fn reap(&self) -> HostResult<()> {
        let _control = self.control.lock();
        let status = self.board.current().status;
        if status.is_active() {
            return Err(StateError::AlreadyActive { status }.into());
        }
        let handle = self.active.lock().take();
        if let Some(handle) = handle {
            release(handle);
        }
        self.board.update(|record| *record = StatusRecord::idle());
        Ok(())
    }

    /// Proxy to the current task object
    pub fn task(&self) -> HostResult<RemoteProxy> {
        self.active
            .lock()
            .as_ref()
            .map(|handle| handle.proxy.clone())
            .ok_or_else(|| StateError::NoTask.into())
    }

    /// Call a method of the running task
    pub fn call(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> HostResult<Value> {
        Ok(self.task()?.call(name, args, kwargs)?)
    }

    fn active_proxy(&self) -> HostResult<RemoteProxy> {
        let status = self.board.current().status;
        if !status.is_active() {
            return Err(StateError::NotActive { status }.into());
        }
        self.task()
    }
}

impl Drop for TaskHost {
    fn drop(&mut self) {
        let handle = self.active.lock().take();
        if let Some(handle) = handle {
            release(handle);
            self.board.publish(StatusRecord::idle());
        }
    }
}

/// Have a forked worker close the host's socket ends, so the host sees EOF when it exits
#[cfg(unix)]
fn close_host_ends<A, B, C, D>(builder: WorkerBuilder, client: &Link<A, B>, events: &Link<C, D>) -> WorkerBuilder {
    [client.raw_fd(), events.raw_fd()]
        .into_iter()
        .flatten()
        .fold(builder, WorkerBuilder::close_in_child)
}

#[cfg(not(unix))]
fn close_host_ends<A, B, C, D>(builder: WorkerBuilder, _client: &Link<A, B>, _events: &Link<C, D>) -> WorkerBuilder {
    builder
}

/// Shut the worker down and wait for it and its listener
fn release(mut handle: TaskHandle) {
    if let Err(e) = handle.proxy.shutdown() {
        debug!(run_id = %handle.run_id, error = %e, "Worker already gone");
    }
    match handle.worker.join() {
        Ok(exit) => debug!(run_id = %handle.run_id, code = exit.code(), "Worker joined"),
        Err(e) => warn!(run_id = %handle.run_id, error = %e, "Worker join failed"),
    }
    if let Some(listener) = handle.listener.take() {
        if listener.join().is_err() {
            warn!(run_id = %handle.run_id, "Event listener panicked");
        }
    }
}

/// Release the handle of a run that went terminal without a `stoptask`
///
/// Runs on the run's own listener thread, after the worker exited. A handle
/// already taken by a host operation is left to that operation.
fn reclaim_ended(active: &Mutex<Option<TaskHandle>>, board: &StatusBoard, run_id: Uuid) {
    let ended = board.current();
    if !ended.is_run(run_id) || !ended.status.is_terminal() {
        return;
    }
    let handle = {
        let mut active = active.lock();
        if active.as_ref().is_some_and(|handle| handle.run_id == run_id) {
            active.take()
        } else {
            None
        }
    };
    let Some(mut handle) = handle else {
        return;
    };

    // Dropping our own join handle detaches this thread
    handle.listener = None;
    release(handle);
    board.update(|record| {
        if record.is_run(run_id) {
            *record = StatusRecord::idle();
        }
    });
    info!(%run_id, status = %ended.status, "Ended task released");
}

/// Forward worker events to the sink and the board until the worker exits
fn listen(events: Endpoint<(), Notification>, board: &StatusBoard, sink: &dyn NotificationSink, run_id: Uuid) {
    let exit_code = loop {
        let event = match events.recv() {
            Ok(event) => event,
            Err(_) => break None,
        };
        match &event {
            Notification::Transition { state, .. } => {
                sink.notify(&event.payload());
                board.update(|record| {
                    if record.is_run(run_id) {
                        record.state = Some(state.clone());
                        if state == "stopped" && record.status.is_active() {
                            record.status = TaskStatus::Stopped;
                        }
                    }
                });
            }
            Notification::Error { .. } => {
                sink.notify(&event.payload());
                board.update(|record| {
                    if record.is_run(run_id) && record.status.is_active() {
                        record.status = TaskStatus::Error;
                    }
                });
            }
            Notification::Text { text } => sink.write_text(text),
            Notification::Exited { code } => break Some(*code),
        }
    };

    // A worker that vanished while still active never reported why
    let clean = exit_code == Some(0);
    let mut vanished = false;
    board.update(|record| {
        if record.is_run(run_id) && record.status.is_active() {
            if clean {
                record.status = TaskStatus::Stopped;
            } else {
                record.status = TaskStatus::Error;
                vanished = true;
            }
        }
    });
    if vanished {
        let msg = match exit_code {
            Some(code) => format!("task worker exited with code {}", code),
            None => "task worker exited without reporting".to_string(),
        };
        warn!(%run_id, "{}", msg);
        sink.notify(&Notification::Error { msg }.payload());
    }
    debug!(%run_id, ?exit_code, "Event listener finished");
}
