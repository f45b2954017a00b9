/*!
 * Task Module
 * Experiment task lifecycle: host, worker loop, notifications
 */

pub mod config;
pub mod experiment;
pub mod host;
pub mod notify;
pub mod types;
pub mod worker;

pub use config::HostConfig;
pub use experiment::{ExperimentTask, TaskAdapter};
pub use host::{TaskFactory, TaskHost};
pub use notify::{
    LogSink, MemorySink, Notification, NotificationSink, Notifier, StatusBoard, TextWriter,
};
pub use types::{
    HostError, HostResult, PauseLabel, StateError, StatusRecord, StopOutcome, TaskConfig,
    TaskStatus,
};
pub use worker::{run_worker, WorkerContext, WorkerOutcome};
