/*!
 * Task Types
 * Lifecycle states, status records, task configuration and host errors
 */

use crate::core::types::{Kwargs, Value};
use crate::ipc::{IpcError, ProxyError};
use crate::process::ProcessError;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Task host operation result
pub type HostResult<T> = Result<T, HostError>;

/// Lifecycle state of the host's task
///
/// `Idle -> {Testing, Running} -> {Error, Stopped} -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    /// Running without persistence
    Testing,
    /// Running with persistence
    Running,
    Error,
    Stopped,
}

impl TaskStatus {
    /// A worker is live and owns the host
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, TaskStatus::Testing | TaskStatus::Running)
    }

    /// The task ended and its handle is being released
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Error | TaskStatus::Stopped)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Testing => "testing",
            TaskStatus::Running => "running",
            TaskStatus::Error => "error",
            TaskStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visible status of a host, published on every change
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: TaskStatus,
    /// Last pause label reported by the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<PauseLabel>,
    /// Task's own state name from its last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl StatusRecord {
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn started(status: TaskStatus, run_id: Uuid) -> Self {
        Self {
            status,
            label: None,
            state: None,
            run_id: Some(run_id),
        }
    }

    /// Whether the record belongs to run `run_id`
    #[inline]
    #[must_use]
    pub fn is_run(&self, run_id: Uuid) -> bool {
        self.run_id == Some(run_id)
    }
}

/// Label reported by a pause toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseLabel {
    Pause,
    Running,
}

impl PauseLabel {
    #[inline]
    #[must_use]
    pub const fn from_paused(paused: bool) -> Self {
        if paused {
            PauseLabel::Pause
        } else {
            PauseLabel::Running
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PauseLabel::Pause => "pause",
            PauseLabel::Running => "running",
        }
    }

    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pause" => Some(PauseLabel::Pause),
            "running" => Some(PauseLabel::Running),
            _ => None,
        }
    }
}

/// What to run and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    /// Record id to save under; `None` runs without persistence
    #[serde(default)]
    pub save_id: Option<u64>,
    #[serde(default)]
    pub params: Kwargs,
}

impl TaskConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            save_id: None,
            params: Kwargs::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_save_id(mut self, save_id: u64) -> Self {
        self.save_id = Some(save_id);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// `Testing` without persistence, `Running` with it
    #[inline]
    #[must_use]
    pub const fn initial_status(&self) -> TaskStatus {
        if self.save_id.is_some() {
            TaskStatus::Running
        } else {
            TaskStatus::Testing
        }
    }
}

/// Result of `stoptask`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopOutcome {
    /// The task ended; the status it had when stopping began
    Stopped(StatusRecord),
    /// `end_task` raised; the task was released anyway
    Failed { msg: String },
}

impl StopOutcome {
    #[inline]
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self, StopOutcome::Stopped(_))
    }

    /// Payload for the calling layer
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            StopOutcome::Stopped(record) => json!({
                "status": record.status.as_str(),
                "State": record.state,
            }),
            StopOutcome::Failed { msg } => json!({"status": "error", "msg": msg}),
        }
    }
}

/// Illegal lifecycle transition
///
/// Rejected before anything is spawned or changed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum StateError {
    #[error("A task is already {status}")]
    #[diagnostic(code(task::already_active), help("Stop the running task before starting another."))]
    AlreadyActive { status: TaskStatus },

    #[error("No task is running (status is {status})")]
    #[diagnostic(code(task::not_active))]
    NotActive { status: TaskStatus },

    #[error("No task handle")]
    #[diagnostic(code(task::no_task), help("Start a task first."))]
    NoTask,
}

/// Task host errors
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum HostError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] IpcError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Proxy(#[from] ProxyError),

    #[error("Unexpected reply to '{method}': {value}")]
    #[diagnostic(code(task::unexpected_reply))]
    UnexpectedReply { method: String, value: String },
}
