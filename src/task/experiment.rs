/*!
 * Experiment Tasks
 * The object a worker runs and the remote surface wrapped around it
 */

use super::types::PauseLabel;
use crate::core::types::{Kwargs, Value};
use crate::ipc::rpc::{Dispatch, RemoteError};
use serde_json::json;
use tracing::debug;

/// Experiment run inside a task worker
///
/// Methods exposed through `Dispatch` are callable from the host. The
/// names `pause`, `end_task`, `get_state` and `report` are answered by the
/// wrapper and never reach the task's own dispatch.
pub trait ExperimentTask: Dispatch + Send {
    /// Called once after construction, before any command is served
    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Name of the current state, `None` once the task has ended
    fn state(&self) -> Option<String>;

    /// Flip the pause flag, returning whether the task is now paused
    fn toggle_pause(&mut self) -> bool;

    /// Ask the task to finish
    fn end_task(&mut self) -> Result<(), RemoteError>;

    /// Summary the host may ask for at any time
    fn report(&self) -> Value {
        Value::Null
    }

    /// Release resources; called exactly once per constructed task
    fn cleanup(&mut self) {}
}

/// Remote surface of a task
pub struct TaskAdapter {
    task: Box<dyn ExperimentTask>,
    cleaned: bool,
}

const BUILTIN_METHODS: [&str; 4] = ["pause", "end_task", "get_state", "report"];

impl TaskAdapter {
    #[must_use]
    pub fn new(task: Box<dyn ExperimentTask>) -> Self {
        Self {
            task,
            cleaned: false,
        }
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        self.task.start()
    }

    #[must_use]
    pub fn state(&self) -> Option<String> {
        self.task.state()
    }

    /// The task reached its end on its own
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.task.state().is_none()
    }

    /// Run the task's cleanup hook unless it already ran
    pub fn cleanup(&mut self) {
        if !self.cleaned {
            self.cleaned = true;
            debug!("Running task cleanup");
            self.task.cleanup();
        }
    }
}

impl Dispatch for TaskAdapter {
    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "state" => Some(json!(self.task.state())),
            _ => self.task.attribute(name),
        }
    }

    fn has_method(&self, name: &str) -> bool {
        BUILTIN_METHODS.contains(&name) || self.task.has_method(name)
    }

    fn invoke(&mut self, name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value, RemoteError> {
        match name {
            "pause" => {
                let label = PauseLabel::from_paused(self.task.toggle_pause());
                Ok(json!(label.as_str()))
            }
            "end_task" => {
                self.task.end_task()?;
                Ok(Value::Null)
            }
            "get_state" => Ok(json!(self.task.state())),
            "report" => Ok(self.task.report()),
            _ => self.task.invoke(name, args, kwargs),
        }
    }
}

impl Drop for TaskAdapter {
    fn drop(&mut self) {
        self.cleanup();
    }
}
