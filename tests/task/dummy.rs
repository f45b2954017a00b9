/*!
 * Dummy Task
 * Scriptable experiment task shared by the task tests
 */

use anyhow::anyhow;
use rig_kernel::ipc::rpc::arg;
use rig_kernel::ipc::{Dispatch, RemoteError};
use rig_kernel::task::TaskConfig;
use rig_kernel::{ExperimentTask, Kwargs, Notifier, Value};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Shared counters; only meaningful under thread isolation
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub builds: Arc<AtomicUsize>,
    pub cleanups: Arc<AtomicUsize>,
}

impl Counters {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

/// Task whose failures are switched on through config params
pub struct Dummy {
    notifier: Notifier,
    paused: bool,
    ended: bool,
    fail_start: bool,
    end_fails: bool,
    cleanups: Arc<AtomicUsize>,
}

fn flag(config: &TaskConfig, key: &str) -> bool {
    config.params.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub fn dummy_factory(
    counters: Counters,
) -> impl Fn(&TaskConfig, Notifier) -> anyhow::Result<Box<dyn ExperimentTask>> + Send + Sync + 'static {
    move |config: &TaskConfig, notifier: Notifier| {
        counters.builds.fetch_add(1, Ordering::SeqCst);
        if flag(config, "fail_build") {
            return Err(anyhow!("no rig named {}", config.name).context("building dummy"));
        }
        let task: Box<dyn ExperimentTask> = Box::new(Dummy {
            notifier,
            paused: false,
            ended: false,
            fail_start: flag(config, "fail_start"),
            end_fails: flag(config, "end_fails"),
            cleanups: Arc::clone(&counters.cleanups),
        });
        Ok(task)
    }
}

impl Dispatch for Dummy {
    fn attribute(&self, name: &str) -> Option<Value> {
        (name == "paused").then(|| json!(self.paused))
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "add" | "raise" | "echo" | "finish")
    }

    fn invoke(&mut self, name: &str, args: &[Value], _kwargs: &Kwargs) -> Result<Value, RemoteError> {
        match name {
            "add" => Ok(json!(arg::<i64>(name, args, 0)? + arg::<i64>(name, args, 1)?)),
            "raise" => Err(RemoteError::raised("ValueError", "requested failure")),
            "echo" => {
                let text: String = arg(name, args, 0)?;
                let mut out = self.notifier.writer();
                writeln!(out, "{}", text).map_err(|e| RemoteError::raised("IOError", e.to_string()))?;
                Ok(Value::Null)
            }
            "finish" => {
                self.ended = true;
                Ok(Value::Null)
            }
            _ => Err(RemoteError::NotFound(name.to_string())),
        }
    }
}

impl ExperimentTask for Dummy {
    fn start(&mut self) -> anyhow::Result<()> {
        if self.fail_start {
            return Err(anyhow!("sensor offline").context("starting dummy"));
        }
        Ok(())
    }

    fn state(&self) -> Option<String> {
        if self.ended {
            None
        } else if self.paused {
            Some("pause".to_string())
        } else {
            Some("wait".to_string())
        }
    }

    fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    fn end_task(&mut self) -> Result<(), RemoteError> {
        if self.end_fails {
            return Err(RemoteError::raised("RuntimeError", "cannot end"));
        }
        self.ended = true;
        Ok(())
    }

    fn report(&self) -> Value {
        json!({"paused": self.paused})
    }

    fn cleanup(&mut self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
