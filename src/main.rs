/*!
 * rigd - Rig Daemon Demo
 *
 * Runs a simulated eye-tracking task behind a task host:
 * - starts the task in a supervised worker
 * - drains streamed samples through the task's remote surface
 * - toggles pause twice and stops the task
 */

use anyhow::Context;
use rig_kernel::ipc::rpc::{arg, Dispatch, RemoteError};
use rig_kernel::stream::{EyeSim, StreamConfig, StreamSource};
use rig_kernel::task::{LogSink, StopOutcome};
use rig_kernel::{
    init_tracing, ExperimentTask, HostConfig, Isolation, Kwargs, Notifier, TaskConfig, TaskHost, Value,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const DEMO_BUFFER_SECONDS: u32 = 2;

/// Task owning one simulated eye stream
struct EyeDemo {
    eye: StreamSource,
    notifier: Notifier,
    paused: bool,
    ended: bool,
    drained: u64,
}

impl EyeDemo {
    fn build(config: &TaskConfig, notifier: Notifier) -> anyhow::Result<Box<dyn ExperimentTask>> {
        let isolation = config
            .params
            .get("stream_isolation")
            .and_then(Value::as_str)
            .map(str::parse::<Isolation>)
            .transpose()
            .context("parsing stream_isolation")?
            .unwrap_or_default();
        let stream_config = StreamConfig::eye()
            .with_buffer_seconds(buffer_seconds(config))
            .with_isolation(isolation);
        let eye = StreamSource::spawn("eye", stream_config, Vec::new(), || Ok(EyeSim::new()))
            .context("spawning eye stream")?;
        Ok(Box::new(Self {
            eye,
            notifier,
            paused: false,
            ended: false,
            drained: 0,
        }))
    }
}

/// Ring length requested by the run, or the demo default when absent or out of range
fn buffer_seconds(config: &TaskConfig) -> u32 {
    config
        .params
        .get("buffer_seconds")
        .and_then(Value::as_u64)
        .and_then(|secs| u32::try_from(secs).ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEMO_BUFFER_SECONDS)
}

impl Dispatch for EyeDemo {
    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "drained" => Some(json!(self.drained)),
            "overwritten" => Some(json!(self.eye.overwritten_total())),
            _ => None,
        }
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "drain" | "set_gain")
    }

    fn invoke(&mut self, name: &str, args: &[Value], _kwargs: &Kwargs) -> Result<Value, RemoteError> {
        match name {
            "drain" => {
                let records = self
                    .eye
                    .get()
                    .map_err(|e| RemoteError::raised("StreamError", e.to_string()))?;
                self.drained += records.len() as u64;
                let mut out = self.notifier.writer();
                let _ = writeln!(out, "drained {} samples ({} lost)", records.len(), records.overwritten());
                Ok(json!(records.len()))
            }
            "set_gain" => {
                let gain: f64 = arg(name, args, 0)?;
                self.eye
                    .call("set_gain", vec![json!(gain)], Kwargs::new())
                    .map_err(|e| RemoteError::raised("HardwareError", e.to_string()))
            }
            _ => Err(RemoteError::NotFound(name.to_string())),
        }
    }
}

impl ExperimentTask for EyeDemo {
    fn start(&mut self) -> anyhow::Result<()> {
        self.eye.start();
        Ok(())
    }

    fn state(&self) -> Option<String> {
        if self.ended {
            None
        } else if self.paused {
            Some("pause".to_string())
        } else {
            Some("trial".to_string())
        }
    }

    fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.eye.pause();
        self.notifier.set_state(self.state().as_deref());
        self.paused
    }

    fn end_task(&mut self) -> Result<(), RemoteError> {
        self.ended = true;
        Ok(())
    }

    fn report(&self) -> Value {
        json!({"drained": self.drained, "overwritten": self.eye.overwritten_total()})
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.eye.stop() {
            warn!(error = %e, "Eye stream ended badly");
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = HostConfig::from_env();
    info!(isolation = %config.isolation, "rigd starting");

    let host = TaskHost::new(EyeDemo::build, Arc::new(LogSink)).with_config(config);
    let updates = host.subscribe();

    let mut task = TaskConfig::new("eye-demo").with_param("buffer_seconds", json!(DEMO_BUFFER_SECONDS));
    if let Ok(isolation) = std::env::var("RIG_STREAM_ISOLATION") {
        task = task.with_param("stream_isolation", json!(isolation));
    }
    let run_id = host.runtask(task).context("starting demo task")?;
    info!(%run_id, "Demo task running");

    for _ in 0..3 {
        thread::sleep(Duration::from_millis(200));
        let drained = host
            .call("drain", Vec::new(), Kwargs::new())
            .context("draining samples")?;
        info!(samples = %drained, "Drained eye samples");
    }

    for _ in 0..2 {
        let label = host.pausetask().context("toggling pause")?;
        info!(label = label.as_str(), "Pause toggled");
    }

    let report = host.call("report", Vec::new(), Kwargs::new()).context("reading report")?;
    match host.stoptask().context("stopping demo task")? {
        StopOutcome::Stopped(record) => info!(status = %record.status, %report, "Demo task stopped"),
        StopOutcome::Failed { msg } => warn!(%msg, "Demo task failed to stop cleanly"),
    }

    for record in updates.try_iter() {
        info!(status = %record.status, state = ?record.state, label = ?record.label, "Status change");
    }
    Ok(())
}
