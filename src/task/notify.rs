/*!
 * Task Notifications
 * Events from a worker to its host, the external sink, and the status board
 */

use super::types::{StatusRecord, TaskStatus};
use crate::core::types::Value;
use crate::ipc::{pair, Endpoint};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Event travelling from a worker to its host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Notification {
    /// The task entered a new state
    Transition { status: TaskStatus, state: String },
    /// Failure with its full diagnostic
    Error { msg: String },
    /// Printed diagnostics
    Text { text: String },
    /// Last message of a worker
    Exited { code: i32 },
}

impl Notification {
    /// Mapping handed to the external sink
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Notification::Transition { status, state } => json!({
                "status": status.as_str(),
                "State": state,
            }),
            Notification::Error { msg } => json!({"status": "error", "msg": msg}),
            Notification::Text { text } => json!({"text": text}),
            Notification::Exited { code } => json!({"status": "exited", "code": code}),
        }
    }
}

/// External collaborator receiving task events
pub trait NotificationSink: Send + Sync {
    /// Transition and error payloads
    fn notify(&self, payload: &Value);

    /// Raw diagnostic text printed by the task
    fn write_text(&self, text: &str) {
        let _ = text;
    }
}

/// Sink writing everything to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, payload: &Value) {
        if payload.get("status").and_then(Value::as_str) == Some("error") {
            error!(%payload, "Task error");
        } else {
            info!(%payload, "Task notification");
        }
    }

    fn write_text(&self, text: &str) {
        info!(target: "task_output", "{}", text.trim_end());
    }
}

/// Sink keeping everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    payloads: Mutex<Vec<Value>>,
    text: Mutex<String>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().clone()
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.text.lock().clone()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, payload: &Value) {
        self.payloads.lock().push(payload.clone());
    }

    fn write_text(&self, text: &str) {
        self.text.lock().push_str(text);
    }
}

/// Worker-side sender of notifications
///
/// Clones share one channel. Delivery is best effort: a host that went
/// away is not the task's problem.
#[derive(Debug, Clone)]
pub struct Notifier {
    status: TaskStatus,
    events: Arc<Endpoint<Notification, ()>>,
}

impl Notifier {
    #[must_use]
    pub fn new(status: TaskStatus, events: Endpoint<Notification, ()>) -> Self {
        Self {
            status,
            events: Arc::new(events),
        }
    }

    /// In-memory notifier and the endpoint its events arrive on
    #[must_use]
    pub fn pair(status: TaskStatus) -> (Self, Endpoint<(), Notification>) {
        let (tx, rx) = pair();
        (Self::new(status, tx), rx)
    }

    /// Status the run was started with
    #[inline]
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    fn send(&self, event: Notification) {
        if let Err(e) = self.events.send(event) {
            debug!(error = %e, "Notification dropped");
        }
    }

    /// Publish a state change; `None` means the task reached its end
    pub fn set_state(&self, state: Option<&str>) {
        self.send(Notification::Transition {
            status: self.status,
            state: state.unwrap_or("stopped").to_string(),
        });
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.send(Notification::Error { msg: msg.into() });
    }

    pub fn text(&self, text: impl Into<String>) {
        self.send(Notification::Text { text: text.into() });
    }

    pub(crate) fn exited(&self, code: i32) {
        self.send(Notification::Exited { code });
    }

    /// `io::Write` adapter delivering whole lines as text notifications
    #[must_use]
    pub fn writer(&self) -> TextWriter {
        TextWriter {
            notifier: self.clone(),
            pending: Vec::new(),
        }
    }
}

/// Line-buffered writer into the raw-text sink
#[derive(Debug)]
pub struct TextWriter {
    notifier: Notifier,
    pending: Vec<u8>,
}

impl TextWriter {
    fn emit(&mut self, upto: usize) {
        let line: Vec<u8> = self.pending.drain(..upto).collect();
        self.notifier.text(String::from_utf8_lossy(&line).into_owned());
    }
}

impl io::Write for TextWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        if let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') {
            self.emit(last_newline + 1);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let len = self.pending.len();
            self.emit(len);
        }
        Ok(())
    }
}

impl Drop for TextWriter {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}

/// Host-side status register with change subscriptions
#[derive(Debug, Default)]
pub struct StatusBoard {
    record: RwLock<StatusRecord>,
    subscribers: Mutex<Vec<flume::Sender<StatusRecord>>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> StatusRecord {
        self.record.read().clone()
    }

    /// Replace the record and tell every live subscriber
    pub fn publish(&self, record: StatusRecord) {
        *self.record.write() = record.clone();
        self.broadcast(record);
    }

    /// Edit the record in place; subscribers hear only about real changes
    pub fn update(&self, edit: impl FnOnce(&mut StatusRecord)) {
        let changed = {
            let mut record = self.record.write();
            let before = record.clone();
            edit(&mut *record);
            (*record != before).then(|| record.clone())
        };
        if let Some(record) = changed {
            self.broadcast(record);
        }
    }

    fn broadcast(&self, record: StatusRecord) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(record.clone()).is_ok());
    }

    /// Receive every future record
    #[must_use]
    pub fn subscribe(&self) -> flume::Receiver<StatusRecord> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}
