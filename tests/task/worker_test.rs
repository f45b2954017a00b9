/*!
 * Task Worker Tests
 * The worker loop driven directly over in-memory channels
 */

use crate::dummy::{dummy_factory, Counters};
use pretty_assertions::assert_eq;
use rig_kernel::ipc::rpc::ClientEndpoint;
use rig_kernel::ipc::{pair, Endpoint, RemoteError, Reply, Request};
use rig_kernel::task::{run_worker, Notification, TaskFactory, WorkerContext, WorkerOutcome};
use rig_kernel::{Kwargs, Notifier, TaskConfig, TaskStatus};
use serde_json::json;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

struct Harness {
    client: ClientEndpoint,
    events: Endpoint<(), Notification>,
    worker: JoinHandle<WorkerOutcome>,
}

impl Harness {
    fn call(&self, name: &str, args: Vec<serde_json::Value>) -> Reply {
        self.client.send(Request::invoke(name, args, Kwargs::new())).unwrap();
        self.client.recv().unwrap()
    }

    /// Wait for the worker and collect everything it notified
    fn finish(self) -> (WorkerOutcome, Vec<Notification>) {
        let outcome = self.worker.join().unwrap();
        (outcome, drain(&self.events))
    }
}

fn drain(events: &Endpoint<(), Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = events.try_recv() {
        out.push(event);
    }
    out
}

fn launch(counters: &Counters, config: TaskConfig, recovery_window: Duration) -> Harness {
    let factory: TaskFactory = Arc::new(dummy_factory(counters.clone()));
    let (client, commands) = pair::<Request, Reply>();
    let (notifier, events) = Notifier::pair(config.initial_status());
    let ctx = WorkerContext {
        config,
        commands,
        notifier,
        recovery_window,
        poll_interval: Duration::from_millis(5),
        run_id: Uuid::new_v4(),
    };
    let worker = thread::spawn(move || run_worker(&factory, ctx));
    Harness { client, events, worker }
}

#[test]
fn test_shutdown_sentinel_ends_cleanly() {
    let counters = Counters::default();
    let harness = launch(&counters, TaskConfig::new("dummy"), Duration::from_secs(5));

    assert_eq!(harness.call("add", vec![json!(4), json!(5)]), Ok(json!(9)));
    harness.client.send(Request::Shutdown).unwrap();

    let (outcome, events) = harness.finish();
    assert_eq!(outcome, WorkerOutcome::Shutdown);
    assert_eq!(counters.cleanups(), 1);
    assert_eq!(
        events.first(),
        Some(&Notification::Transition {
            status: TaskStatus::Testing,
            state: "wait".to_string()
        })
    );
    assert_eq!(events.last(), Some(&Notification::Exited { code: 0 }));
}

#[test]
fn test_terminal_state_finishes_worker() {
    let counters = Counters::default();
    let harness = launch(&counters, TaskConfig::new("dummy").with_save_id(1), Duration::from_secs(5));

    assert_eq!(harness.call("end_task", vec![]), Ok(serde_json::Value::Null));

    let (outcome, events) = harness.finish();
    assert_eq!(outcome, WorkerOutcome::Finished);
    let n = events.len();
    assert!(n >= 2);
    assert_eq!(
        events[n - 2],
        Notification::Transition {
            status: TaskStatus::Running,
            state: "stopped".to_string()
        }
    );
    assert_eq!(events[n - 1], Notification::Exited { code: 0 });
    assert_eq!(counters.cleanups(), 1);
}

#[test]
fn test_start_failure_notifies_and_cleans_up() {
    let counters = Counters::default();
    let config = TaskConfig::new("dummy").with_param("fail_start", json!(true));
    let harness = launch(&counters, config, Duration::from_secs(5));

    let (outcome, events) = harness.finish();
    assert_eq!(outcome, WorkerOutcome::StartupFailed);
    assert_eq!(events.len(), 2);
    match &events[0] {
        Notification::Error { msg } => {
            assert!(msg.contains("starting dummy"));
            assert!(msg.contains("sensor offline"));
        }
        other => panic!("expected an error first, got {:?}", other),
    }
    assert_eq!(events[1], Notification::Exited { code: 1 });
    assert_eq!(counters.cleanups(), 1);
}

#[test]
fn test_build_failure_skips_cleanup() {
    let counters = Counters::default();
    let config = TaskConfig::new("dummy").with_param("fail_build", json!(true));
    let harness = launch(&counters, config, Duration::from_secs(5));

    let (outcome, events) = harness.finish();
    assert_eq!(outcome, WorkerOutcome::StartupFailed);
    assert!(matches!(&events[0], Notification::Error { msg } if msg.contains("building dummy")));
    assert_eq!(counters.builds(), 1);
    assert_eq!(counters.cleanups(), 0);
}

#[test]
fn test_failed_call_without_follow_up_is_abandoned() {
    let counters = Counters::default();
    let harness = launch(&counters, TaskConfig::new("dummy"), Duration::from_millis(50));

    assert_eq!(
        harness.call("raise", vec![]),
        Err(RemoteError::raised("ValueError", "requested failure"))
    );

    let (outcome, events) = harness.finish();
    assert_eq!(outcome, WorkerOutcome::Abandoned);
    assert!(events
        .iter()
        .any(|e| matches!(e, Notification::Error { msg } if msg.contains("abandoned"))));
    assert_eq!(events.last(), Some(&Notification::Exited { code: 2 }));
    assert_eq!(counters.cleanups(), 1);
}

#[test]
fn test_unknown_method_counts_as_failure() {
    let counters = Counters::default();
    let harness = launch(&counters, TaskConfig::new("dummy"), Duration::from_millis(50));

    assert_eq!(
        harness.call("teleport", vec![]),
        Err(RemoteError::NotFound("teleport".to_string()))
    );
    let (outcome, _events) = harness.finish();
    assert_eq!(outcome, WorkerOutcome::Abandoned);
}

#[test]
fn test_lost_host_ends_worker() {
    let counters = Counters::default();
    let harness = launch(&counters, TaskConfig::new("dummy"), Duration::from_secs(5));
    assert_eq!(harness.call("add", vec![json!(1), json!(1)]), Ok(json!(2)));

    let Harness { client, events, worker } = harness;
    drop(client);

    assert_eq!(worker.join().unwrap(), WorkerOutcome::TransportLost);
    assert_eq!(counters.cleanups(), 1);
    let events = drain(&events);
    assert_eq!(events.last(), Some(&Notification::Exited { code: 3 }));
}
