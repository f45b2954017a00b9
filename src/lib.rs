/*!
 * Rig Kernel Library
 * Process isolation, remote invocation and sample streaming for experiment rigs
 */

pub mod core;
pub mod ipc;
pub mod monitoring;
pub mod process;
pub mod stream;
pub mod task;

// Re-exports
pub use crate::core::{Kwargs, RigError, Sample, Value};
pub use ipc::{Dispatch, IpcError, ProxyError, RemoteError, RemoteProxy};
pub use monitoring::init_tracing;
pub use process::{Isolation, WorkerHandle};
pub use stream::{EyeSim, Hardware, MotionSim, Records, StreamBuffer, StreamConfig, StreamSource};
pub use task::{ExperimentTask, HostConfig, Notifier, TaskConfig, TaskHost, TaskStatus};
