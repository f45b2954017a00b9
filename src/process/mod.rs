/*!
 * Process Module
 * Supervised workers behind a thread or process boundary
 */

pub mod supervisor;
pub mod types;

pub use supervisor::{spawn_worker, WorkerBuilder, WorkerHandle};
pub use types::{ExitReason, Isolation, ProcessError, ProcessResult, WorkerExit};
