/*!
 * Process Types
 * Isolation modes, exit reporting and supervision errors
 */

use crate::core::limits::PANIC_EXIT_CODE;
use crate::ipc::Transport;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Process operation result
///
/// # Must Use
/// A worker that failed to spawn or join leaves its owner in an unknown state
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Where a worker body runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Named OS thread, panics contained
    #[default]
    Thread,
    /// Forked child process, full memory isolation
    #[cfg(unix)]
    Process,
}

impl Isolation {
    /// Channel transport able to cross this boundary
    #[inline]
    #[must_use]
    pub const fn transport(self) -> Transport {
        match self {
            Isolation::Thread => Transport::Memory,
            #[cfg(unix)]
            Isolation::Process => Transport::Socket,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Isolation::Thread => "thread",
            #[cfg(unix)]
            Isolation::Process => "process",
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Isolation {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(Isolation::Thread),
            #[cfg(unix)]
            "process" | "fork" => Ok(Isolation::Process),
            other => Err(ProcessError::UnknownIsolation(other.to_string())),
        }
    }
}

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "value")]
pub enum ExitReason {
    /// Body returned or the child called exit
    Exited(i32),
    /// Body panicked (thread isolation)
    Panicked(String),
    /// Child killed by a signal
    #[cfg(unix)]
    Signaled(i32),
}

/// Final report of a supervised worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerExit {
    pub name: String,
    pub reason: ExitReason,
}

impl WorkerExit {
    /// Exit code in the shell's convention (128 + signal for signals)
    #[must_use]
    pub fn code(&self) -> i32 {
        match self.reason {
            ExitReason::Exited(code) => code,
            ExitReason::Panicked(_) => PANIC_EXIT_CODE,
            #[cfg(unix)]
            ExitReason::Signaled(sig) => 128 + sig,
        }
    }

    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.reason == ExitReason::Exited(0)
    }
}

/// Supervision errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum ProcessError {
    #[error("Spawn failed: {0}")]
    #[diagnostic(code(process::spawn_failed), help("The OS refused a new thread or process."))]
    SpawnFailed(String),

    #[error("Join failed: {0}")]
    #[diagnostic(code(process::join_failed))]
    JoinFailed(String),

    #[error("Kill failed: {0}")]
    #[diagnostic(code(process::kill_failed))]
    KillFailed(String),

    #[error("Unknown isolation mode: {0}")]
    #[diagnostic(code(process::unknown_isolation), help("Use 'thread' or 'process'."))]
    UnknownIsolation(String),
}
