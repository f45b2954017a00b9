/*!
 * Error Types
 * One place to reach every error class of the rig
 */

use miette::Diagnostic;
use thiserror::Error;

pub use crate::ipc::rpc::{ProxyError, RemoteError};
pub use crate::ipc::IpcError;
pub use crate::process::ProcessError;
pub use crate::stream::{HardwareError, IntegrityError, SinkError, StreamError};
pub use crate::task::{HostError, StateError};

/// Any rig error, for callers that want a single type
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum RigError {
    /// Channel closed or peer process died
    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] IpcError),

    /// Raised by a remote object, carried back as data
    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),

    /// Illegal lifecycle transition
    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    /// Sample acquisition failure
    #[error(transparent)]
    #[diagnostic(transparent)]
    Hardware(#[from] HardwareError),

    /// Ring buffer corruption
    #[error(transparent)]
    #[diagnostic(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Host(#[from] HostError),
}

impl From<ProxyError> for RigError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Transport(e) => RigError::Transport(e),
            ProxyError::Remote(e) => RigError::Remote(e),
        }
    }
}

impl RigError {
    /// Fatal classes are never retried
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            RigError::Transport(_) | RigError::State(_) | RigError::Integrity(_) => true,
            RigError::Remote(_) | RigError::Hardware(_) => false,
            RigError::Stream(e) => !matches!(e, StreamError::Proxy(ProxyError::Remote(_))),
            RigError::Process(_) => true,
            RigError::Host(e) => !matches!(e, HostError::Proxy(ProxyError::Remote(_))),
        }
    }
}
