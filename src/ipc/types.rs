/*!
 * IPC Types
 * Transport errors shared by every channel
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// IPC operation result
///
/// # Must Use
/// A failed channel operation means the peer is gone and must be handled
pub type IpcResult<T> = Result<T, IpcError>;

/// Transport error: the channel itself failed, not the call it carried
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum IpcError {
    /// Peer endpoint dropped or its process exited
    #[error("Channel closed: {0}")]
    #[diagnostic(
        code(ipc::closed),
        help("The peer endpoint was dropped or its process exited. The channel cannot be reused.")
    )]
    Closed(String),

    /// Socket I/O failure other than a clean close
    #[error("Channel I/O failed: {0}")]
    #[diagnostic(code(ipc::io), help("The underlying socket reported an error. Check the peer process."))]
    Io(String),

    /// Frame payload could not be encoded or decoded
    #[error("Frame codec failed: {0}")]
    #[diagnostic(
        code(ipc::codec),
        help("Both ends must speak the same message types. A decode failure usually means a version mismatch.")
    )]
    Codec(String),

    /// Length prefix beyond the frame limit
    #[error("Frame too large: {size} bytes (limit {limit})")]
    #[diagnostic(
        code(ipc::frame_too_large),
        help("The stream is out of sync or the message is unreasonably large.")
    )]
    FrameTooLarge { size: usize, limit: usize },
}

impl IpcError {
    /// Check whether the error means the peer is gone
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, IpcError::Closed(_))
    }
}

impl From<io::Error> for IpcError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => IpcError::Closed(err.to_string()),
            _ => IpcError::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        IpcError::Codec(err.to_string())
    }
}
