/*!
 * RPC Types
 * Wire shapes of remote attribute reads and method calls
 */

use super::super::types::IpcError;
use crate::core::types::{Kwargs, Value};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command sent to a remote object
///
/// Exactly one command is in flight per channel direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Request {
    /// Read a plain attribute
    GetAttribute { name: String },
    /// Call a method
    Invoke {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Kwargs::is_empty")]
        kwargs: Kwargs,
    },
    /// Sentinel asking the serving loop to finish
    Shutdown,
}

impl Request {
    #[inline]
    #[must_use]
    pub fn get_attribute(name: impl Into<String>) -> Self {
        Request::GetAttribute { name: name.into() }
    }

    #[inline]
    #[must_use]
    pub fn invoke(name: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Request::Invoke {
            name: name.into(),
            args,
            kwargs,
        }
    }

    /// Name the request targets, if any
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Request::GetAttribute { name } | Request::Invoke { name, .. } => Some(name),
            Request::Shutdown => None,
        }
    }
}

/// Response to a request: a value, or the error the remote raised
///
/// Serialized as `{"Ok": ..}` / `{"Err": ..}` so the receiver never has to
/// guess whether a value is an error.
pub type Reply = Result<Value, RemoteError>;

/// Error raised by the remote object, carried back as data
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum RemoteError {
    #[error("No attribute or method named '{0}'")]
    #[diagnostic(
        code(rpc::not_found),
        help("The remote object exposes neither an attribute nor a method with this name.")
    )]
    NotFound(String),

    #[error("'{0}' is a method, not an attribute")]
    #[diagnostic(code(rpc::not_attribute), help("Call it instead of reading it."))]
    NotAttribute(String),

    #[error("Invalid arguments for '{name}': {reason}")]
    #[diagnostic(code(rpc::invalid_arguments))]
    InvalidArguments { name: String, reason: String },

    #[error("{kind}: {message}")]
    #[diagnostic(code(rpc::raised))]
    Raised { kind: String, message: String },

    #[error("Remote call '{name}' panicked: {message}")]
    #[diagnostic(
        code(rpc::panicked),
        help("The remote object panicked while serving the call. Its loop survived, its state may not have.")
    )]
    Panicked { name: String, message: String },
}

impl RemoteError {
    #[inline]
    #[must_use]
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn invalid_arguments(name: impl Into<String>, reason: impl Into<String>) -> Self {
        RemoteError::InvalidArguments {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a proxied call
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum ProxyError {
    /// The channel failed; the remote is unreachable
    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] IpcError),

    /// The remote raised; the channel is still usable
    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),
}

impl ProxyError {
    #[inline]
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, ProxyError::Transport(_))
    }

    /// The carried remote error, if the remote raised
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            ProxyError::Remote(e) => Some(e),
            ProxyError::Transport(_) => None,
        }
    }
}
