/*!
 * Remote Dispatch
 * Server side of the protocol: turns requests into calls on a local object
 */

use super::types::{RemoteError, Reply, Request};
use crate::core::types::{Kwargs, Value};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// Object whose attributes and methods can be reached over a channel
///
/// Attributes and methods are separate namespaces on the wire: a read of a
/// method name answers `NotAttribute`, an unknown name answers `NotFound`.
pub trait Dispatch {
    /// Current value of a plain attribute, `None` if `name` is not one
    fn attribute(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }

    /// Whether `name` is a callable method
    fn has_method(&self, name: &str) -> bool;

    /// Call a method
    fn invoke(&mut self, name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value, RemoteError>;
}

impl<D: Dispatch + ?Sized> Dispatch for Box<D> {
    fn attribute(&self, name: &str) -> Option<Value> {
        (**self).attribute(name)
    }

    fn has_method(&self, name: &str) -> bool {
        (**self).has_method(name)
    }

    fn invoke(&mut self, name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value, RemoteError> {
        (**self).invoke(name, args, kwargs)
    }
}

/// Answer an attribute read
pub fn get_attribute<D: Dispatch + ?Sized>(target: &D, name: &str) -> Reply {
    match target.attribute(name) {
        Some(value) => Ok(value),
        None if target.has_method(name) => Err(RemoteError::NotAttribute(name.to_string())),
        None => Err(RemoteError::NotFound(name.to_string())),
    }
}

/// Run a method call, turning a panic in the target into a `RemoteError`
pub fn invoke<D: Dispatch + ?Sized>(target: &mut D, name: &str, args: &[Value], kwargs: &Kwargs) -> Reply {
    if !target.has_method(name) {
        return Err(RemoteError::NotFound(name.to_string()));
    }
    match catch_unwind(AssertUnwindSafe(|| target.invoke(name, args, kwargs))) {
        Ok(reply) => reply,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(method = name, %message, "Remote method panicked");
            Err(RemoteError::Panicked {
                name: name.to_string(),
                message,
            })
        }
    }
}

/// Serve one request against `target`
///
/// `Shutdown` is acknowledged with `null`; the serving loop decides
/// whether to exit.
pub fn serve_request<D: Dispatch + ?Sized>(target: &mut D, request: &Request) -> Reply {
    let reply = match request {
        Request::GetAttribute { name } => get_attribute(target, name),
        Request::Invoke { name, args, kwargs } => invoke(target, name, args, kwargs),
        Request::Shutdown => Ok(Value::Null),
    };
    if let Err(ref e) = reply {
        debug!(request = ?request.name(), error = %e, "Request answered with remote error");
    }
    reply
}

/// Decode positional argument `index` of method `method`
pub fn arg<T: DeserializeOwned>(method: &str, args: &[Value], index: usize) -> Result<T, RemoteError> {
    let value = args.get(index).cloned().ok_or_else(|| {
        RemoteError::invalid_arguments(method, format!("missing argument {}", index))
    })?;
    serde_json::from_value(value)
        .map_err(|e| RemoteError::invalid_arguments(method, format!("argument {}: {}", index, e)))
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
