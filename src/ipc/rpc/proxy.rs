/*!
 * Remote Proxy
 * Client-side stand-in for an object that lives behind a channel
 */

use super::super::channel::Endpoint;
use super::super::types::IpcResult;
use super::types::{ProxyError, RemoteError, Reply, Request};
use crate::core::types::{Kwargs, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Client end of an RPC channel
pub type ClientEndpoint = Endpoint<Request, Reply>;

/// Server end of an RPC channel
pub type ServerEndpoint = Endpoint<Reply, Request>;

/// Handle turning attribute reads and method calls into round trips
///
/// Clones share one channel. The channel stays locked for a whole
/// send/receive round trip, so at most one request is ever in flight.
/// Nothing is cached: every access asks the remote.
#[derive(Clone, Debug)]
pub struct RemoteProxy {
    channel: Arc<Mutex<ClientEndpoint>>,
}

/// What a name resolved to on the remote
#[derive(Debug, Clone)]
pub enum Member {
    /// Plain attribute and its current value
    Value(Value),
    /// Callable method
    Method(MethodProxy),
}

impl Member {
    /// The attribute value, if the name was an attribute
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Member::Value(v) => Some(v),
            Member::Method(_) => None,
        }
    }

    /// The method handle, if the name was a method
    #[must_use]
    pub fn into_method(self) -> Option<MethodProxy> {
        match self {
            Member::Value(_) => None,
            Member::Method(m) => Some(m),
        }
    }
}

impl RemoteProxy {
    #[must_use]
    pub fn new(channel: ClientEndpoint) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
        }
    }

    fn round_trip(&self, request: Request) -> Result<Value, ProxyError> {
        let channel = self.channel.lock();
        channel.send(request)?;
        let reply = channel.recv()?;
        Ok(reply?)
    }

    /// Resolve `name` on the remote
    ///
    /// A method name yields a `MethodProxy` bound to it; an unknown name is
    /// an error, never mistaken for a method.
    pub fn get(&self, name: &str) -> Result<Member, ProxyError> {
        match self.round_trip(Request::get_attribute(name)) {
            Ok(value) => Ok(Member::Value(value)),
            Err(ProxyError::Remote(RemoteError::NotAttribute(_))) => {
                debug!(name, "Remote name resolved to a method");
                Ok(Member::Method(self.method(name)))
            }
            Err(e) => Err(e),
        }
    }

    /// Read a plain attribute
    pub fn attribute(&self, name: &str) -> Result<Value, ProxyError> {
        self.round_trip(Request::get_attribute(name))
    }

    /// Call a method with positional and keyword arguments
    pub fn call(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, ProxyError> {
        self.round_trip(Request::invoke(name, args, kwargs))
    }

    /// Call a method with positional arguments only
    pub fn call_with(&self, name: &str, args: Vec<Value>) -> Result<Value, ProxyError> {
        self.call(name, args, Kwargs::new())
    }

    /// Handle for method `name` without asking the remote first
    #[must_use]
    pub fn method(&self, name: &str) -> MethodProxy {
        MethodProxy {
            name: name.to_string(),
            proxy: self.clone(),
        }
    }

    /// Send the shutdown sentinel without waiting for an answer
    pub(crate) fn shutdown(&self) -> IpcResult<()> {
        self.channel.lock().send(Request::Shutdown)
    }
}

/// Proxy bound to one remote method
#[derive(Debug, Clone)]
pub struct MethodProxy {
    name: String,
    proxy: RemoteProxy,
}

impl MethodProxy {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the method and block for its result
    pub fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, ProxyError> {
        self.proxy.call(&self.name, args, kwargs)
    }
}
