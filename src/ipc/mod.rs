/*!
 * IPC Module
 * Duplex channels and the request/reply protocol layered on them
 */

pub mod channel;
pub mod rpc;
pub mod types;

#[cfg(unix)]
pub use channel::socket_pair;
pub use channel::{link_pair, pair, Endpoint, Link, Transport};
pub use rpc::{
    Dispatch, Member, MethodProxy, ProxyError, RemoteError, RemoteProxy, Reply, Request,
};
pub use types::{IpcError, IpcResult};
