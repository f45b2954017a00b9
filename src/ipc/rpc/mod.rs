/*!
 * Remote Invocation
 * Attribute reads and method calls against objects behind a channel
 */

pub mod dispatch;
pub mod proxy;
pub mod types;

pub use dispatch::{arg, get_attribute, invoke, serve_request, Dispatch};
pub use proxy::{ClientEndpoint, Member, MethodProxy, RemoteProxy, ServerEndpoint};
pub use types::{ProxyError, RemoteError, Reply, Request};
