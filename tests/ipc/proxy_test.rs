/*!
 * Proxy Tests
 * Attribute reads, method calls and remote errors through a served object
 */

use pretty_assertions::assert_eq;
use rig_kernel::ipc::rpc::{arg, serve_request, ServerEndpoint};
use rig_kernel::ipc::{pair, Dispatch, Member, ProxyError, RemoteError, RemoteProxy, Reply, Request};
use rig_kernel::{Kwargs, Value};
use serde_json::json;
use std::thread::{self, JoinHandle};

struct Calculator {
    x: i64,
    calls: u64,
}

impl Dispatch for Calculator {
    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "x" => Some(json!(self.x)),
            "calls" => Some(json!(self.calls)),
            _ => None,
        }
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "f" | "scale" | "fail")
    }

    fn invoke(&mut self, name: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value, RemoteError> {
        self.calls += 1;
        match name {
            "f" => Ok(json!(arg::<i64>(name, args, 0)? + arg::<i64>(name, args, 1)?)),
            "scale" => {
                let factor = kwargs.get("factor").and_then(Value::as_i64).unwrap_or(1);
                self.x *= factor;
                Ok(json!(self.x))
            }
            "fail" => Err(RemoteError::raised("ValueError", "bad input")),
            _ => Err(RemoteError::NotFound(name.to_string())),
        }
    }
}

/// Serve `target` until shutdown or until the client goes away
fn serve(mut target: Calculator, server: ServerEndpoint) -> JoinHandle<Calculator> {
    thread::spawn(move || {
        while let Ok(request) = server.recv() {
            if request == Request::Shutdown {
                break;
            }
            let reply = serve_request(&mut target, &request);
            if server.send(reply).is_err() {
                break;
            }
        }
        target
    })
}

fn calculator() -> (RemoteProxy, JoinHandle<Calculator>) {
    let (client, server) = pair::<Request, Reply>();
    let handle = serve(Calculator { x: 5, calls: 0 }, server);
    (RemoteProxy::new(client), handle)
}

#[test]
fn test_attribute_read() {
    let (proxy, _server) = calculator();
    assert_eq!(proxy.get("x").unwrap().into_value(), Some(json!(5)));
    assert_eq!(proxy.attribute("x").unwrap(), json!(5));
}

#[test]
fn test_method_resolves_to_callable() {
    let (proxy, _server) = calculator();
    let f = match proxy.get("f").unwrap() {
        Member::Method(m) => m,
        Member::Value(v) => panic!("f resolved to a value: {}", v),
    };
    assert_eq!(f.call(vec![json!(2), json!(3)], Kwargs::new()).unwrap(), json!(5));
    assert_eq!(proxy.call_with("f", vec![json!(10), json!(-4)]).unwrap(), json!(6));
}

#[test]
fn test_remote_raise_is_observable() {
    let (proxy, _server) = calculator();
    let err = proxy.call_with("fail", vec![]).unwrap_err();
    assert_eq!(err, ProxyError::Remote(RemoteError::raised("ValueError", "bad input")));
    assert!(!err.is_transport());

    // The channel survives a remote error
    assert_eq!(proxy.call_with("f", vec![json!(1), json!(1)]).unwrap(), json!(2));
}

#[test]
fn test_unknown_name_is_not_a_method() {
    let (proxy, _server) = calculator();
    let err = proxy.get("nope").unwrap_err();
    assert_eq!(err.remote(), Some(&RemoteError::NotFound("nope".to_string())));

    let err = proxy.call_with("nope", vec![]).unwrap_err();
    assert_eq!(err.remote(), Some(&RemoteError::NotFound("nope".to_string())));
}

#[test]
fn test_bad_arguments_reported() {
    let (proxy, _server) = calculator();
    let err = proxy.call_with("f", vec![json!("two")]).unwrap_err();
    assert!(matches!(err.remote(), Some(RemoteError::InvalidArguments { name, .. }) if name == "f"));
}

#[test]
fn test_kwargs_reach_remote() {
    let (proxy, _server) = calculator();
    let mut kwargs = Kwargs::new();
    kwargs.insert("factor".to_string(), json!(3));
    assert_eq!(proxy.call("scale", vec![], kwargs).unwrap(), json!(15));
    // Nothing is cached on the client side
    assert_eq!(proxy.attribute("x").unwrap(), json!(15));
}

#[test]
fn test_clones_share_one_channel() {
    let (proxy, server) = calculator();
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let proxy = proxy.clone();
            thread::spawn(move || {
                for j in 0..25 {
                    let sum = proxy.call_with("f", vec![json!(i), json!(j)]).unwrap();
                    assert_eq!(sum, json!(i + j));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    drop(proxy);
    assert_eq!(server.join().unwrap().calls, 100);
}

#[test]
fn test_server_gone_is_transport_error() {
    let (client, server) = pair::<Request, Reply>();
    let proxy = RemoteProxy::new(client);
    drop(server);
    let err = proxy.attribute("x").unwrap_err();
    assert!(err.is_transport());
}

#[cfg(unix)]
#[test]
fn test_proxy_over_socket() {
    use rig_kernel::ipc::socket_pair;

    let (client, server) = socket_pair::<Request, Reply>().unwrap();
    let server = serve(Calculator { x: 7, calls: 0 }, server.open().unwrap());
    let proxy = RemoteProxy::new(client.open().unwrap());

    assert_eq!(proxy.attribute("x").unwrap(), json!(7));
    assert_eq!(proxy.call_with("f", vec![json!(2), json!(3)]).unwrap(), json!(5));
    let err = proxy.call_with("fail", vec![]).unwrap_err();
    assert_eq!(err.remote(), Some(&RemoteError::raised("ValueError", "bad input")));

    drop(proxy);
    assert_eq!(server.join().unwrap().calls, 2);
}
