/*!
 * Channel Endpoint
 * One end of a duplex, per-direction FIFO message channel
 */

use super::super::types::{IpcError, IpcResult};
#[cfg(unix)]
use super::frame::{read_frame, write_frame};
use flume::{RecvTimeoutError, TryRecvError};
#[cfg(unix)]
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
#[cfg(unix)]
use std::net::Shutdown;
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;
#[cfg(unix)]
use tracing::{debug, error};

/// Transport backing a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// In-process flume channels (both ends in one address space)
    Memory,
    /// Unix socket pair with length-prefixed frames (survives fork)
    #[cfg(unix)]
    Socket,
}

enum Outbound<Out> {
    Memory(flume::Sender<Out>),
    #[cfg(unix)]
    Socket {
        // Frames are written header-then-payload, serialize writers
        stream: Mutex<UnixStream>,
        _out: PhantomData<fn(Out)>,
    },
}

/// Open end of a channel: sends `Out`, receives `In`
///
/// Sending never blocks on the peer (both transports buffer); receiving
/// blocks until a message arrives or the peer goes away.
pub struct Endpoint<Out, In> {
    outbound: Outbound<Out>,
    inbound: flume::Receiver<In>,
}

impl<Out, In> std::fmt::Debug for Endpoint<Out, In> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("transport", &self.transport())
            .field("pending", &self.inbound.len())
            .finish()
    }
}

impl<Out, In> Endpoint<Out, In> {
    /// Transport this endpoint runs over
    #[must_use]
    pub fn transport(&self) -> Transport {
        match self.outbound {
            Outbound::Memory(_) => Transport::Memory,
            #[cfg(unix)]
            Outbound::Socket { .. } => Transport::Socket,
        }
    }

    /// Receive the next message, blocking without timeout
    pub fn recv(&self) -> IpcResult<In> {
        self.inbound.recv().map_err(|_| peer_gone())
    }

    /// Receive the next message, waiting at most `timeout`
    ///
    /// `Ok(None)` means the window elapsed with the peer still connected.
    pub fn recv_timeout(&self, timeout: Duration) -> IpcResult<Option<In>> {
        match self.inbound.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(peer_gone()),
        }
    }

    /// Receive a message if one is already waiting
    pub fn try_recv(&self) -> IpcResult<Option<In>> {
        match self.inbound.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(peer_gone()),
        }
    }
}

impl<Out: Serialize, In> Endpoint<Out, In> {
    /// Send a message to the peer
    pub fn send(&self, msg: Out) -> IpcResult<()> {
        match &self.outbound {
            Outbound::Memory(tx) => tx.send(msg).map_err(|_| peer_gone()),
            #[cfg(unix)]
            Outbound::Socket { stream, .. } => {
                let stream = stream.lock();
                write_frame(&*stream, &msg)
            }
        }
    }
}

impl<Out, In> Endpoint<Out, In> {
    // Shutting the socket down wakes our reader thread and gives the peer EOF
    #[cfg(unix)]
    fn close_socket(&self) {
        if let Outbound::Socket { stream, .. } = &self.outbound {
            let _ = stream.lock().shutdown(Shutdown::Both);
        }
    }

    #[cfg(not(unix))]
    fn close_socket(&self) {}
}

impl<Out, In> Drop for Endpoint<Out, In> {
    fn drop(&mut self) {
        self.close_socket();
    }
}

#[inline]
fn peer_gone() -> IpcError {
    IpcError::Closed("peer endpoint dropped".to_string())
}

/// Unopened end of a channel
///
/// Socket links spawn their reader thread on `open`, so a link created
/// before a fork must be opened in the process that keeps it.
pub enum Link<Out, In> {
    Memory(Endpoint<Out, In>),
    #[cfg(unix)]
    Socket(UnixStream, PhantomData<fn(Out) -> In>),
}

impl<Out, In> std::fmt::Debug for Link<Out, In> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Link::Memory(endpoint) => f.debug_tuple("Link::Memory").field(endpoint).finish(),
            #[cfg(unix)]
            Link::Socket(stream, _) => f.debug_tuple("Link::Socket").field(stream).finish(),
        }
    }
}

impl<Out, In> Link<Out, In>
where
    Out: Serialize,
    In: DeserializeOwned + Send + 'static,
{
    /// Turn the link into a usable endpoint in the current process
    pub fn open(self) -> IpcResult<Endpoint<Out, In>> {
        match self {
            Link::Memory(endpoint) => Ok(endpoint),
            #[cfg(unix)]
            Link::Socket(stream, _) => {
                let reader = stream.try_clone()?;
                let (tx, rx) = flume::unbounded();
                std::thread::Builder::new()
                    .name("ipc-reader".to_string())
                    .spawn(move || read_loop(reader, tx))?;
                Ok(Endpoint {
                    outbound: Outbound::Socket {
                        stream: Mutex::new(stream),
                        _out: PhantomData,
                    },
                    inbound: rx,
                })
            }
        }
    }
}

impl<Out, In> Link<Out, In> {
    /// Raw descriptor of a socket link, for closing in a forked child
    #[cfg(unix)]
    #[must_use]
    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            Link::Memory(_) => None,
            Link::Socket(stream, _) => Some(stream.as_raw_fd()),
        }
    }
}

#[cfg(unix)]
fn read_loop<In: DeserializeOwned>(stream: UnixStream, tx: flume::Sender<In>) {
    loop {
        match read_frame::<_, In>(&stream) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break;
                }
            }
            Err(IpcError::Closed(reason)) => {
                debug!(%reason, "Socket channel reached EOF");
                break;
            }
            Err(e) => {
                error!(error = %e, "Dropping socket channel after unreadable frame");
                break;
            }
        }
    }
}

/// Create a connected pair of in-memory endpoints
#[must_use]
pub fn pair<A, B>() -> (Endpoint<A, B>, Endpoint<B, A>) {
    let (a_tx, a_rx) = flume::unbounded();
    let (b_tx, b_rx) = flume::unbounded();
    (
        Endpoint {
            outbound: Outbound::Memory(a_tx),
            inbound: b_rx,
        },
        Endpoint {
            outbound: Outbound::Memory(b_tx),
            inbound: a_rx,
        },
    )
}

/// Create a connected pair of socket links
#[cfg(unix)]
pub fn socket_pair<A, B>() -> IpcResult<(Link<A, B>, Link<B, A>)> {
    let (left, right) = UnixStream::pair()?;
    Ok((
        Link::Socket(left, PhantomData),
        Link::Socket(right, PhantomData),
    ))
}

/// Create a connected pair of links over the given transport
pub fn link_pair<A, B>(transport: Transport) -> IpcResult<(Link<A, B>, Link<B, A>)> {
    match transport {
        Transport::Memory => {
            let (left, right) = pair();
            Ok((Link::Memory(left), Link::Memory(right)))
        }
        #[cfg(unix)]
        Transport::Socket => socket_pair(),
    }
}
