/*!
 * Stream Source
 * Owns a polling loop and the ring it fills
 *
 * Under thread isolation the loop runs on its own thread and shares the
 * ring directly. Under process isolation the loop and the ring live in a
 * forked worker; reads and controls cross a socket, so a driver that
 * aborts only takes that worker down.
 */

use super::buffer::{RecordFilter, Records, StreamBuffer};
use super::hardware::{Hardware, SampleSink};
use super::polling::{Controls, LoopReport, PollingLoop};
use super::types::{HardwareError, StreamConfig, StreamError, StreamResult};
use crate::core::types::{Kwargs, Value};
use crate::ipc::rpc::dispatch::panic_message;
use crate::ipc::rpc::{ProxyError, RemoteProxy};
use crate::ipc::{pair, Reply, Request};
use crate::process::Isolation;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

#[cfg(unix)]
use super::control::{serve_control, ControlClient, StreamCommand, StreamReply};
#[cfg(unix)]
use crate::ipc::{socket_pair, Link};
#[cfg(unix)]
use crate::process::{WorkerBuilder, WorkerHandle};
#[cfg(unix)]
use parking_lot::Mutex;
#[cfg(unix)]
use std::time::Duration;
#[cfg(unix)]
use tracing::error;

enum Backend {
    Thread {
        buffer: Arc<StreamBuffer>,
        controls: Arc<Controls>,
        thread: Option<JoinHandle<LoopReport>>,
    },
    #[cfg(unix)]
    Process {
        control: Mutex<ControlClient>,
        worker: Option<WorkerHandle>,
    },
}

/// Handle to a running polling loop
///
/// Streaming starts off; `start()` turns it on. Dropping the source stops
/// the loop and waits for it.
pub struct StreamSource {
    name: String,
    backend: Backend,
    proxy: RemoteProxy,
    filter: Option<RecordFilter>,
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("name", &self.name)
            .field("isolation", &self.isolation())
            .field("running", &self.is_running())
            .finish()
    }
}

impl StreamSource {
    /// Spawn the loop named `stream-<name>` under `config.isolation`
    ///
    /// The hardware is built by `factory` where the loop runs, so it never
    /// has to cross threads. Returns once it is built, or with its
    /// construction error.
    pub fn spawn<H, F>(
        name: impl Into<String>,
        config: StreamConfig,
        sinks: Vec<Box<dyn SampleSink>>,
        factory: F,
    ) -> StreamResult<Self>
    where
        H: Hardware + 'static,
        F: FnOnce() -> Result<H, HardwareError> + Send + 'static,
    {
        let name = name.into();
        let buffer = StreamBuffer::from_config(&config)?;
        let (capacity, record_size) = (buffer.capacity(), buffer.shape().size());

        let source = match config.isolation {
            Isolation::Thread => Self::spawn_thread(name, &config, buffer, sinks, factory)?,
            #[cfg(unix)]
            Isolation::Process => Self::spawn_process(name, &config, buffer, sinks, factory)?,
        };
        info!(
            source = %source.name,
            isolation = %config.isolation,
            capacity,
            record_size,
            "Stream source spawned"
        );
        Ok(source)
    }

    fn spawn_thread<H, F>(
        name: String,
        config: &StreamConfig,
        buffer: StreamBuffer,
        sinks: Vec<Box<dyn SampleSink>>,
        factory: F,
    ) -> StreamResult<Self>
    where
        H: Hardware + 'static,
        F: FnOnce() -> Result<H, HardwareError> + Send + 'static,
    {
        let buffer = Arc::new(buffer);
        let controls = Arc::new(Controls::new());
        let (client, server) = pair::<Request, Reply>();
        let (ready_tx, ready_rx) = flume::bounded::<Result<(), HardwareError>>(1);

        let loop_name = name.clone();
        let loop_buffer = Arc::clone(&buffer);
        let loop_controls = Arc::clone(&controls);
        let idle_sleep = config.idle_sleep;
        let thread = thread::Builder::new()
            .name(format!("stream-{}", name))
            .spawn(move || match factory() {
                Ok(hardware) => {
                    let _ = ready_tx.send(Ok(()));
                    PollingLoop::new(loop_name, hardware, loop_buffer, server, loop_controls)
                        .with_sinks(sinks)
                        .with_idle_sleep(idle_sleep)
                        .run()
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    LoopReport::default()
                }
            })
            .map_err(|e| StreamError::Spawn {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                let _ = thread.join();
                return Err(StreamError::Hardware { name, source });
            }
            Err(_) => {
                let reason = match thread.join() {
                    Err(payload) => panic_message(payload.as_ref()),
                    Ok(_) => "loop exited before reporting".to_string(),
                };
                return Err(StreamError::Spawn { name, reason });
            }
        }

        Ok(Self {
            name,
            backend: Backend::Thread {
                buffer,
                controls,
                thread: Some(thread),
            },
            proxy: RemoteProxy::new(client),
            filter: None,
        })
    }

    #[cfg(unix)]
    fn spawn_process<H, F>(
        name: String,
        config: &StreamConfig,
        buffer: StreamBuffer,
        sinks: Vec<Box<dyn SampleSink>>,
        factory: F,
    ) -> StreamResult<Self>
    where
        H: Hardware + 'static,
        F: FnOnce() -> Result<H, HardwareError> + Send + 'static,
    {
        let spawn_error = |reason: String| StreamError::Spawn {
            name: name.clone(),
            reason,
        };
        let (client_link, server_link) = socket_pair::<Request, Reply>()?;
        let (control_link, loop_control_link) = socket_pair::<StreamCommand, StreamReply>()?;

        let builder = [client_link.raw_fd(), control_link.raw_fd()]
            .into_iter()
            .flatten()
            .fold(
                WorkerBuilder::new(format!("stream-{}", name)).isolation(Isolation::Process),
                WorkerBuilder::close_in_child,
            );
        let loop_name = name.clone();
        let idle_sleep = config.idle_sleep;
        let mut worker = builder
            .spawn(move || {
                run_isolated(
                    loop_name,
                    buffer,
                    server_link,
                    loop_control_link,
                    sinks,
                    factory,
                    idle_sleep,
                )
            })
            .map_err(|e| spawn_error(e.to_string()))?;

        let opened = client_link
            .open()
            .and_then(|client| control_link.open().map(|control| (client, control)));
        let (client, control) = match opened {
            Ok(ends) => ends,
            Err(e) => {
                let _ = worker.kill();
                let _ = worker.join();
                return Err(spawn_error(e.to_string()));
            }
        };

        match control.recv() {
            Ok(StreamReply::Ready(Ok(()))) => {}
            Ok(StreamReply::Ready(Err(source))) => {
                let _ = worker.join();
                return Err(StreamError::Hardware { name, source });
            }
            Ok(other) => {
                let _ = worker.kill();
                let _ = worker.join();
                return Err(spawn_error(format!("unexpected first reply {:?}", other)));
            }
            Err(_) => {
                let reason = match worker.join() {
                    Ok(exit) => format!("loop process ended before reporting: {:?}", exit.reason),
                    Err(e) => e.to_string(),
                };
                return Err(spawn_error(reason));
            }
        }

        Ok(Self {
            name,
            backend: Backend::Process {
                control: Mutex::new(control),
                worker: Some(worker),
            },
            proxy: RemoteProxy::new(client),
            filter: None,
        })
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the loop runs
    #[must_use]
    pub fn isolation(&self) -> Isolation {
        match self.backend {
            Backend::Thread { .. } => Isolation::Thread,
            #[cfg(unix)]
            Backend::Process { .. } => Isolation::Process,
        }
    }

    /// Request streaming on
    pub fn start(&self) {
        match &self.backend {
            Backend::Thread { controls, .. } => controls.start(),
            #[cfg(unix)]
            Backend::Process { control, .. } => {
                if let Err(e) = self.request(control, StreamCommand::Start) {
                    warn!(source = %self.name, error = %e, "Start request lost");
                }
            }
        }
    }

    /// Toggle streaming, returning whether it is now requested on
    ///
    /// A loop process that cannot be reached counts as not streaming.
    pub fn pause(&self) -> bool {
        match &self.backend {
            Backend::Thread { controls, .. } => controls.pause(),
            #[cfg(unix)]
            Backend::Process { control, .. } => match self.request(control, StreamCommand::Pause) {
                Ok(StreamReply::Streaming(on)) => on,
                Ok(other) => {
                    warn!(source = %self.name, reply = ?other, "Unexpected pause reply");
                    false
                }
                Err(e) => {
                    warn!(source = %self.name, error = %e, "Pause request lost");
                    false
                }
            },
        }
    }

    /// Stop the loop and wait for it to exit
    ///
    /// The loop finishes its current iteration first, including any
    /// blocking hardware call.
    pub fn stop(&mut self) -> StreamResult<LoopReport> {
        let report = match &mut self.backend {
            Backend::Thread { controls, thread, .. } => {
                controls.stop();
                let Some(thread) = thread.take() else {
                    return Ok(LoopReport::default());
                };
                thread.join().map_err(|payload| StreamError::LoopPanicked {
                    name: self.name.clone(),
                    message: panic_message(payload.as_ref()),
                })?
            }
            #[cfg(unix)]
            Backend::Process { control, worker } => {
                let Some(worker) = worker.take() else {
                    return Ok(LoopReport::default());
                };
                let reply = {
                    let control = control.lock();
                    control
                        .send(StreamCommand::Stop)
                        .and_then(|()| control.recv())
                };
                let exit = worker.join();
                match (reply, exit) {
                    (Ok(StreamReply::Stopped(report)), _) => report,
                    (Ok(other), _) => {
                        return Err(StreamError::LoopLost {
                            name: self.name.clone(),
                            reason: format!("unexpected stop reply {:?}", other),
                        })
                    }
                    (Err(_), Ok(exit)) => {
                        return Err(StreamError::LoopLost {
                            name: self.name.clone(),
                            reason: format!("{:?}", exit.reason),
                        })
                    }
                    (Err(_), Err(e)) => {
                        return Err(StreamError::LoopLost {
                            name: self.name.clone(),
                            reason: e.to_string(),
                        })
                    }
                }
            }
        };
        info!(source = %self.name, samples = report.samples, commands = report.commands, "Stream source stopped");
        Ok(report)
    }

    /// Whether the loop is still alive
    #[must_use]
    pub fn is_running(&self) -> bool {
        match &self.backend {
            Backend::Thread { thread, .. } => thread.as_ref().is_some_and(|t| !t.is_finished()),
            #[cfg(unix)]
            Backend::Process { control, worker } => {
                worker.is_some()
                    && matches!(
                        self.request(control, StreamCommand::Running),
                        Ok(StreamReply::Running(true))
                    )
            }
        }
    }

    /// Take everything buffered, passed through the installed filter
    pub fn get(&self) -> StreamResult<Records> {
        let records = match &self.backend {
            Backend::Thread { buffer, .. } => buffer.read_all()?,
            #[cfg(unix)]
            Backend::Process { control, .. } => match self.request(control, StreamCommand::ReadAll)? {
                StreamReply::Records(records) => records?,
                other => return Err(self.unexpected(&other)),
            },
        };
        Ok(match &self.filter {
            Some(filter) => filter(records),
            None => records,
        })
    }

    /// Install a consumer-side filter applied to every `get`
    pub fn set_filter(&mut self, filter: impl Fn(Records) -> Records + Send + Sync + 'static) {
        self.filter = Some(Arc::new(filter));
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
    }

    /// Call a hardware method through the loop
    pub fn call(&self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, ProxyError> {
        self.proxy.call(name, args, kwargs)
    }

    /// Read a hardware attribute through the loop
    pub fn get_attribute(&self, name: &str) -> Result<Value, ProxyError> {
        self.proxy.attribute(name)
    }

    /// Proxy to the hardware, usable from other threads
    #[must_use]
    pub fn proxy(&self) -> &RemoteProxy {
        &self.proxy
    }

    /// Records a `get` would return right now, zero if the loop is unreachable
    #[must_use]
    pub fn buffered(&self) -> usize {
        match &self.backend {
            Backend::Thread { buffer, .. } => buffer.len(),
            #[cfg(unix)]
            Backend::Process { control, .. } => match self.request(control, StreamCommand::Buffered) {
                Ok(StreamReply::Count(n)) => usize::try_from(n).unwrap_or(usize::MAX),
                _ => 0,
            },
        }
    }

    /// Records lost to overwriting over the source's lifetime
    #[must_use]
    pub fn overwritten_total(&self) -> u64 {
        match &self.backend {
            Backend::Thread { buffer, .. } => buffer.overwritten_total(),
            #[cfg(unix)]
            Backend::Process { control, .. } => match self.request(control, StreamCommand::Overwritten) {
                Ok(StreamReply::Count(n)) => n,
                _ => 0,
            },
        }
    }

    /// One control round trip; the lock keeps replies paired with their commands
    #[cfg(unix)]
    fn request(&self, control: &Mutex<ControlClient>, command: StreamCommand) -> StreamResult<StreamReply> {
        let control = control.lock();
        control.send(command).map_err(|e| self.lost(e))?;
        control.recv().map_err(|e| self.lost(e))
    }

    #[cfg(unix)]
    fn lost(&self, error: impl std::fmt::Display) -> StreamError {
        StreamError::LoopLost {
            name: self.name.clone(),
            reason: error.to_string(),
        }
    }

    #[cfg(unix)]
    fn unexpected(&self, reply: &StreamReply) -> StreamError {
        self.lost(format!("unexpected reply {:?}", reply))
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(source = %self.name, error = %e, "Stream source ended badly");
        }
    }
}

/// Body of a loop process: build the hardware, then poll on this thread
/// while a second thread answers the owner's control commands
#[cfg(unix)]
fn run_isolated<H, F>(
    name: String,
    buffer: StreamBuffer,
    commands: Link<Reply, Request>,
    control: Link<StreamReply, StreamCommand>,
    sinks: Vec<Box<dyn SampleSink>>,
    factory: F,
    idle_sleep: Duration,
) -> i32
where
    H: Hardware + 'static,
    F: FnOnce() -> Result<H, HardwareError>,
{
    let (commands, control) = match (commands.open(), control.open()) {
        (Ok(commands), Ok(control)) => (commands, control),
        _ => return 1,
    };
    let hardware = match factory() {
        Ok(hardware) => hardware,
        Err(e) => {
            let _ = control.send(StreamReply::Ready(Err(e)));
            return 1;
        }
    };
    if control.send(StreamReply::Ready(Ok(()))).is_err() {
        return 1;
    }

    let buffer = Arc::new(buffer);
    let controls = Arc::new(Controls::new());
    let (report_tx, report_rx) = flume::bounded(1);
    let server = {
        let name = name.clone();
        let buffer = Arc::clone(&buffer);
        let controls = Arc::clone(&controls);
        thread::Builder::new()
            .name(format!("stream-control-{}", name))
            .spawn(move || serve_control(&name, &control, &buffer, &controls, &report_rx))
    };
    let server = match server {
        Ok(server) => server,
        Err(e) => {
            error!(source = %name, error = %e, "Failed to start control thread");
            return 1;
        }
    };

    let report = PollingLoop::new(name, hardware, buffer, commands, controls)
        .with_sinks(sinks)
        .with_idle_sleep(idle_sleep)
        .run();
    let code = i32::from(report.integrity.is_some());
    let _ = report_tx.send(report);
    let _ = server.join();
    code
}
