/*!
 * Polling Loop
 * Cooperative single-threaded loop interleaving commands and sampling
 *
 * The loop knows nothing about where it runs. `StreamSource` puts it on
 * its own thread or in a forked worker process.
 */

use super::buffer::StreamBuffer;
use super::hardware::{Hardware, SampleSink};
use super::types::{HardwareError, IntegrityError};
use crate::ipc::rpc::{serve_request, ServerEndpoint};
use crate::ipc::Request;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Level-triggered flags shared between a loop and its owner
///
/// Checked once per iteration; nothing here interrupts a blocking
/// hardware call.
#[derive(Debug)]
pub struct Controls {
    running: AtomicBool,
    streaming: AtomicBool,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            streaming: AtomicBool::new(false),
        }
    }
}

impl Controls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for streaming on
    pub fn start(&self) {
        self.streaming.store(true, Ordering::SeqCst);
    }

    /// Flip the streaming request, returning the new value
    pub fn pause(&self) -> bool {
        !self.streaming.fetch_xor(true, Ordering::SeqCst)
    }

    /// Ask the loop to exit after its current iteration
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether streaming is currently requested
    #[must_use]
    pub fn wants_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    fn cancel_streaming(&self) {
        self.streaming.store(false, Ordering::SeqCst);
    }
}

/// What a loop did over its lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopReport {
    pub samples: u64,
    pub commands: u64,
    pub hardware_faults: u64,
    pub sink_failures: u64,
    /// Set when a ring integrity violation ended the loop
    pub integrity: Option<IntegrityError>,
}

enum Exit {
    Stopped,
    ChannelClosed,
    Integrity(IntegrityError),
}

/// Loop turning hardware samples into ring writes and sink fan-out
pub struct PollingLoop<H: Hardware> {
    name: String,
    hardware: H,
    buffer: Arc<StreamBuffer>,
    sinks: Vec<Box<dyn SampleSink>>,
    commands: ServerEndpoint,
    controls: Arc<Controls>,
    idle_sleep: Duration,
    streaming: bool,
    report: LoopReport,
}

impl<H: Hardware> PollingLoop<H> {
    pub fn new(
        name: impl Into<String>,
        hardware: H,
        buffer: Arc<StreamBuffer>,
        commands: ServerEndpoint,
        controls: Arc<Controls>,
    ) -> Self {
        Self {
            name: name.into(),
            hardware,
            buffer,
            sinks: Vec::new(),
            commands,
            controls,
            idle_sleep: crate::core::limits::DEFAULT_IDLE_SLEEP,
            streaming: false,
            report: LoopReport::default(),
        }
    }

    #[must_use]
    pub fn with_sinks(mut self, sinks: Vec<Box<dyn SampleSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    #[must_use]
    pub fn with_idle_sleep(mut self, idle: Duration) -> Self {
        self.idle_sleep = idle;
        self
    }

    /// Run until stopped, the owner's channel closes, or the ring reports corruption
    pub fn run(mut self) -> LoopReport {
        info!(source = %self.name, sinks = self.sinks.len(), "Polling loop started");
        let exit = loop {
            if !self.controls.is_running() {
                break Exit::Stopped;
            }
            if let Err(exit) = self.tick() {
                break exit;
            }
        };

        match exit {
            Exit::Stopped => info!(source = %self.name, "Polling loop stopped"),
            Exit::ChannelClosed => info!(source = %self.name, "Command channel closed, polling loop exiting"),
            Exit::Integrity(e) => {
                error!(source = %self.name, error = %e, "Ring integrity violated, polling loop exiting");
                self.report.integrity = Some(e);
            }
        }
        if self.streaming {
            if let Err(e) = self.hardware.stop() {
                warn!(source = %self.name, error = %e, "Hardware failed to stop on exit");
            }
        }
        self.report
    }

    fn tick(&mut self) -> Result<(), Exit> {
        self.service_command()?;
        self.sync_streaming();
        if self.streaming {
            self.poll_sample()
        } else {
            thread::sleep(self.idle_sleep);
            Ok(())
        }
    }

    fn service_command(&mut self) -> Result<(), Exit> {
        let request = match self.commands.try_recv() {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(_) => return Err(Exit::ChannelClosed),
        };
        debug!(source = %self.name, request = ?request.name(), "Servicing command");

        let hardware = &mut self.hardware;
        let reply = self.buffer.with_lock(|| serve_request(hardware, &request));
        self.report.commands += 1;

        if self.commands.send(reply).is_err() {
            return Err(Exit::ChannelClosed);
        }
        if request == Request::Shutdown {
            return Err(Exit::Stopped);
        }
        Ok(())
    }

    fn sync_streaming(&mut self) {
        let wanted = self.controls.wants_streaming();
        if wanted == self.streaming {
            return;
        }
        if wanted {
            self.buffer.reset();
            match self.hardware.start() {
                Ok(()) => {
                    info!(source = %self.name, "Streaming started");
                    self.streaming = true;
                }
                Err(e) => {
                    self.controls.cancel_streaming();
                    self.fault(&e);
                }
            }
        } else {
            self.streaming = false;
            match self.hardware.stop() {
                Ok(()) => info!(source = %self.name, "Streaming paused"),
                Err(e) => self.fault(&e),
            }
        }
    }

    fn poll_sample(&mut self) -> Result<(), Exit> {
        let sample = match self.hardware.get() {
            Ok(Some(sample)) => sample,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.fault(&e);
                return Ok(());
            }
        };

        for sink in &mut self.sinks {
            if let Err(e) = sink.send(&self.name, &sample) {
                self.report.sink_failures += 1;
                warn!(source = %self.name, error = %e, "Sink rejected sample");
            }
        }
        self.buffer.write(&sample).map_err(Exit::Integrity)?;
        self.report.samples += 1;
        Ok(())
    }

    fn fault(&mut self, error: &HardwareError) {
        self.report.hardware_faults += 1;
        warn!(source = %self.name, error = %error, "Hardware fault");
        for sink in &mut self.sinks {
            sink.fault(&self.name, error);
        }
    }
}
