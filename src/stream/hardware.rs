/*!
 * Hardware Collaborators
 * Device and sink interfaces a stream source drives
 */

use super::types::{HardwareError, SinkError};
use crate::core::types::Sample;
use crate::ipc::Dispatch;

/// Device a stream source polls for samples
///
/// Any method the device exposes through `Dispatch` becomes callable from
/// the source's owner while the loop runs.
pub trait Hardware: Dispatch {
    /// Begin acquisition
    fn start(&mut self) -> Result<(), HardwareError>;

    /// End acquisition
    fn stop(&mut self) -> Result<(), HardwareError>;

    /// Next sample, `None` when nothing is ready yet
    fn get(&mut self) -> Result<Option<Sample>, HardwareError>;
}

impl<H: Hardware + ?Sized> Hardware for Box<H> {
    fn start(&mut self) -> Result<(), HardwareError> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        (**self).stop()
    }

    fn get(&mut self) -> Result<Option<Sample>, HardwareError> {
        (**self).get()
    }
}

/// Consumer that sees every sample as it is acquired
///
/// Sinks are fed before the ring write, so they also see samples the ring
/// later overwrites.
pub trait SampleSink: Send {
    fn send(&mut self, source: &str, sample: &[f64]) -> Result<(), SinkError>;

    /// Told about acquisition failures; ignored by default
    fn fault(&mut self, source: &str, error: &HardwareError) {
        let _ = (source, error);
    }
}

/// Event delivered by a `ChannelSink`
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Sample { source: String, sample: Sample },
    Fault { source: String, error: HardwareError },
}

/// Sink forwarding samples into a flume channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: flume::Sender<SinkEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: flume::Sender<SinkEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiver its events arrive on
    #[must_use]
    pub fn unbounded() -> (Self, flume::Receiver<SinkEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl SampleSink for ChannelSink {
    fn send(&mut self, source: &str, sample: &[f64]) -> Result<(), SinkError> {
        self.tx
            .send(SinkEvent::Sample {
                source: source.to_string(),
                sample: sample.to_vec(),
            })
            .map_err(|_| SinkError("receiver dropped".to_string()))
    }

    fn fault(&mut self, source: &str, error: &HardwareError) {
        let _ = self.tx.send(SinkEvent::Fault {
            source: source.to_string(),
            error: error.clone(),
        });
    }
}
