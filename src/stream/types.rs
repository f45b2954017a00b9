/*!
 * Stream Types
 * Record shapes, stream configuration and streaming errors
 */

use crate::core::limits::{
    DEFAULT_BUFFER_SECONDS, DEFAULT_IDLE_SLEEP, DEFAULT_MARKER_COUNT, EYE_DIMENSIONS,
    EYE_UPDATE_FREQ, MOTION_MARKER_DIMENSIONS, MOTION_UPDATE_FREQ,
};
use crate::ipc::{IpcError, ProxyError};
use crate::process::Isolation;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result of a ring buffer operation
pub type IntegrityResult<T> = Result<T, IntegrityError>;

/// Result of a stream source operation
pub type StreamResult<T> = Result<T, StreamError>;

/// Shape of one ring record
///
/// A record is stored flat; `size()` is the number of values per record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ShapeFrame")]
pub struct RecordShape {
    dims: Vec<usize>,
}

#[derive(Deserialize)]
struct ShapeFrame {
    dims: Vec<usize>,
}

impl TryFrom<ShapeFrame> for RecordShape {
    type Error = IntegrityError;

    fn try_from(frame: ShapeFrame) -> IntegrityResult<Self> {
        RecordShape::new(frame.dims)
    }
}

impl RecordShape {
    /// Build a shape, rejecting empty and zero-sized dimensions
    pub fn new(dims: impl Into<Vec<usize>>) -> IntegrityResult<Self> {
        let dims = dims.into();
        if dims.is_empty() || dims.contains(&0) {
            return Err(IntegrityError::InvalidShape(format!(
                "record dimensions must be non-empty and non-zero, got {:?}",
                dims
            )));
        }
        Ok(Self { dims })
    }

    /// One-dimensional shape of `len` values
    pub fn flat(len: usize) -> IntegrityResult<Self> {
        Self::new(vec![len])
    }

    #[inline]
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Values per record
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Configuration of a stream source and its ring buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub shape: RecordShape,
    /// Samples per second the hardware produces
    pub update_freq: u32,
    /// Seconds of history the ring holds
    pub buffer_seconds: u32,
    /// Pause between loop iterations while not streaming
    pub idle_sleep: Duration,
    /// Where the polling loop and its ring live
    #[serde(default)]
    pub isolation: Isolation,
}

impl StreamConfig {
    #[must_use]
    pub fn new(shape: RecordShape, update_freq: u32) -> Self {
        Self {
            shape,
            update_freq,
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            idle_sleep: DEFAULT_IDLE_SLEEP,
            isolation: Isolation::default(),
        }
    }

    /// 2-D gaze position at 500 Hz
    #[must_use]
    pub fn eye() -> Self {
        Self::new(
            RecordShape {
                dims: vec![EYE_DIMENSIONS],
            },
            EYE_UPDATE_FREQ,
        )
    }

    /// `marker_count` 3-D markers at 480 Hz, a zero count falls back to the default
    #[must_use]
    pub fn motion(marker_count: usize) -> Self {
        let markers = if marker_count == 0 {
            DEFAULT_MARKER_COUNT
        } else {
            marker_count
        };
        Self::new(
            RecordShape {
                dims: vec![markers, MOTION_MARKER_DIMENSIONS],
            },
            MOTION_UPDATE_FREQ,
        )
    }

    /// Ring capacity in records
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer_seconds as usize * self.update_freq as usize
    }

    #[inline]
    #[must_use]
    pub fn with_buffer_seconds(mut self, seconds: u32) -> Self {
        self.buffer_seconds = seconds;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_update_freq(mut self, hz: u32) -> Self {
        self.update_freq = hz;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_idle_sleep(mut self, idle: Duration) -> Self {
        self.idle_sleep = idle;
        self
    }

    /// Run the loop in its own process so a crashing driver cannot take the owner down
    #[inline]
    #[must_use]
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }
}

/// Ring slot or dimension mismatch
///
/// Always a construction bug. Never coerced or partially decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum IntegrityError {
    #[error("Record has {actual} values, buffer records have {expected}")]
    #[diagnostic(
        code(stream::dimension_mismatch),
        help("The producer and the buffer disagree on the record shape.")
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Region of {len} values is not a whole number of {dim}-value records")]
    #[diagnostic(code(stream::ragged_region), help("The ring storage is corrupt. Do not decode it."))]
    RaggedRegion { len: usize, dim: usize },

    #[error("Invalid record shape: {0}")]
    #[diagnostic(code(stream::invalid_shape))]
    InvalidShape(String),
}

/// Sample acquisition or control failure reported by hardware
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum HardwareError {
    #[error("Sample acquisition failed: {0}")]
    #[diagnostic(code(hardware::acquisition))]
    Acquisition(String),

    #[error("Hardware control failed: {0}")]
    #[diagnostic(code(hardware::control), help("The device rejected a start or stop request."))]
    Control(String),
}

/// A sink refused a sample
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[error("Sink rejected sample: {0}")]
#[diagnostic(code(stream::sink))]
pub struct SinkError(pub String);

/// Failure of a stream source as a whole
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum StreamError {
    #[error("Failed to spawn stream loop '{name}': {reason}")]
    #[diagnostic(code(stream::spawn))]
    Spawn { name: String, reason: String },

    #[error("Hardware for '{name}' failed to initialise: {source}")]
    #[diagnostic(code(stream::hardware))]
    Hardware {
        name: String,
        #[source]
        source: HardwareError,
    },

    #[error("Stream loop '{name}' panicked: {message}")]
    #[diagnostic(code(stream::loop_panicked))]
    LoopPanicked { name: String, message: String },

    #[error("Stream loop process '{name}' is gone: {reason}")]
    #[diagnostic(
        code(stream::loop_lost),
        help("The loop's process died or stopped answering; its buffered records are lost.")
    )]
    LoopLost { name: String, reason: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Proxy(#[from] ProxyError),
}

impl From<IpcError> for StreamError {
    fn from(err: IpcError) -> Self {
        StreamError::Proxy(ProxyError::Transport(err))
    }
}
